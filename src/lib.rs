#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # photovar
//!
//! Batch product-photo variation and remote background replacement.
//!
//! The local pipeline applies a fixed sequence of subtle, randomly
//! parameterized transforms (flip, rotation, perspective, elastic
//! distortion, scale-and-refit, noise, color jitter, opacity) so each run
//! produces a visually near-identical but byte-distinct image. The remote
//! pipeline stages images to a shared directory, submits patched workflow
//! graphs to a ComfyUI-compatible generation server, follows its WebSocket
//! push channel for progress, and collects verified outputs.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use photovar::{AugmentConfig, BatchRunner, EventBus};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> photovar::Result<()> {
//! let events = EventBus::new();
//! let mut progress = events.subscribe();
//!
//! let runner = BatchRunner::new(events);
//! let report = runner
//!     .run(
//!         &["photo.jpg".into()],
//!         &AugmentConfig::default(),
//!         "out".as_ref(),
//!         Some(42),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{} file(s) written", report.outputs.len());
//! # Ok(())
//! # }
//! ```
//!
//! Single images go through [`augment_image`] directly; the `remote`
//! module drives a full server batch via [`remote::RemoteOrchestrator`].
//!
//! ## Feature flags
//!
//! - `cli` (default): command-line interface, progress bars, and the
//!   tracing subscriber setup. Library consumers can disable it.

pub mod augment;
pub mod batch;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod remote;
pub mod services;
pub mod tracing_config;

pub use augment::transform;
pub use batch::{BatchReport, BatchRunner};
pub use config::{AugmentConfig, FillMode, SamplerOverrides};
pub use error::{PhotovarError, Result};
pub use events::{AppEvent, EventBus};
pub use services::{collect_image_files, ImageIoService};
pub use tracing_config::{TracingConfig, TracingFormat};

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

/// Convenience: load one image, apply the variation pipeline, and save the
/// result. `seed` makes the run reproducible; `None` draws from entropy.
///
/// # Errors
/// Configuration, load, and save failures per [`PhotovarError`].
pub fn augment_image<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    config: &AugmentConfig,
    seed: Option<u64>,
) -> Result<()> {
    let image = ImageIoService::load_image(input)?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let result = transform(&image, config, &mut rng)?;
    ImageIoService::save_image(&result, output)
}
