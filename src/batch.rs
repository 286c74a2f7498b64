//! Local batch augmentation runner.
//!
//! Runs the transform pipeline over a list of files on blocking worker
//! threads, publishing progress on the event channel and honoring a
//! cooperative cancellation token between files.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::augment;
use crate::config::AugmentConfig;
use crate::error::{PhotovarError, Result};
use crate::events::{AppEvent, EventBus};
use crate::services::{unique_output_path, ImageIoService};

/// Outcome summary of one batch run
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Files written successfully
    pub outputs: Vec<PathBuf>,
    /// Files skipped due to task-level errors
    pub skipped: usize,
    /// True when the run stopped early on cancellation
    pub cancelled: bool,
}

/// Drives the augmentation pipeline over a batch of files
#[derive(Debug, Clone)]
pub struct BatchRunner {
    events: EventBus,
}

impl BatchRunner {
    /// Create a runner publishing on `events`.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    /// Process every file in `files`, writing `mod_<stem>.png` outputs into
    /// `out_dir`.
    ///
    /// Name collisions follow `config.overwrite`: replace in place, or probe
    /// `mod_<stem>_1.png`, `_2`... for a free name. A `seed` makes the whole
    /// run reproducible. Unreadable or undecodable sources are skipped with
    /// an [`AppEvent::Error`]; the batch continues.
    ///
    /// # Errors
    ///
    /// Fails up front on an invalid `config`, an empty `files` list, or an
    /// output directory that cannot be created. Per-file failures never
    /// surface here.
    pub async fn run(
        &self,
        files: &[PathBuf],
        config: &AugmentConfig,
        out_dir: &Path,
        seed: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        config.validate()?;
        if files.is_empty() {
            return Err(PhotovarError::invalid_config(
                "no input files to process",
            ));
        }
        std::fs::create_dir_all(out_dir)
            .map_err(|e| PhotovarError::file_io_error("create output directory", out_dir, &e))?;

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let total = files.len();
        let mut report = BatchReport::default();
        self.events
            .status(format!("Processing {total} file(s)"));

        for (index, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(done = index, total, "batch cancelled");
                self.events.status("Batch cancelled");
                report.cancelled = true;
                return Ok(report);
            }

            let out_path = output_path_for(file, out_dir, config.overwrite);
            let (returned_rng, result) =
                Self::process_one(file.clone(), config.clone(), out_path.clone(), rng).await?;
            rng = returned_rng;
            match result {
                Ok(()) => {
                    tracing::debug!(source = %file.display(), output = %out_path.display(), "file processed");
                    self.events.publish(AppEvent::FileSaved(out_path.clone()));
                    report.outputs.push(out_path);
                }
                Err(err) if err.is_task_level() => {
                    tracing::warn!(source = %file.display(), error = %err, "skipping file");
                    self.events.error(format!("{}: {err}", file.display()));
                    report.skipped += 1;
                }
                Err(err) => return Err(err),
            }

            self.events.publish(AppEvent::Progress {
                done: index + 1,
                total,
            });
        }

        self.events.publish(AppEvent::AllDone);
        Ok(report)
    }

    /// Load, transform, and save one file on a blocking thread. The RNG is
    /// threaded through so consecutive files advance one deterministic
    /// stream.
    async fn process_one(
        source: PathBuf,
        config: AugmentConfig,
        out_path: PathBuf,
        mut rng: StdRng,
    ) -> Result<(StdRng, Result<()>)> {
        let handle = tokio::task::spawn_blocking(move || {
            let result = ImageIoService::load_image(&source)
                .and_then(|image| augment::transform(&image, &config, &mut rng))
                .and_then(|image| ImageIoService::save_image(&image, &out_path));
            (rng, result)
        });
        handle
            .await
            .map_err(|e| PhotovarError::internal(format!("worker task panicked: {e}")))
    }
}

/// Output path for one source file: `mod_<stem>.png` in `out_dir`, with the
/// collision policy applied.
fn output_path_for(source: &Path, out_dir: &Path, overwrite: bool) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    unique_output_path(out_dir, &format!("mod_{stem}"), "png", overwrite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_test_image(path: &Path) {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([x as u8 * 3, y as u8 * 5, 77]));
        img.save(path).unwrap();
    }

    #[tokio::test]
    async fn empty_file_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BatchRunner::new(EventBus::new());
        let result = runner
            .run(
                &[],
                &AugmentConfig::default(),
                dir.path(),
                Some(1),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreadable_file_is_skipped_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        write_test_image(&good);
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not an image").unwrap();

        let out = dir.path().join("out");
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let runner = BatchRunner::new(bus);
        let report = runner
            .run(
                &[bad, good],
                &AugmentConfig::default(),
                &out,
                Some(9),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.outputs, vec![out.join("mod_good.png")]);
        assert!(out.join("mod_good.png").exists());

        let mut saw_error = false;
        let mut saw_all_done = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::Error(_) => saw_error = true,
                AppEvent::AllDone => saw_all_done = true,
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(saw_all_done);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        write_test_image(&src);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = BatchRunner::new(EventBus::new());
        let report = runner
            .run(
                &[src],
                &AugmentConfig::default(),
                dir.path(),
                Some(1),
                &cancel,
            )
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.outputs.is_empty());
    }

    #[tokio::test]
    async fn collision_without_overwrite_gets_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.png");
        write_test_image(&src);
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("mod_photo.png"), b"existing").unwrap();

        let config = AugmentConfig {
            overwrite: false,
            ..Default::default()
        };
        let runner = BatchRunner::new(EventBus::new());
        let report = runner
            .run(&[src], &config, &out, Some(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outputs, vec![out.join("mod_photo_1.png")]);
        // the existing file is untouched
        assert_eq!(std::fs::read(out.join("mod_photo.png")).unwrap(), b"existing");
    }
}
