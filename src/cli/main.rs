//! Command-line interface implementation.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::config::{AugmentConfig, FillMode, SamplerOverrides};
use crate::events::{AppEvent, EventBus};
use crate::remote::{RemoteConfig, RemoteOrchestrator};
use crate::services::collect_image_files;
use crate::tracing_config::{TracingConfig, TracingFormat};
use crate::BatchRunner;

/// Batch product-photo variation and remote background replacement
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "photovar")]
pub struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Compact log output (no colors), for CI
    #[arg(long, global = true)]
    pub compact_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Margin fill choices exposed on the command line
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliFillMode {
    /// Mirror image content outward
    Reflect,
    /// Blurred copy of the source
    Blur,
    /// Solid white
    White,
}

impl From<CliFillMode> for FillMode {
    fn from(value: CliFillMode) -> Self {
        match value {
            CliFillMode::Reflect => Self::Reflect,
            CliFillMode::Blur => Self::Blur,
            CliFillMode::White => Self::White,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply the randomized variation pipeline to local images
    Augment(AugmentArgs),
    /// Submit images to a remote generation server for background replacement
    Remote(RemoteArgs),
}

#[derive(clap::Args)]
pub struct AugmentArgs {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output directory for `mod_*.png` results
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// RNG seed for a reproducible run
    #[arg(long)]
    pub seed: Option<u64>,

    /// Mirror horizontally
    #[arg(long)]
    pub hflip: bool,

    /// Mirror vertically
    #[arg(long)]
    pub vflip: bool,

    /// Output alpha multiplier (0-1)
    #[arg(long, default_value_t = 1.0)]
    pub opacity: f32,

    /// Gaussian noise standard deviation
    #[arg(long, default_value_t = 2.0)]
    pub noise: f32,

    /// Minimum rotation magnitude, degrees
    #[arg(long, default_value_t = 0.5)]
    pub rot_min: f32,

    /// Maximum rotation magnitude, degrees
    #[arg(long, default_value_t = 1.5)]
    pub rot_max: f32,

    /// Minimum perspective corner shift, pixels
    #[arg(long, default_value_t = 1.0)]
    pub persp_min: f32,

    /// Maximum perspective corner shift, pixels
    #[arg(long, default_value_t = 5.0)]
    pub persp_max: f32,

    /// Multiplicative color jitter fraction
    #[arg(long, default_value_t = 0.02)]
    pub color_jitter: f32,

    /// Elastic distortion strength, pixels (<= 0 disables)
    #[arg(long, default_value_t = 5.0)]
    pub distortion_strength: f32,

    /// Elastic distortion smoothing sigma
    #[arg(long, default_value_t = 8.0)]
    pub distortion_smoothness: f32,

    /// Horizontal scale factor
    #[arg(long, default_value_t = 1.0)]
    pub scale_x: f32,

    /// Vertical scale factor
    #[arg(long, default_value_t = 1.0)]
    pub scale_y: f32,

    /// Margin fill when scaling down
    #[arg(long, value_enum, default_value_t = CliFillMode::Reflect)]
    pub fill_mode: CliFillMode,

    /// Keep existing outputs and write `_1`, `_2`... suffixed names instead
    #[arg(long)]
    pub no_overwrite: bool,
}

#[derive(clap::Args)]
pub struct RemoteArgs {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Generation server base URL, e.g. http://host:8188
    #[arg(long, value_name = "URL")]
    pub server: String,

    /// Shared staging directory the server reads inputs from
    #[arg(long, value_name = "DIR")]
    pub staging: PathBuf,

    /// Directory the server writes raw outputs to
    #[arg(long, value_name = "DIR")]
    pub temp_out: PathBuf,

    /// Final output directory
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Workflow template (API-format JSON)
    #[arg(long, value_name = "FILE")]
    pub workflow: PathBuf,

    /// Prompt text file; a bracketed [tag] in its name tags the outputs
    #[arg(long, value_name = "FILE")]
    pub prompt: PathBuf,

    /// Sampler seed override
    #[arg(long)]
    pub seed: Option<u64>,

    /// Sampler step count override
    #[arg(long)]
    pub steps: Option<u32>,

    /// Sampler name override (e.g. euler)
    #[arg(long)]
    pub sampler: Option<String>,

    /// Scheduler override (e.g. karras)
    #[arg(long)]
    pub scheduler: Option<String>,

    /// CFG scale override
    #[arg(long)]
    pub cfg: Option<f64>,
}

impl AugmentArgs {
    fn to_config(&self) -> AugmentConfig {
        AugmentConfig {
            hflip: self.hflip,
            vflip: self.vflip,
            opacity: self.opacity,
            noise_level: self.noise,
            rot_min: self.rot_min,
            rot_max: self.rot_max,
            persp_min: self.persp_min,
            persp_max: self.persp_max,
            color_jitter: self.color_jitter,
            distortion_strength: self.distortion_strength,
            distortion_smoothness: self.distortion_smoothness,
            scale_x: self.scale_x,
            scale_y: self.scale_y,
            fill_mode: self.fill_mode.into(),
            overwrite: !self.no_overwrite,
        }
    }
}

/// CLI entry point.
///
/// # Errors
/// Any precondition or fatal pipeline failure; per-file errors are reported
/// on the progress output instead.
pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.compact_logs {
        TracingFormat::Compact
    } else {
        TracingFormat::Console
    };
    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .init()
        .context("failed to initialize logging")?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match cli.command {
        Command::Augment(args) => run_augment(args, cancel).await,
        Command::Remote(args) => run_remote(args, cancel).await,
    }
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current file");
            cancel.cancel();
        }
    });
}

async fn run_augment(args: AugmentArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = args.to_config();
    config.validate()?;
    let files = collect_image_files(&args.inputs)?;
    anyhow::ensure!(!files.is_empty(), "no image files found in the given inputs");

    let events = EventBus::new();
    let progress = spawn_progress_renderer(&events, files.len() as u64);

    let runner = BatchRunner::new(events);
    let report = runner
        .run(&files, &config, &args.output, args.seed, &cancel)
        .await?;
    // dropping the last sender ends the renderer
    drop(runner);
    if report.cancelled {
        progress.abort();
    } else {
        progress.await.ok();
    }

    if report.cancelled {
        println!("Cancelled after {} file(s)", report.outputs.len());
    } else {
        println!(
            "Done: {} written, {} skipped -> {}",
            report.outputs.len(),
            report.skipped,
            args.output.display()
        );
    }
    Ok(())
}

async fn run_remote(args: RemoteArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let files = collect_image_files(&args.inputs)?;
    anyhow::ensure!(!files.is_empty(), "no image files found in the given inputs");

    let mut config = RemoteConfig::new(
        args.server,
        args.staging,
        args.temp_out,
        args.output.clone(),
        args.workflow,
        args.prompt,
    );
    config.sampler = SamplerOverrides {
        seed: args.seed,
        steps: args.steps,
        sampler_name: args.sampler,
        scheduler: args.scheduler,
        cfg_scale: args.cfg,
    };

    let events = EventBus::new();
    let progress = spawn_progress_renderer(&events, files.len() as u64);

    let orchestrator = RemoteOrchestrator::new(config, events);
    let result = orchestrator.run(&files, &cancel).await;
    drop(orchestrator);
    if cancel.is_cancelled() {
        progress.abort();
    } else {
        progress.await.ok();
    }
    result?;

    println!("Remote batch finished -> {}", args.output.display());
    Ok(())
}

/// Render batch events as an indicatif progress bar until the stream ends.
fn spawn_progress_renderer(events: &EventBus, total: u64) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        loop {
            match rx.recv().await {
                Ok(AppEvent::Progress { done, .. }) => bar.set_position(done as u64),
                Ok(AppEvent::TaskProgress { name, value, max }) => {
                    bar.set_message(format!("{name} [{value}/{max}]"));
                }
                Ok(AppEvent::Status(text)) => bar.set_message(text),
                Ok(AppEvent::FileSaved(path)) => {
                    bar.set_message(format!("saved {}", path.display()));
                }
                Ok(AppEvent::Error(text)) => bar.println(format!("error: {text}")),
                Ok(AppEvent::AllDone) => {
                    bar.finish_with_message("all done");
                    return;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    bar.finish_and_clear();
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn augment_args_map_onto_config() {
        let cli = Cli::parse_from([
            "photovar", "augment", "-o", "/tmp/out", "--hflip", "--noise", "3.5",
            "--no-overwrite", "in.png",
        ]);
        let Command::Augment(args) = cli.command else {
            panic!("Expected augment subcommand");
        };
        let config = args.to_config();
        assert!(config.hflip);
        assert!(!config.vflip);
        assert!((config.noise_level - 3.5).abs() < f32::EPSILON);
        assert!(!config.overwrite);
        assert_eq!(config.fill_mode, FillMode::Reflect);
    }

    #[test]
    fn remote_args_require_server_and_dirs() {
        let result = Cli::try_parse_from(["photovar", "remote", "in.png"]);
        assert!(result.is_err());
    }
}
