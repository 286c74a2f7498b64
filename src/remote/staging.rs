//! Staging and output relocation for remote tasks.
//!
//! Inputs are copied into a shared staging directory under a timestamped
//! name before submission; finished outputs are awaited in the server's
//! temp output directory, integrity-checked, and moved to their final
//! location under `<orig-stem>_<tag>.png`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;

use crate::error::{PhotovarError, Result};
use crate::services::{unique_output_path, FileStore};

/// Poll interval while waiting for server output files
const FILE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Output-name suffix used when a prompt template carries no bracketed tag
const DEFAULT_TAG: &str = "processed";

/// Result of staging one source image.
#[derive(Debug, Clone)]
pub struct StagedInput {
    /// File name inside the staging directory (timestamped)
    pub file_name: String,
    /// Reference the workflow's image-input nodes receive:
    /// `<staging-dir-name>/<file_name>`
    pub image_ref: String,
}

/// Copy `source` into `staging_dir` under
/// `<YYYYmmdd_HHMMSS_micros>_<original-name>`.
///
/// The timestamp keeps concurrent batches from clobbering each other and
/// makes stale staging files easy to cull by age.
///
/// # Errors
/// Missing source or a failed copy surface as [`PhotovarError::FileSystem`].
pub fn stage_image(source: &Path, staging_dir: &Path) -> Result<StagedInput> {
    if !source.exists() {
        return Err(PhotovarError::file_io_error(
            "stage source image",
            source,
            &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
        ));
    }
    let original_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            PhotovarError::filesystem(format!("source has no file name: {}", source.display()))
        })?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f");
    let file_name = format!("{stamp}_{original_name}");
    FileStore::copy_into(source, staging_dir, &file_name)?;

    let dir_name = staging_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input");
    let image_ref = format!("{dir_name}/{file_name}");
    tracing::debug!(source = %source.display(), %image_ref, "image staged");

    Ok(StagedInput {
        file_name,
        image_ref,
    })
}

/// True when `path` exists, is non-empty, and its header parses as a known
/// image format. Guards against reading a file the server is still writing.
#[must_use]
pub fn is_file_ready(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if metadata.len() == 0 {
        return false;
    }
    image::ImageReader::open(path)
        .ok()
        .and_then(|r| r.with_guessed_format().ok())
        .and_then(|r| r.into_dimensions().ok())
        .is_some()
}

/// Poll `temp_dir` until one of `filenames` exists and passes the integrity
/// check, or `timeout` elapses.
///
/// # Errors
/// [`PhotovarError::Timeout`] when no candidate becomes ready in time, and
/// [`PhotovarError::FileSystem`] when there are no candidates at all.
pub async fn wait_for_output_file(
    temp_dir: &Path,
    filenames: &[String],
    timeout: Duration,
) -> Result<PathBuf> {
    if filenames.is_empty() {
        return Err(PhotovarError::filesystem(
            "history entry listed no output files",
        ));
    }

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        for name in filenames {
            let candidate = temp_dir.join(name);
            if is_file_ready(&candidate) {
                return Ok(candidate);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PhotovarError::timeout(
                format!("output file in {}", temp_dir.display()),
                timeout.as_secs(),
            ));
        }
        tokio::time::sleep(FILE_POLL_INTERVAL).await;
    }
}

/// Extract the bracketed tag from a prompt template stem:
/// `backdrop[studio]` yields `studio`. Falls back to `processed` when the
/// stem is absent or carries no tag.
#[must_use]
pub fn output_tag(prompt_name: Option<&str>) -> String {
    let Some(stem) = prompt_name else {
        return DEFAULT_TAG.to_owned();
    };
    let tag = stem
        .find('[')
        .and_then(|open| stem[open + 1..].find(']').map(|close| &stem[open + 1..open + 1 + close]));
    match tag {
        Some(tag) if !tag.is_empty() => tag.to_owned(),
        _ => DEFAULT_TAG.to_owned(),
    }
}

/// Move a verified output from the temp dir to `final_dir` as
/// `<source-stem>_<tag>.png`. Falls back to copy-and-delete when a plain
/// rename crosses filesystems. Existing outputs are never clobbered; a
/// numeric suffix is probed instead.
///
/// # Errors
/// Directory creation or the move itself failing surfaces as
/// [`PhotovarError::FileSystem`].
pub fn relocate_output(
    temp_file: &Path,
    final_dir: &Path,
    source: &Path,
    tag: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(final_dir)
        .map_err(|e| PhotovarError::file_io_error("create final output directory", final_dir, &e))?;

    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let dest = unique_output_path(final_dir, &format!("{stem}_{tag}"), "png", false);

    if std::fs::rename(temp_file, &dest).is_err() {
        std::fs::copy(temp_file, &dest)
            .map_err(|e| PhotovarError::file_io_error("copy output file", temp_file, &e))?;
        if let Err(e) = std::fs::remove_file(temp_file) {
            tracing::warn!(path = %temp_file.display(), error = %e, "could not remove temp output");
        }
    }
    tracing::info!(output = %dest.display(), "output relocated");
    Ok(dest)
}
