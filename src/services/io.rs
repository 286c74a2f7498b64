//! Image and template file I/O operations
//!
//! This module separates file I/O from the transform and orchestration
//! logic, keeping both testable against temp directories.

use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::error::{PhotovarError, Result};

/// Extensions accepted when expanding a directory into image inputs
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Service for loading and saving image files
pub struct ImageIoService;

impl ImageIoService {
    /// Load an image from a file path.
    ///
    /// Tries extension-based decoding first and falls back to content-based
    /// format detection, so a mislabeled `.jpg` that is really a PNG still
    /// loads.
    ///
    /// # Errors
    /// Returns [`PhotovarError::FileSystem`] when the file is missing and
    /// [`PhotovarError::Image`] when no decoder accepts the content.
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(PhotovarError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                tracing::debug!(
                    path = %path_ref.display(),
                    error = %e,
                    "extension-based decode failed, trying content detection"
                );
                let data = std::fs::read(path_ref)
                    .map_err(|io_err| PhotovarError::file_io_error("read image data", path_ref, &io_err))?;
                Ok(image::load_from_memory(&data)?)
            }
        }
    }

    /// Save an image, creating parent directories as needed. The encoding
    /// format follows the file extension.
    ///
    /// # Errors
    /// Returns [`PhotovarError::FileSystem`] when the directory cannot be
    /// created and [`PhotovarError::Image`] on encoding failure.
    pub fn save_image<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PhotovarError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }

        image.save(path_ref)?;
        Ok(())
    }
}

/// Text and JSON template access plus staging copies
pub struct FileStore;

impl FileStore {
    /// Read a UTF-8 text file (prompt templates).
    pub fn load_text<P: AsRef<Path>>(path: P) -> Result<String> {
        let path_ref = path.as_ref();
        std::fs::read_to_string(path_ref)
            .map_err(|e| PhotovarError::file_io_error("read text file", path_ref, &e))
    }

    /// Read and parse a JSON file (workflow templates).
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<serde_json::Value> {
        let path_ref = path.as_ref();
        let text = Self::load_text(path_ref)?;
        serde_json::from_str(&text).map_err(|e| {
            PhotovarError::invalid_config(format!(
                "'{}' is not valid JSON: {e}",
                path_ref.display()
            ))
        })
    }

    /// Copy `source` into `dir` under `file_name`, creating `dir` if needed.
    /// Returns the destination path.
    pub fn copy_into<P: AsRef<Path>>(source: P, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let source = source.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| PhotovarError::file_io_error("create directory", dir, &e))?;
        let dest = dir.join(file_name);
        std::fs::copy(source, &dest)
            .map_err(|e| PhotovarError::file_io_error("copy file", source, &e))?;
        Ok(dest)
    }
}

/// Resolve an output path for `stem.ext` in `dir`.
///
/// With `overwrite` the plain name is returned even when it exists;
/// otherwise collisions are resolved by probing `stem_1.ext`, `stem_2.ext`...
#[must_use]
pub fn unique_output_path(dir: &Path, stem: &str, ext: &str, overwrite: bool) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{ext}"));
    if overwrite || !candidate.exists() {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Expand a mixed list of files and directories into a flat, de-duplicated
/// list of image files. Directories contribute their direct members with a
/// recognized image extension, in sorted order; nested directories are not
/// descended into.
pub fn collect_image_files<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<PathBuf>> {
    let mut seen = std::collections::HashSet::new();
    let mut files = Vec::new();

    let mut push = |path: PathBuf, files: &mut Vec<PathBuf>| {
        if seen.insert(path.clone()) {
            files.push(path);
        }
    };

    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            let mut members: Vec<PathBuf> = std::fs::read_dir(input)
                .map_err(|e| PhotovarError::file_io_error("read directory", input, &e))?
                .filter_map(std::result::Result::ok)
                .map(|entry| entry.path())
                .filter(|p| p.is_file() && has_image_extension(p))
                .collect();
            members.sort();
            for member in members {
                push(member, &mut files);
            }
        } else {
            push(input.to_path_buf(), &mut files);
        }
    }

    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn load_missing_file_is_filesystem_error() {
        let err = ImageIoService::load_image("/nonexistent/photo.png").unwrap_err();
        assert!(matches!(err, PhotovarError::FileSystem(_)));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.png");
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3])));

        ImageIoService::save_image(&img, &path).unwrap();
        let loaded = ImageIoService::load_image(&path).unwrap();
        assert_eq!(loaded.to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn load_json_rejects_invalid_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileStore::load_json(&path).unwrap_err(),
            PhotovarError::InvalidConfig(_)
        ));
    }

    #[test]
    fn unique_path_probes_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mod_photo.png"), b"x").unwrap();
        std::fs::write(dir.path().join("mod_photo_1.png"), b"x").unwrap();

        let path = unique_output_path(dir.path(), "mod_photo", "png", false);
        assert_eq!(path, dir.path().join("mod_photo_2.png"));
    }

    #[test]
    fn unique_path_with_overwrite_returns_plain_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mod_photo.png"), b"x").unwrap();

        let path = unique_output_path(dir.path(), "mod_photo", "png", true);
        assert_eq!(path, dir.path().join("mod_photo.png"));
    }

    #[test]
    fn collect_expands_directories_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.JPG");
        let skip = dir.path().join("notes.txt");
        for p in [&a, &b, &skip] {
            std::fs::write(p, b"x").unwrap();
        }

        let files =
            collect_image_files(&[dir.path().to_path_buf(), a.clone()]).unwrap();
        assert_eq!(files, vec![a, b]);
    }
}
