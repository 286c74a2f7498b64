//! Error types for photovar operations

use std::path::Path;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, PhotovarError>;

/// Errors that can occur during batch augmentation or remote generation
#[derive(thiserror::Error, Debug)]
pub enum PhotovarError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding failed
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Network or remote-server communication failed
    #[error("Network error: {0}")]
    Network(String),

    /// An awaited remote result did not arrive in time
    #[error("Timed out after {seconds}s waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: String,
        /// How long we waited
        seconds: u64,
    },

    /// File-system precondition failed (missing input, unwritable output)
    #[error("File system error: {0}")]
    FileSystem(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PhotovarError {
    /// Create an invalid configuration error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network(message.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(what: S, seconds: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            seconds,
        }
    }

    /// Create a file system error
    pub fn filesystem<S: Into<String>>(message: S) -> Self {
        Self::FileSystem(message.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration error for an out-of-range parameter value
    pub fn config_value_error<V: std::fmt::Display>(
        parameter: &str,
        value: V,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "{parameter} value {value} is out of range (valid: {valid_range})"
        ))
    }

    /// Create a contextual error for a failed file operation
    pub fn file_io_error(operation: &str, path: &Path, source: &std::io::Error) -> Self {
        Self::FileSystem(format!(
            "Failed to {operation} '{}': {source}",
            path.display()
        ))
    }

    /// True for failures that should skip the current item and let the rest
    /// of the batch continue; false for errors that abort the whole run.
    #[must_use]
    pub fn is_task_level(&self) -> bool {
        matches!(
            self,
            Self::Image(_) | Self::Network(_) | Self::Timeout { .. } | Self::FileSystem(_)
        )
    }
}
