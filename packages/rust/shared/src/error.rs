//! Error types for Ragline.
//!
//! Library crates use [`RaglineError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Ragline operations.
#[derive(Debug, thiserror::Error)]
pub enum RaglineError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a provider or fetching a page.
    #[error("network error: {0}")]
    Network(String),

    /// Response decoding or markup parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Message sink / database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Completion or embedding provider returned an error or unusable output.
    #[error("generation error: {0}")]
    Generation(String),

    /// Query rephrasing produced no content. Fatal to the run.
    #[error("rephrase failed: {0}")]
    Rephrase(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (empty query, bad chunk size, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RaglineError>;

impl RaglineError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
