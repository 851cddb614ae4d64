//! Error types
//!
//! Resolution rejections and range outcomes are plain values, not errors.
//! Only configuration problems and filesystem failures end up here.

use thiserror::Error;

/// Errors raised by the in-memory filesystem
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("illegal operation on a directory: {0}")]
    IsDirectory(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),
}

/// Top-level error type
#[derive(Debug, Error)]
pub enum DevServeError {
    /// Fatal configuration problem, raised before serving starts
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DevServeError>;
