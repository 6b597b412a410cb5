//! Error types for subscription creation
//!
//! Creation is the only fallible operation; everything after it degrades
//! gracefully instead of failing.

use thiserror::Error;

/// Why the native source refused to create a stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreationFailure {
    #[error("no paths to watch")]
    NoPaths,

    #[error("empty path in watch list")]
    EmptyPath,

    #[error("cannot watch {path}: path does not exist or is not accessible")]
    InvalidPath { path: String },

    #[error("native source rejected the stream: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create subscription: {0}")]
    CreationFailed(#[from] CreationFailure),
}

/// Result type for watcher operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
