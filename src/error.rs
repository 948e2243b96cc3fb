//! Error types for the index.

use thiserror::Error;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during index operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during file open, growth, mapping, or metadata access.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller passed a vector whose length does not match the index dimension.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
