//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Malformed JSON record.
    #[error("line {line}: {source}")]
    JsonError {
        /// One-based line number in the event file.
        line: usize,
        /// Parser error.
        source: serde_json::Error,
    },

    /// Serialization failure while writing.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] trackfit_core::Error),

    /// Geometry error.
    #[error("geometry error: {0}")]
    GeometryError(#[from] trackfit_geometry::Error),
}
