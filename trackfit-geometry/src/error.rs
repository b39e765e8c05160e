//! Geometry and readout error types.

use thiserror::Error;

/// Result type for geometry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Geometry, readout-schema and configuration errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed bit-field descriptor.
    #[error("invalid bit-field schema: {0}")]
    InvalidSchema(String),

    /// Field name not present in the schema.
    #[error("unknown bit-field: {0}")]
    UnknownField(String),

    /// Value does not fit the field width.
    #[error("value {value} out of range for field {field}")]
    ValueOutOfRange {
        /// Field name.
        field: String,
        /// Offending value.
        value: i64,
    },

    /// System code not served by any readout.
    #[error("no readout for system {0}")]
    UnknownSystem(i64),

    /// Volume nesting deeper than the traversal cap.
    #[error("volume hierarchy exceeds maximum depth {max_depth}")]
    DepthExceeded {
        /// Configured depth cap.
        max_depth: usize,
    },

    /// A volume contains itself.
    #[error("cyclic volume containment at {0}")]
    CyclicContainment(String),

    /// Invalid geometry configuration.
    #[error("invalid geometry configuration: {0}")]
    InvalidConfig(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] trackfit_core::Error),
}
