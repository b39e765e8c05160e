//! Error types for trackfit-core.

use crate::Identifier;
use thiserror::Error;

/// Result type alias for trackfit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy shared by seeding, propagation and fitting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Registry miss.
    #[error("no surface registered for identifier {0}")]
    NotFound(Identifier),

    /// A different surface is already registered under this identifier.
    #[error("identifier {0} is already registered to a different surface")]
    DuplicateIdentifier(Identifier),

    /// Seed points do not define a helix.
    #[error("degenerate seed: {0}")]
    DegenerateSeed(String),

    /// The trajectory does not reach the requested surface.
    #[error("no intersection with target surface after {path_length:.3} mm")]
    NoIntersection {
        /// Path length travelled before giving up.
        path_length: f64,
    },

    /// Measurement uncertainty is not a finite positive number.
    #[error("invalid measurement uncertainty: ({sigma1}, {sigma2})")]
    InvalidUncertainty {
        /// Uncertainty on the first local coordinate.
        sigma1: f64,
        /// Uncertainty on the second local coordinate.
        sigma2: f64,
    },

    /// Propagation loop hit its step budget.
    #[error("propagation exceeded {max_steps} steps")]
    PropagationLimitExceeded {
        /// Configured step budget.
        max_steps: usize,
    },

    /// Covariance became non-finite or lost positive semi-definiteness.
    #[error("numerical divergence: {0}")]
    NumericalDivergence(String),

    /// Energy loss consumed the particle's kinetic energy.
    #[error("particle stopped in material at {path_length:.3} mm")]
    ParticleStopped {
        /// Path length at which the particle ranged out.
        path_length: f64,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Returns true for failures that only cut a propagation short.
    ///
    /// These truncate a step sequence or a forward pass; every other
    /// variant aborts the caller.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            Error::NoIntersection { .. }
                | Error::PropagationLimitExceeded { .. }
                | Error::ParticleStopped { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_classification() {
        assert!(Error::NoIntersection { path_length: 1.0 }.is_truncation());
        assert!(Error::PropagationLimitExceeded { max_steps: 10 }.is_truncation());
        assert!(!Error::NumericalDivergence("nan".into()).is_truncation());
        assert!(!Error::NotFound(Identifier::new(7)).is_truncation());
    }

    #[test]
    fn test_display_mentions_identifier() {
        let err = Error::DuplicateIdentifier(Identifier::new(0x100));
        assert!(err.to_string().contains("0x100"));
    }
}
