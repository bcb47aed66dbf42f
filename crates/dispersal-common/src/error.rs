//! Error types for Dispersal
//!
//! This module defines the common error types used throughout the system.

use derive_more::Display;
use thiserror::Error;

/// Common result type for Dispersal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Dispersal
#[derive(Debug, Error)]
pub enum Error {
    // Build-time errors
    #[error("invalid topology spec: {0}")]
    InvalidSpec(String),

    // Placement errors
    #[error("no capacity left in domain {domain}")]
    NoCapacity { domain: String },

    #[error("insufficient distinct targets in domain {domain}: have {available}, need {required}")]
    InsufficientTargets {
        domain: String,
        available: usize,
        required: usize,
    },

    #[error("draw underflow in domain {domain}: value {value} not absorbed by any bucket")]
    DrawUnderflow { domain: String, value: u64 },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of an [`Error`], used for logging and exit codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ErrorKind {
    #[display("invalid_spec")]
    InvalidSpec,
    #[display("no_capacity")]
    NoCapacity,
    #[display("draw_underflow")]
    DrawUnderflow,
    #[display("other")]
    Other,
}

impl Error {
    /// Create an invalid spec error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a no capacity error for a domain
    pub fn no_capacity(domain: impl Into<String>) -> Self {
        Self::NoCapacity {
            domain: domain.into(),
        }
    }

    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSpec(_) => ErrorKind::InvalidSpec,
            Self::NoCapacity { .. } | Self::InsufficientTargets { .. } => ErrorKind::NoCapacity,
            Self::DrawUnderflow { .. } => ErrorKind::DrawUnderflow,
            Self::InvalidIdentifier(_)
            | Self::Configuration(_)
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Other,
        }
    }

    /// Check if placement failed for lack of capacity
    #[must_use]
    pub const fn is_no_capacity(&self) -> bool {
        matches!(self.kind(), ErrorKind::NoCapacity)
    }

    /// Check if the caller may retry, e.g. with a re-derived identifier
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_no_capacity()
    }

    /// Check if this error means the placement map is internally inconsistent
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::DrawUnderflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::no_capacity("Rack1").is_retryable());
        assert!(
            Error::InsufficientTargets {
                domain: "Server1-1".into(),
                available: 2,
                required: 3
            }
            .is_retryable()
        );
        assert!(!Error::invalid_spec("bad").is_retryable());
        assert!(
            !Error::DrawUnderflow {
                domain: "root".into(),
                value: 7
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::invalid_spec("x").kind(), ErrorKind::InvalidSpec);
        assert_eq!(Error::no_capacity("x").kind(), ErrorKind::NoCapacity);
        assert_eq!(Error::invalid_identifier("x").kind(), ErrorKind::Other);
        assert_eq!(ErrorKind::NoCapacity.to_string(), "no_capacity");
    }

    #[test]
    fn test_invariant_violation() {
        let err = Error::DrawUnderflow {
            domain: "Rack2".into(),
            value: 99,
        };
        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("Rack2"));
        assert!(!Error::no_capacity("Rack2").is_invariant_violation());
    }
}
