//! Error types for reference parsing and resolution
//!
//! Everything in this crate fails with [`CoreError`]; the authorization
//! crate wraps it in its own error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for reference handling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Empty reference string provided
    #[error("Reference cannot be empty")]
    EmptyReference,

    /// A wiki, space or document name is empty
    #[error("Empty {0} segment in reference")]
    EmptySegment(&'static str),

    /// Malformed reference
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Reference does not denote the expected kind of entity
    #[error("Unexpected entity type: expected {expected}, got {actual}")]
    UnexpectedType {
        expected: &'static str,
        actual: String,
    },
}

impl CoreError {
    /// Create an invalid reference error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        CoreError::InvalidReference(msg.into())
    }

    /// Create an unexpected type error
    pub fn unexpected_type<S: Into<String>>(expected: &'static str, actual: S) -> Self {
        CoreError::UnexpectedType {
            expected,
            actual: actual.into(),
        }
    }
}
