//! Error types for identity parsing.

use thiserror::Error;

/// Errors that can occur when parsing identities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("identifier cannot be empty")]
    Empty,

    /// The pod name does not end with a numeric instance index.
    #[error("invalid instance name '{name}': {message}")]
    InvalidInstanceName { name: String, message: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
