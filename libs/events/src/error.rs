//! Error types for message handling.

use thiserror::Error;

/// Errors that can occur when building or encoding messages.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// A route message has no routes on either side.
    #[error("route message for {instance_id} carries no routes")]
    EmptyRoutes { instance_id: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
