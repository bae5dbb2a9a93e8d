//! Error types for orchestrator access.

use thiserror::Error;

/// Errors raised while talking to the orchestrator.
#[derive(Debug, Error, Clone)]
pub enum ClusterError {
    /// A list/get call failed.
    #[error("orchestrator API error: {0}")]
    Api(String),

    /// A watch stream reported an error; the stream keeps retrying.
    #[error("watch error: {0}")]
    Watch(String),

    /// Client configuration could not be loaded.
    #[error("client configuration error: {0}")]
    Config(String),
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        ClusterError::Api(err.to_string())
    }
}

impl From<kube::runtime::watcher::Error> for ClusterError {
    fn from(err: kube::runtime::watcher::Error) -> Self {
        ClusterError::Watch(err.to_string())
    }
}
