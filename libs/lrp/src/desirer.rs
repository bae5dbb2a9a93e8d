//! The desirer contract.

use async_trait::async_trait;
use tether_id::LrpIdentifier;
use thiserror::Error;

use crate::model::{Instance, Lrp};

/// Errors returned by desirer operations.
#[derive(Debug, Error)]
pub enum DesirerError {
    /// The LRP (or instance) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The LRP already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The instance index is out of range.
    #[error("instance index {index} out of range for {process_guid}")]
    InvalidIndex { process_guid: String, index: u32 },

    /// The orchestrator rejected or failed the call.
    #[error("orchestrator error: {0}")]
    Orchestrator(String),
}

/// Lifecycle operations over desired LRPs.
///
/// Mutating calls return once the orchestrator accepted the change; instance
/// convergence is observed later by informers and the route collector.
#[async_trait]
pub trait Desirer: Send + Sync {
    /// Materializes a new LRP.
    async fn desire(&self, lrp: &Lrp) -> Result<(), DesirerError>;

    /// Updates instance count and metadata (routes) of an existing LRP.
    async fn update(&self, lrp: &Lrp) -> Result<(), DesirerError>;

    /// Removes an LRP and all of its instances.
    async fn stop(&self, identifier: &LrpIdentifier) -> Result<(), DesirerError>;

    /// Stops a single instance; the orchestrator is expected to replace it.
    async fn stop_instance(&self, identifier: &LrpIdentifier, index: u32)
        -> Result<(), DesirerError>;

    /// Lists all desired LRPs.
    async fn list(&self) -> Result<Vec<Lrp>, DesirerError>;

    /// Returns one LRP.
    async fn get(&self, identifier: &LrpIdentifier) -> Result<Lrp, DesirerError>;

    /// Returns the observed instances of one LRP.
    async fn get_instances(&self, identifier: &LrpIdentifier)
        -> Result<Vec<Instance>, DesirerError>;
}
