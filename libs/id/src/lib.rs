//! # tether-id
//!
//! Identity types for desired long-running processes (LRPs) and the instances
//! the orchestrator runs for them.
//!
//! ## Identity Model
//!
//! - An LRP is identified by `{guid, version}`; both are assigned upstream
//! - The externally visible key is the process GUID: `{guid}-{version}`
//! - Each running replica is a pod named `{workload}-{index}`, so the instance
//!   index can always be recovered from the pod name
//!
//! Examples:
//! - `LrpIdentifier { guid: "odin", version: "v1" }` has process GUID `odin-v1`
//! - pod `odin-v1-3fa9-2` is instance index `2`

mod error;
mod types;

pub use error::IdError;
pub use types::*;
