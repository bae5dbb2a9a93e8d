//! # tether-lrp
//!
//! The desired-state model for long-running processes and the contract of the
//! component that materializes them as orchestrator resources.
//!
//! - [`Lrp`]: what should run (image, command, instance count, routes in metadata)
//! - [`Instance`]: what the orchestrator reports as running
//! - [`Route`]: a hostname/port pair carried in LRP metadata
//! - [`Desirer`]: lifecycle operations over LRPs; their effects are observed
//!   asynchronously by the informers and the route collector

mod desirer;
mod model;
mod route;

pub use desirer::{Desirer, DesirerError};
pub use model::*;
pub use route::{parse_routes, serialize_routes, Route, RouteError};

pub use tether_id::{LrpIdentifier, ProcessGuid};

/// Well-known LRP metadata keys.
pub mod metadata {
    /// Process GUID of the LRP.
    pub const PROCESS_GUID: &str = "process_guid";

    /// JSON list of `{"hostname", "port"}` routes.
    pub const ROUTES: &str = "routes";
}
