//! LRP and instance records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tether_id::{LrpIdentifier, ProcessGuid};

use crate::metadata;
use crate::route::{parse_routes, Route, RouteError};

/// Health check kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthcheckType {
    #[default]
    Port,
    Http,
    Process,
}

/// Health check declared for an LRP.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Healthcheck {
    #[serde(rename = "type")]
    pub check_type: HealthcheckType,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub timeout_ms: u32,
}

/// Desired state of a long-running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lrp {
    pub identifier: LrpIdentifier,
    pub app_name: String,
    pub space_name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub target_instances: u32,
    pub memory_mb: u64,
    pub disk_mb: u64,
    #[serde(default)]
    pub health: Healthcheck,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Lrp {
    /// Returns the external-facing process key.
    pub fn process_guid(&self) -> ProcessGuid {
        self.identifier.process_guid()
    }

    /// Returns the routes stored in metadata.
    pub fn routes(&self) -> Result<Vec<Route>, RouteError> {
        match self.metadata.get(metadata::ROUTES) {
            Some(raw) => parse_routes(raw),
            None => Ok(Vec::new()),
        }
    }
}

/// Observed state of a single replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Starting,
    Running,
    Crashed,
    #[default]
    Unknown,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Crashed => "CRASHED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// A running replica of an LRP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub index: u32,
    pub state: InstanceState,
    /// Unix timestamp (nanoseconds) of the last state change.
    pub since: i64,
}
