//! LRP and instance identity types.

use serde::{Deserialize, Serialize};

use crate::IdError;

// =============================================================================
// LRP Identifier
// =============================================================================

/// Stable identity of a desired long-running process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LrpIdentifier {
    pub guid: String,
    pub version: String,
}

impl LrpIdentifier {
    /// Creates a new identifier.
    pub fn new(guid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            version: version.into(),
        }
    }

    /// Returns the external-facing process key, `{guid}-{version}`.
    #[must_use]
    pub fn process_guid(&self) -> ProcessGuid {
        ProcessGuid(format!("{}-{}", self.guid, self.version))
    }
}

impl std::fmt::Display for LrpIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.guid, self.version)
    }
}

// =============================================================================
// Process GUID
// =============================================================================

/// External-facing process key derived from an [`LrpIdentifier`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessGuid(String);

impl ProcessGuid {
    /// Returns the process GUID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProcessGuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&LrpIdentifier> for ProcessGuid {
    fn from(id: &LrpIdentifier) -> Self {
        id.process_guid()
    }
}

// =============================================================================
// Instance Names
// =============================================================================

/// Extracts the instance index from a pod name of the form `{workload}-{index}`.
pub fn instance_index(pod_name: &str) -> Result<u32, IdError> {
    if pod_name.is_empty() {
        return Err(IdError::Empty);
    }

    let Some((_, suffix)) = pod_name.rsplit_once('-') else {
        return Err(IdError::InvalidInstanceName {
            name: pod_name.to_string(),
            message: "no index suffix".to_string(),
        });
    };

    suffix
        .parse::<u32>()
        .map_err(|e| IdError::InvalidInstanceName {
            name: pod_name.to_string(),
            message: e.to_string(),
        })
}

/// Builds the pod name for an instance index of a workload.
#[must_use]
pub fn instance_name(workload: &str, index: u32) -> String {
    format!("{workload}-{index}")
}

// =============================================================================
// Tests
// =============================================================================
