//! Metric messages forwarded to the telemetry pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metric names and units.
pub mod metric_names {
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
    pub const DISK: &str = "disk";
    pub const MEMORY_QUOTA: &str = "memory_quota";
    pub const DISK_QUOTA: &str = "disk_quota";

    pub const CPU_UNIT: &str = "percentage";
    pub const MEMORY_UNIT: &str = "bytes";
    pub const DISK_UNIT: &str = "bytes";
}

/// A single measured value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurement {
    pub magnitude: f64,
    #[serde(default)]
    pub unit: String,
}

impl Measurement {
    pub fn new(magnitude: f64, unit: impl Into<String>) -> Self {
        Self {
            magnitude,
            unit: unit.into(),
        }
    }
}

/// Metrics of one app instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricMessage {
    pub app_id: String,
    pub index_id: String,
    pub metrics: BTreeMap<String, Measurement>,
}

impl MetricMessage {
    pub fn new(app_id: impl Into<String>, index_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            index_id: index_id.into(),
            metrics: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metric(mut self, name: &str, measurement: Measurement) -> Self {
        self.metrics.insert(name.to_string(), measurement);
        self
    }
}

/// A batch of metric messages; ownership moves to the emitter on enqueue.
pub type MetricBatch = Vec<MetricMessage>;
