//! Crash reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_id::ProcessGuid;

/// A crash observed for one instance of an LRP.
///
/// Reports are informational and keyed by `process_guid`; receivers treat
/// duplicates as no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub process_guid: ProcessGuid,
    /// Pod name of the crashed instance.
    pub instance: String,
    pub index: u32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub exit_description: String,
    pub crash_count: i32,
    pub crash_timestamp: DateTime<Utc>,
}

impl CrashReport {
    /// Creates a minimal report for a process; remaining fields take neutral
    /// values.
    pub fn for_process(process_guid: ProcessGuid, crash_timestamp: DateTime<Utc>) -> Self {
        Self {
            process_guid,
            instance: String::new(),
            index: 0,
            reason: String::new(),
            exit_status: None,
            exit_description: String::new(),
            crash_count: 0,
            crash_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_id::LrpIdentifier;

    #[test]
    fn test_crash_report_json() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut report = CrashReport::for_process(LrpIdentifier::new("odin", "v1").process_guid(), ts);
        report.reason = "Error".to_string();
        report.exit_status = Some(1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["process_guid"], "odin-v1");
        assert_eq!(json["exit_status"], 1);
        assert_eq!(json["crash_timestamp"], "2024-05-01T10:00:00Z");

        let back: CrashReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
