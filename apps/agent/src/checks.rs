use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Definition of one monitored endpoint, owned by the check store.
///
/// Wire field names match the control-plane JSON produced by the
/// operator tooling, hence the explicit renames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "URL")]
    pub url: String,

    /// Seconds between probe firings. Always > 0.
    #[serde(rename = "IntervalSeconds")]
    pub interval_seconds: u64,

    /// Per-probe deadline in seconds. Always > 0.
    #[serde(rename = "HTTPTimeoutSeconds")]
    pub http_timeout_seconds: u64,

    /// Regions this check is assigned to. A worker only schedules
    /// checks listing its own region.
    #[serde(rename = "Regions", default)]
    pub regions: Vec<String>,

    #[serde(rename = "ModifiedAt")]
    pub modified_at: DateTime<Utc>,

    /// Monotonic version counter, informational only.
    #[serde(rename = "Serial", default)]
    pub serial: u64,

    #[serde(rename = "Active")]
    pub active: bool,
}

impl CheckDefinition {
    pub fn assigned_to(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r == region)
    }
}

/// Outcome of a single probe attempt. Produced exactly once per firing
/// and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub region: String,
    pub check_id: String,

    /// Probe start time, UTC.
    pub timestamp: DateTime<Utc>,

    /// HTTP status code, or 0 if the probe never got a response.
    pub response_code: u16,

    /// Status text ("200 OK") or the error description.
    pub response_info: String,

    /// Time to first response byte, measured from probe start.
    pub firstbyte_ms: i64,
    pub dns_ms: i64,
    pub tls_ms: i64,
    pub connect_ms: i64,
}

impl CheckResult {
    /// Result for a probe that failed before any response arrived.
    pub fn failed(region: String, check_id: String, timestamp: DateTime<Utc>, info: String) -> Self {
        Self {
            region,
            check_id,
            timestamp,
            response_code: 0,
            response_info: info,
            firstbyte_ms: 0,
            dns_ms: 0,
            tls_ms: 0,
            connect_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_round_trips_control_plane_field_names() {
        let raw = r#"{
            "ID": "check-a",
            "URL": "https://example.com/",
            "IntervalSeconds": 60,
            "HTTPTimeoutSeconds": 15,
            "Regions": ["us-east-1", "eu-west-1"],
            "ModifiedAt": "2024-05-01T12:00:00Z",
            "Serial": 3,
            "Active": true
        }"#;

        let def: CheckDefinition = serde_json::from_str(raw).unwrap();
        assert_eq!(def.id, "check-a");
        assert_eq!(def.interval_seconds, 60);
        assert_eq!(def.http_timeout_seconds, 15);
        assert!(def.assigned_to("eu-west-1"));
        assert!(!def.assigned_to("ap-south-1"));

        let encoded = serde_json::to_value(&def).unwrap();
        assert_eq!(encoded["HTTPTimeoutSeconds"], 15);
        assert_eq!(encoded["Active"], true);
    }

    #[test]
    fn failed_result_has_zero_code_and_timings() {
        let result = CheckResult::failed(
            "us-east-1".into(),
            "check-a".into(),
            Utc::now(),
            "dns lookup failed: no addresses".into(),
        );
        assert_eq!(result.response_code, 0);
        assert!(!result.response_info.is_empty());
        assert_eq!(result.firstbyte_ms, 0);
        assert_eq!(result.dns_ms, 0);
    }
}
