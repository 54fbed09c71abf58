use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use tracing::warn;

/// Vendor label the backend reports when the OUI lookup found nothing.
pub const UNKNOWN_VENDOR: &str = "Unknown";

/// Primary protocol of a device with no detected services.
pub const NO_PROTOCOL: &str = "None Detected";

/// Lifecycle of one remote scan job as seen by the poller.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Idle => "idle",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.pad(s)
    }
}

/// One in-flight or finished scan job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub id: String,
    pub state: TaskState,
    /// When polling of this task started. Only used for elapsed time when the
    /// backend does not report its own start timestamp.
    pub submitted_at: OffsetDateTime,
}

impl ScanTask {
    /// A task whose id was just accepted for polling, stamped with the current time.
    pub fn starting(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: TaskState::Starting,
            submitted_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Ordered risk category attached to a discovered host.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(try_from = "String")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

impl TryFrom<String> for RiskLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A (port, protocol) pair as reported by the backend, e.g. `[502, "modbus"]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "(u16, String)", into = "(u16, String)")]
pub struct Service {
    pub port: u16,
    pub protocol: String,
}

impl Service {
    pub fn new(port: u16, protocol: impl Into<String>) -> Self {
        Self {
            port,
            protocol: protocol.into(),
        }
    }
}

impl From<(u16, String)> for Service {
    fn from((port, protocol): (u16, String)) -> Self {
        Self { port, protocol }
    }
}

impl From<Service> for (u16, String) {
    fn from(s: Service) -> Self {
        (s.port, s.protocol)
    }
}

fn unknown_vendor() -> String {
    UNKNOWN_VENDOR.to_string()
}

fn vendor_or_unknown<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(unknown_vendor))
}

/// `null` and unrecognised labels decode as [`RiskLevel::Low`].
fn lenient_risk<'de, D: Deserializer<'de>>(d: D) -> Result<RiskLevel, D::Error> {
    let Some(label) = Option::<String>::deserialize(d)? else {
        return Ok(RiskLevel::Low);
    };
    Ok(label.parse().unwrap_or_else(|e| {
        warn!(%label, error = %e, "unrecognised risk label, treating as Low");
        RiskLevel::Low
    }))
}

fn services_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Service>, D::Error> {
    Ok(Option::<Vec<Service>>::deserialize(d)?.unwrap_or_default())
}

/// One host record as returned by the scan backend.
///
/// Optional fields that are missing or `null` take their sentinel value, so one
/// sloppy record never fails the whole status response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RawScanResult {
    #[serde(rename = "ip")]
    pub address: String,
    #[serde(rename = "mac", default)]
    pub hardware_id: Option<String>,
    #[serde(default = "unknown_vendor", deserialize_with = "vendor_or_unknown")]
    pub vendor: String,
    #[serde(rename = "risk", default, deserialize_with = "lenient_risk")]
    pub risk_level: RiskLevel,
    #[serde(rename = "ot_services", default, deserialize_with = "services_or_empty")]
    pub services: Vec<Service>,
}

/// Normalized inventory entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub address: String,
    pub hardware_id: Option<String>,
    pub vendor: String,
    pub risk_level: RiskLevel,
    pub display_name: String,
    pub primary_protocol: String,
    pub open_ports: Vec<u16>,
}

/// Aggregate statistics derived from an inventory.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub total_devices: usize,
    pub anomalies_detected: usize,
    pub protocols_used: Vec<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_scan_time: Option<OffsetDateTime>,
}

impl ScanSummary {
    /// Share of devices without anomalies, as a rounded percentage.
    /// An empty inventory scores 100.
    pub fn security_score(&self) -> u8 {
        if self.total_devices == 0 {
            return 100;
        }
        let healthy = self.total_devices.saturating_sub(self.anomalies_detected) as f64;
        (healthy * 100.0 / self.total_devices as f64).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_result_decodes_backend_shape() {
        let json = r#"{
            "ip": "10.0.0.5",
            "mac": "00:1b:44:11:3a:b7",
            "vendor": "Acme",
            "risk": "High",
            "port_count": 2,
            "ot_services": [[502, "modbus"], [80, "http"]]
        }"#;
        let raw: RawScanResult = serde_json::from_str(json).unwrap();
        assert_eq!(raw.address, "10.0.0.5");
        assert_eq!(raw.hardware_id.as_deref(), Some("00:1b:44:11:3a:b7"));
        assert_eq!(raw.risk_level, RiskLevel::High);
        assert_eq!(
            raw.services,
            vec![Service::new(502, "modbus"), Service::new(80, "http")]
        );
    }

    #[test]
    fn missing_optional_fields_fall_back() {
        let raw: RawScanResult = serde_json::from_str(r#"{"ip": "10.0.0.1"}"#).unwrap();
        assert_eq!(raw.vendor, UNKNOWN_VENDOR);
        assert_eq!(raw.hardware_id, None);
        assert_eq!(raw.risk_level, RiskLevel::Low);
        assert!(raw.services.is_empty());
    }

    #[test]
    fn null_optional_fields_fall_back() {
        let json = r#"{"ip": "10.0.0.2", "mac": null, "vendor": null, "risk": null, "ot_services": null}"#;
        let raw: RawScanResult = serde_json::from_str(json).unwrap();
        assert_eq!(raw.vendor, UNKNOWN_VENDOR);
        assert_eq!(raw.hardware_id, None);
        assert_eq!(raw.risk_level, RiskLevel::Low);
        assert!(raw.services.is_empty());
    }

    #[test]
    fn unrecognised_risk_label_reads_as_low() {
        let raw: RawScanResult =
            serde_json::from_str(r#"{"ip": "10.0.0.3", "risk": "Info"}"#).unwrap();
        assert_eq!(raw.risk_level, RiskLevel::Low);
        let raw: RawScanResult =
            serde_json::from_str(r#"{"ip": "10.0.0.3", "risk": "CRITICAL"}"#).unwrap();
        assert_eq!(raw.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn one_sloppy_host_keeps_the_rest_of_the_scan() {
        let json = r#"{
            "status": "completed",
            "results": [
                {"ip": "10.0.0.1", "vendor": null, "risk": "Info", "ot_services": null},
                {"ip": "10.0.0.5", "vendor": "Acme", "risk": "High", "ot_services": [[502, "modbus"]]}
            ]
        }"#;
        let status: crate::client::StatusResponse = serde_json::from_str(json).unwrap();
        let results = status.results.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].vendor, UNKNOWN_VENDOR);
        assert_eq!(results[1].risk_level, RiskLevel::High);
    }

    #[test]
    fn risk_levels_are_ordered_and_case_insensitive() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        let r: RiskLevel = serde_json::from_str(r#""critical""#).unwrap();
        assert_eq!(r, RiskLevel::Critical);
        assert!(serde_json::from_str::<RiskLevel>(r#""severe""#).is_err());
        assert_eq!(serde_json::to_string(&RiskLevel::Medium).unwrap(), r#""Medium""#);
    }

    #[test]
    fn security_score_rounds() {
        let summary = ScanSummary {
            total_devices: 3,
            anomalies_detected: 1,
            ..Default::default()
        };
        assert_eq!(summary.security_score(), 67);
        assert_eq!(ScanSummary::default().security_score(), 100);
    }
}
