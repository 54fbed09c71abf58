use std::collections::HashSet;

use time::OffsetDateTime;

use crate::types::{Device, RiskLevel, ScanSummary};

/// Reduce an inventory to its summary statistics.
///
/// A device counts as an anomaly when its risk is above [`RiskLevel::Low`].
/// `protocols_used` lists each primary protocol once, in first-seen order.
pub fn aggregate(devices: &[Device], last_scan_time: Option<OffsetDateTime>) -> ScanSummary {
    let mut seen = HashSet::new();
    let mut protocols_used = Vec::new();
    for d in devices {
        if seen.insert(d.primary_protocol.as_str()) {
            protocols_used.push(d.primary_protocol.clone());
        }
    }

    ScanSummary {
        total_devices: devices.len(),
        anomalies_detected: devices
            .iter()
            .filter(|d| d.risk_level != RiskLevel::Low)
            .count(),
        protocols_used,
        last_scan_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::types::{RawScanResult, Service};

    fn device(address: &str, risk: RiskLevel, protocol: Option<&str>) -> Device {
        let services = protocol
            .map(|p| vec![Service::new(1, p)])
            .unwrap_or_default();
        normalize(&[RawScanResult {
            address: address.into(),
            hardware_id: None,
            vendor: "Unknown".into(),
            risk_level: risk,
            services,
        }])
        .remove(0)
    }

    #[test]
    fn empty_inventory() {
        let s = aggregate(&[], None);
        assert_eq!(s.total_devices, 0);
        assert_eq!(s.anomalies_detected, 0);
        assert!(s.protocols_used.is_empty());
        assert_eq!(s.security_score(), 100);
    }

    #[test]
    fn counts_anomalies_and_keeps_first_seen_protocol_order() {
        let devices = vec![
            device("10.0.0.1", RiskLevel::Low, Some("modbus")),
            device("10.0.0.2", RiskLevel::High, Some("dnp3")),
            device("10.0.0.3", RiskLevel::Medium, Some("modbus")),
            device("10.0.0.4", RiskLevel::Critical, None),
            device("10.0.0.5", RiskLevel::Low, Some("bacnet")),
        ];
        let at = OffsetDateTime::UNIX_EPOCH;
        let s = aggregate(&devices, Some(at));
        assert_eq!(s.total_devices, 5);
        assert_eq!(s.anomalies_detected, 3);
        assert_eq!(s.protocols_used, vec!["modbus", "dnp3", "None Detected", "bacnet"]);
        assert_eq!(s.last_scan_time, Some(at));
        assert_eq!(s.security_score(), 40);
    }
}
