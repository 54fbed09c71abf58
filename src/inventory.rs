use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::normalize::normalize;
use crate::scheduler::PollEvent;
use crate::summary::aggregate;
use crate::types::{Device, ScanSummary};

/// What happens to the current inventory when polling a new scan fails.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Drop the devices of the previous scan.
    #[default]
    Clear,
    /// Keep showing the last successful scan.
    Retain,
}

/// Devices of the most recent completed scan. Always replaced as a whole.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    devices: Vec<Device>,
    last_scan_time: Option<OffsetDateTime>,
    on_failure: FailurePolicy,
}

impl Inventory {
    pub fn new(on_failure: FailurePolicy) -> Self {
        Self {
            on_failure,
            ..Default::default()
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn last_scan_time(&self) -> Option<OffsetDateTime> {
        self.last_scan_time
    }

    pub fn replace(&mut self, devices: Vec<Device>, scanned_at: OffsetDateTime) {
        self.devices = devices;
        self.last_scan_time = Some(scanned_at);
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.last_scan_time = None;
    }

    /// Fold a poll event into the inventory. Returns whether the inventory changed.
    pub fn apply(&mut self, event: &PollEvent) -> bool {
        match event {
            PollEvent::Progress { .. } => false,
            PollEvent::Completed { results, .. } => {
                self.replace(normalize(results), OffsetDateTime::now_utc());
                true
            }
            PollEvent::Failed { task_id, .. } => match self.on_failure {
                FailurePolicy::Clear => {
                    debug!(%task_id, "clearing inventory after failed scan");
                    self.clear();
                    true
                }
                FailurePolicy::Retain => false,
            },
        }
    }

    pub fn summary(&self) -> ScanSummary {
        aggregate(&self.devices, self.last_scan_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PollError;
    use crate::types::{RawScanResult, RiskLevel};

    fn completed(addresses: &[&str]) -> PollEvent {
        PollEvent::Completed {
            task_id: "t1".into(),
            results: addresses
                .iter()
                .map(|a| RawScanResult {
                    address: a.to_string(),
                    hardware_id: None,
                    vendor: "Unknown".into(),
                    risk_level: RiskLevel::Low,
                    services: vec![],
                })
                .collect(),
            duration_secs: 1.0,
        }
    }

    fn failed() -> PollEvent {
        PollEvent::Failed {
            task_id: "t2".into(),
            error: PollError::Query("Network Error".into()),
        }
    }

    #[test]
    fn completion_replaces_everything() {
        let mut inv = Inventory::default();
        assert!(inv.apply(&completed(&["10.0.0.1", "10.0.0.2"])));
        assert!(inv.apply(&completed(&["10.0.0.9"])));
        assert_eq!(inv.devices().len(), 1);
        assert_eq!(inv.devices()[0].id, "10.0.0.9");
        assert!(inv.last_scan_time().is_some());
        assert_eq!(inv.summary().total_devices, 1);
    }

    #[test]
    fn progress_changes_nothing() {
        let mut inv = Inventory::default();
        inv.apply(&completed(&["10.0.0.1"]));
        let ev = PollEvent::Progress {
            task_id: "t1".into(),
            elapsed_secs: 3.0,
        };
        assert!(!inv.apply(&ev));
        assert_eq!(inv.devices().len(), 1);
    }

    #[test]
    fn failure_clears_by_default() {
        let mut inv = Inventory::new(FailurePolicy::Clear);
        inv.apply(&completed(&["10.0.0.1"]));
        assert!(inv.apply(&failed()));
        assert!(inv.devices().is_empty());
        assert_eq!(inv.summary().last_scan_time, None);
    }

    #[test]
    fn failure_can_retain_previous_scan() {
        let mut inv = Inventory::new(FailurePolicy::Retain);
        inv.apply(&completed(&["10.0.0.1"]));
        assert!(!inv.apply(&failed()));
        assert_eq!(inv.devices().len(), 1);
    }
}
