use std::sync::Arc;

use tracing::{info, warn};

use crate::client::{ScanBackend, ScanMode, StartScanRequest};
use crate::error::SubmitError;
use crate::netrange;

/// Validates range expressions and creates scan jobs on the backend.
///
/// Submission never starts polling; hand the returned task id to
/// [`crate::scheduler::PollingScheduler::begin`] when the caller wants to follow it.
pub struct TaskSubmitter {
    backend: Arc<dyn ScanBackend>,
    mode: ScanMode,
    external_api_key: Option<String>,
}

impl TaskSubmitter {
    pub fn new(backend: Arc<dyn ScanBackend>) -> Self {
        Self {
            backend,
            mode: ScanMode::Full,
            external_api_key: None,
        }
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_external_api_key(mut self, key: Option<String>) -> Self {
        self.external_api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Submit one scan job for `range_spec` and return the backend's task id.
    pub async fn submit(&self, range_spec: &str) -> Result<String, SubmitError> {
        let range = netrange::parse_range(range_spec)?;
        let request = StartScanRequest {
            range: range_spec.trim().to_string(),
            mode: self.mode.wire_value(),
            external_api_key: self.external_api_key.clone(),
        };

        match self.backend.start_scan(&request).await {
            Ok(resp) => {
                info!(task_id = %resp.task_id, %range, hosts = range.host_count(), "scan submitted");
                Ok(resp.task_id)
            }
            Err(e) => {
                warn!(%range, error = %e, "scan submission failed");
                Err(SubmitError::Submission(e.detail().to_string()))
            }
        }
    }
}
