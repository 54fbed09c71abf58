//! The request/response boundary with the remote scan backend.
//!
//! [`ScanBackend`] is the seam the submitter and the poller depend on;
//! [`HttpBackend`] speaks the backend's JSON API over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BackendError;
use crate::types::RawScanResult;

/// Where the backend listens when nothing else is configured.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// Scan depth selector sent with each job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Quick,
    #[default]
    Full,
}

impl ScanMode {
    /// Value of the `scan_type` field on the wire.
    pub fn wire_value(self) -> &'static str {
        match self {
            ScanMode::Quick => "1",
            ScanMode::Full => "2",
        }
    }
}

/// Job-creation request.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StartScanRequest {
    #[serde(rename = "subnet")]
    pub range: String,
    #[serde(rename = "scan_type")]
    pub mode: &'static str,
    #[serde(rename = "shodan_api_key")]
    pub external_api_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StartScanResponse {
    pub task_id: String,
}

/// Job status as classified from the backend's `status` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
    Unknown(String),
}

impl From<&str> for ScanStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => ScanStatus::Running,
            "completed" => ScanStatus::Completed,
            "failed" => ScanStatus::Failed,
            other => ScanStatus::Unknown(other.to_string()),
        }
    }
}

/// Status query response.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StatusResponse {
    pub status: String,
    /// Submission time in seconds since the Unix epoch.
    #[serde(rename = "timestamp", default)]
    pub submitted_at_epoch_secs: Option<f64>,
    #[serde(rename = "duration_seconds", default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub results: Option<Vec<RawScanResult>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn scan_status(&self) -> ScanStatus {
        ScanStatus::from(self.status.as_str())
    }
}

/// Remote service that executes scan jobs.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    async fn start_scan(&self, request: &StartScanRequest) -> Result<StartScanResponse, BackendError>;

    async fn scan_status(&self, task_id: &str) -> Result<StatusResponse, BackendError>;
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

/// [`ScanBackend`] over the backend's HTTP/JSON API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    base: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| BackendError::Transport(format!("invalid backend URL `{base_url}`: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Transport(format!(
                "invalid backend URL `{base_url}`: not a base URL"
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            base,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Transport(format!("invalid backend URL `{}`", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::Rejected {
            status: status.as_u16(),
            detail: error_detail(&body)
                .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16())),
        })
    }
}

/// Pull the `detail` field out of an error body. Non-string details (for example
/// a list of validation errors) are rendered as compact JSON.
fn error_detail(body: &str) -> Option<String> {
    let payload: ErrorPayload = serde_json::from_str(body).ok()?;
    match payload.detail? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ScanBackend for HttpBackend {
    async fn start_scan(&self, request: &StartScanRequest) -> Result<StartScanResponse, BackendError> {
        let url = self.endpoint(&["api", "scan", "start"])?;
        debug!(%url, range = %request.range, "POST start scan");
        let resp = self.client.post(url).json(request).send().await?;
        Self::decode(resp).await
    }

    async fn scan_status(&self, task_id: &str) -> Result<StatusResponse, BackendError> {
        let url = self.endpoint(&["api", "scan", "status", task_id])?;
        debug!(%url, "GET scan status");
        let resp = self.client.get(url).send().await?;
        Self::decode(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_uses_wire_names() {
        let req = StartScanRequest {
            range: "192.168.1.0/24".into(),
            mode: ScanMode::Full.wire_value(),
            external_api_key: None,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"subnet": "192.168.1.0/24", "scan_type": "2", "shodan_api_key": null})
        );
    }

    #[test]
    fn status_classification() {
        assert_eq!(ScanStatus::from("running"), ScanStatus::Running);
        assert_eq!(ScanStatus::from("completed"), ScanStatus::Completed);
        assert_eq!(ScanStatus::from("failed"), ScanStatus::Failed);
        assert_eq!(ScanStatus::from("queued"), ScanStatus::Unknown("queued".into()));
    }

    #[test]
    fn completed_status_decodes() {
        let json = r#"{
            "status": "completed",
            "timestamp": 1700000000.5,
            "duration_seconds": 12.25,
            "results": [{"ip": "10.0.0.1", "mac": "aa:bb:cc:dd:ee:ff", "vendor": "Unknown", "risk": "Low", "port_count": 0, "ot_services": []}]
        }"#;
        let s: StatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(s.scan_status(), ScanStatus::Completed);
        assert_eq!(s.duration_secs, Some(12.25));
        assert_eq!(s.results.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn task_id_is_a_single_escaped_segment() {
        let backend = HttpBackend::new("http://127.0.0.1:8000/", Duration::from_secs(1)).unwrap();
        let url = backend.endpoint(&["api", "scan", "status", "a/b?c#d"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/api/scan/status/a%2Fb%3Fc%23d");

        let prefixed = HttpBackend::new("http://scanner:8000/ot/", Duration::from_secs(1)).unwrap();
        let url = prefixed.endpoint(&["api", "scan", "start"]).unwrap();
        assert_eq!(url.as_str(), "http://scanner:8000/ot/api/scan/start");
    }

    #[test]
    fn malformed_base_url_rejected() {
        assert!(HttpBackend::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpBackend::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn error_detail_extraction() {
        assert_eq!(error_detail(r#"{"detail": "Task not found"}"#).as_deref(), Some("Task not found"));
        assert_eq!(
            error_detail(r#"{"detail": [{"msg": "field required"}]}"#).as_deref(),
            Some(r#"[{"msg":"field required"}]"#)
        );
        assert_eq!(error_detail("<html>bad gateway</html>"), None);
        assert_eq!(error_detail(r#"{"message": "nope"}"#), None);
    }
}
