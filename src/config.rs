use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::client::{ScanMode, DEFAULT_BACKEND_URL};
use crate::inventory::FailurePolicy;

/// Longest accepted poll interval (one day).
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

/// Client settings. Every field has a default, so a config file only needs
/// the keys it wants to change.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub backend_url: String,
    pub poll_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub scan_mode: ScanMode,
    pub external_api_key: Option<String>,
    pub on_poll_failure: FailurePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            poll_interval_secs: 3,
            request_timeout_ms: 10_000,
            scan_mode: ScanMode::Full,
            external_api_key: None,
            on_poll_failure: FailurePolicy::Clear,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend_url.trim().is_empty() {
            bail!("backend_url must not be empty");
        }
        if self.poll_interval_secs == 0 || self.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            bail!(
                "poll_interval_secs must be between 1 and {} (got {})",
                MAX_POLL_INTERVAL_SECS,
                self.poll_interval_secs
            );
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

/// Parse a JSON config document.
pub fn parse_config_str(s: &str) -> Result<ClientConfig> {
    let cfg: ClientConfig = serde_json::from_str(s).context("invalid config JSON")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load a JSON config file.
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
    parse_config_str(&content)
        .with_context(|| format!("in config file: {}", path.as_ref().display()))
}
