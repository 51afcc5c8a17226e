//! Worker Configuration
//!
//! Two layers: process-level `Settings` read from the environment once at
//! startup, and `RuntimeConfig` fetched from the control plane before each
//! run so operators can retune limits and policies without restarting the
//! worker. A control plane outage degrades to safe defaults.

use crate::presidio::AnonymizationOperator;
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Request timeout for control-plane calls
const CONTROL_PLANE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound for accepted uploads (10 MiB)
const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Process-level settings, read from the environment once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    /// Upload folder to watch
    pub watch_dir: PathBuf,
    /// Base URL of the control-plane API (config, targets, runs, logs)
    pub control_plane_url: String,
    /// Entity-detection analyzer base URL
    pub analyzer_url: String,
    /// Text anonymizer base URL
    pub anonymizer_url: String,
    /// Legacy single-target delivery URL, used only when no enabled
    /// delivery targets are configured
    pub legacy_delivery_url: Option<String>,
    /// Full `Authorization` header value for the legacy target
    pub legacy_delivery_auth_header: Option<String>,
    /// Host substituted for loopback addresses in target URLs. Inside a
    /// container, localhost resolves to the worker itself rather than the
    /// machine the operator meant.
    pub host_alias: String,
    /// Seconds between worker heartbeat audit events
    pub heartbeat_interval_secs: u64,
    /// File extensions accepted by the pre-run gate (lowercase, no dot)
    pub accepted_extensions: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            watch_dir: PathBuf::from(env_or("SCRUBRELAY_WATCH_DIR", "./uploads")),
            control_plane_url: trim_base(&env_or(
                "CONTROL_PLANE_URL",
                "http://localhost:3001/api",
            )),
            analyzer_url: trim_base(&env_or(
                "PRESIDIO_ANALYZER_URL",
                "http://presidio-analyzer:3000",
            )),
            anonymizer_url: trim_base(&env_or(
                "PRESIDIO_ANONYMIZER_URL",
                "http://presidio-anonymizer:3000",
            )),
            legacy_delivery_url: std::env::var("DELIVERY_URL").ok().filter(|v| !v.is_empty()),
            legacy_delivery_auth_header: std::env::var("DELIVERY_AUTH_HEADER")
                .ok()
                .filter(|v| !v.is_empty()),
            host_alias: env_or("CONTAINER_HOST_ALIAS", "host.docker.internal"),
            heartbeat_interval_secs: std::env::var("HEARTBEAT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            accepted_extensions: vec!["json".to_string()],
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Run-time tunables owned by the control plane
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub max_file_size_bytes: u64,
    pub delete_after_success: bool,
    pub delete_after_failure: bool,
    pub anonymization_operator: AnonymizationOperator,
    pub analysis_service_url: Option<String>,
    pub analysis_service_api_key: Option<String>,
    pub analysis_service_sentiment_enabled: bool,
    pub analysis_service_toxicity_enabled: bool,
    pub analysis_service_language_code: String,
    pub analysis_service_model: Option<String>,
    pub analysis_service_channel: Option<String>,
    pub analysis_service_tags: Option<Vec<String>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            delete_after_success: false,
            delete_after_failure: false,
            anonymization_operator: AnonymizationOperator::Replace,
            analysis_service_url: None,
            analysis_service_api_key: None,
            analysis_service_sentiment_enabled: false,
            analysis_service_toxicity_enabled: false,
            analysis_service_language_code: "en".to_string(),
            analysis_service_model: None,
            analysis_service_channel: None,
            analysis_service_tags: None,
        }
    }
}

/// Fetches `RuntimeConfig` from the control plane, falling back to defaults
#[derive(Debug, Clone)]
pub struct ConfigProvider {
    client: Client,
    base_url: String,
}

impl ConfigProvider {
    pub fn new(control_plane_url: &str) -> Self {
        let client = Client::builder()
            .timeout(CONTROL_PLANE_TIMEOUT)
            .build()
            .expect("Failed to create control-plane HTTP client");

        Self {
            client,
            base_url: trim_base(control_plane_url),
        }
    }

    /// Fetch the current config; unreachable or malformed responses fall
    /// back to `RuntimeConfig::default()` so file processing never stalls
    /// on the control plane.
    pub async fn fetch(&self) -> RuntimeConfig {
        match self.try_fetch().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config fetch failed, using defaults");
                RuntimeConfig::default()
            }
        }
    }

    async fn try_fetch(&self) -> Result<RuntimeConfig, reqwest::Error> {
        self.client
            .get(format!("{}/config", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_safe() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
        assert!(!config.delete_after_success);
        assert!(!config.delete_after_failure);
        assert_eq!(
            config.anonymization_operator,
            AnonymizationOperator::Replace
        );
        assert!(!config.analysis_service_sentiment_enabled);
        assert_eq!(config.analysis_service_language_code, "en");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{"maxFileSizeBytes": 2048, "deleteAfterFailure": true}"#;
        let config: RuntimeConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.max_file_size_bytes, 2048);
        assert!(config.delete_after_failure);
        assert!(!config.delete_after_success);
        assert_eq!(config.analysis_service_language_code, "en");
    }

    #[test]
    fn test_operator_parses_from_config() {
        let raw = r#"{"anonymizationOperator": "hash"}"#;
        let config: RuntimeConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.anonymization_operator, AnonymizationOperator::Hash);
    }
}
