//! Delivery Engine
//!
//! Sends anonymized results to configured HTTP targets. Each target
//! carries its own method, headers, auth, timeout, retry policy, and an
//! optional body template. Failures are classified into a closed code set
//! so the recorded error never has to quote a raw transport message.

pub mod template;

use crate::config::Settings;
use crate::processor::chatlog::AnonymizationResult;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Client-level timeout; individual targets override per request
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on error/body text quoted into safe messages
const PREVIEW_MAX_CHARS: usize = 200;

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_ms() -> u64 {
    500
}

/// HTTP method a target accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

/// Per-target authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TargetAuth {
    #[default]
    None,
    BearerToken {
        token: String,
    },
    ApiKeyHeader {
        header: String,
        key: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

/// A configured HTTP destination for anonymized results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTarget {
    pub id: String,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: TargetAuth,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Classified delivery failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorCode {
    ConnectionRefused,
    DnsError,
    ConnectionReset,
    Timeout,
    Generic,
}

impl DeliveryErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryErrorCode::ConnectionRefused => "DELIVERY_CONNECTION_REFUSED",
            DeliveryErrorCode::DnsError => "DELIVERY_DNS_ERROR",
            DeliveryErrorCode::ConnectionReset => "DELIVERY_CONNECTION_RESET",
            DeliveryErrorCode::Timeout => "DELIVERY_TIMEOUT",
            DeliveryErrorCode::Generic => "DELIVERY_ERROR",
        }
    }
}

/// A classified delivery failure with a message safe to persist
#[derive(Debug, Clone, Error)]
#[error("{safe_message}")]
pub struct DeliveryError {
    pub code: DeliveryErrorCode,
    pub safe_message: String,
}

/// Sends anonymized results to delivery targets
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    client: Client,
    control_plane_url: String,
    host_alias: String,
    legacy_url: Option<String>,
    legacy_auth_header: Option<String>,
}

impl DeliveryEngine {
    pub fn new(settings: &Settings) -> Self {
        let client = Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .expect("Failed to create delivery HTTP client");

        Self {
            client,
            control_plane_url: settings.control_plane_url.clone(),
            host_alias: settings.host_alias.clone(),
            legacy_url: settings.legacy_delivery_url.clone(),
            legacy_auth_header: settings.legacy_delivery_auth_header.clone(),
        }
    }

    /// Fetch the configured targets and keep the enabled ones, in the
    /// order the control plane returns them. A fetch failure is treated
    /// as "no targets configured".
    pub async fn resolve_targets(&self) -> Vec<DeliveryTarget> {
        let url = format!("{}/targets", self.control_plane_url);
        let targets: Result<Vec<DeliveryTarget>, reqwest::Error> = async {
            self.client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        }
        .await;

        match targets {
            Ok(all) => all.into_iter().filter(|t| t.enabled).collect(),
            Err(e) => {
                warn!(error = %e, "target list fetch failed, treating as none configured");
                Vec::new()
            }
        }
    }

    /// The single environment-level fallback target, if configured
    pub fn legacy_target(&self) -> Option<DeliveryTarget> {
        let url = self.legacy_url.clone()?;
        let mut headers = HashMap::new();
        if let Some(value) = &self.legacy_auth_header {
            headers.insert("Authorization".to_string(), value.clone());
        }

        Some(DeliveryTarget {
            id: "legacy-env".to_string(),
            name: "legacy environment target".to_string(),
            url,
            method: HttpMethod::Post,
            headers,
            auth: TargetAuth::None,
            timeout_ms: default_timeout_ms(),
            retries: 0,
            backoff_ms: default_backoff_ms(),
            enabled: true,
            body_template: None,
            created_at: None,
            updated_at: None,
        })
    }

    /// Deliver a result to one target, retrying per the target's policy.
    /// Returns the HTTP status of the successful attempt.
    pub async fn deliver(
        &self,
        target: &DeliveryTarget,
        result: &AnonymizationResult,
    ) -> Result<u16, DeliveryError> {
        let mut attempt: u32 = 0;
        loop {
            match self.dispatch(target, result).await {
                Ok(status) => return Ok(status),
                Err(e) if attempt < target.retries => {
                    attempt += 1;
                    warn!(
                        target_name = %target.name,
                        attempt,
                        code = e.code.as_str(),
                        "delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(target.backoff_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dispatch(
        &self,
        target: &DeliveryTarget,
        result: &AnonymizationResult,
    ) -> Result<u16, DeliveryError> {
        let url = rewrite_loopback(&target.url, &self.host_alias);

        let mut request = match target.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
        }
        .timeout(Duration::from_millis(target.timeout_ms));

        for (name, value) in &target.headers {
            request = request.header(name, value);
        }

        if let Some((name, value)) = auth_header(&target.auth) {
            request = request.header(name, value);
        }

        // GET requests never carry a body
        if target.method != HttpMethod::Get {
            let body = match &target.body_template {
                Some(tpl) => template::render(tpl, result),
                None => serde_json::to_value(result).unwrap_or(Value::Null),
            };
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(&e, &target.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError {
                code: DeliveryErrorCode::Generic,
                safe_message: format!(
                    "target responded with HTTP {}: {}",
                    status.as_u16(),
                    truncate_preview(&body)
                ),
            });
        }

        Ok(status.as_u16())
    }
}

/// Header contributed by the target's auth configuration.
///
/// A new auth kind cannot be added without a header shape here.
fn auth_header(auth: &TargetAuth) -> Option<(String, String)> {
    match auth {
        TargetAuth::None => None,
        TargetAuth::BearerToken { token } => {
            Some(("Authorization".to_string(), format!("Bearer {token}")))
        }
        TargetAuth::ApiKeyHeader { header, key } => Some((header.clone(), key.clone())),
        TargetAuth::Basic { username, password } => {
            let credentials = BASE64.encode(format!("{username}:{password}"));
            Some(("Authorization".to_string(), format!("Basic {credentials}")))
        }
    }
}

/// Rewrite loopback hosts to the container-visible alias. Inside a
/// container, localhost points at the worker itself, not the host service
/// the operator configured.
pub fn rewrite_loopback(url: &str, host_alias: &str) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    if !parsed.host_str().map(is_loopback_host).unwrap_or(false) {
        return url.to_string();
    }
    if parsed.set_host(Some(host_alias)).is_err() {
        return url.to_string();
    }
    parsed.to_string()
}

fn is_loopback_host(host: &str) -> bool {
    matches!(
        host.to_ascii_lowercase().as_str(),
        "localhost" | "127.0.0.1" | "::1" | "[::1]"
    )
}

/// Classify a transport-level failure into the delivery code set
fn classify_transport(error: &reqwest::Error, original_url: &str) -> DeliveryError {
    let code = if error.is_timeout() {
        DeliveryErrorCode::Timeout
    } else {
        classify_source_chain(error)
    };

    let safe_message = match code {
        DeliveryErrorCode::ConnectionRefused => {
            if is_loopback_url(original_url) {
                "target refused the connection (target host is loopback; inside a container \
                 that resolves to the worker itself, not the host machine)"
                    .to_string()
            } else {
                "target refused the connection".to_string()
            }
        }
        DeliveryErrorCode::DnsError => "target hostname could not be resolved".to_string(),
        DeliveryErrorCode::ConnectionReset => "connection reset during delivery".to_string(),
        DeliveryErrorCode::Timeout => "delivery timed out".to_string(),
        DeliveryErrorCode::Generic => {
            format!("delivery failed: {}", truncate_preview(&error.to_string()))
        }
    };

    DeliveryError { code, safe_message }
}

/// Walk the error's source chain looking for an io error kind, then fall
/// back to text matching over the whole chain.
fn classify_source_chain(error: &reqwest::Error) -> DeliveryErrorCode {
    let mut text = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return DeliveryErrorCode::ConnectionRefused
                }
                std::io::ErrorKind::ConnectionReset => return DeliveryErrorCode::ConnectionReset,
                std::io::ErrorKind::TimedOut => return DeliveryErrorCode::Timeout,
                _ => {}
            }
        }
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    classify_error_text(&text)
}

/// Substring fallback for transport errors that do not expose an io kind
fn classify_error_text(text: &str) -> DeliveryErrorCode {
    let lower = text.to_lowercase();
    if lower.contains("dns error") || lower.contains("failed to lookup address") {
        DeliveryErrorCode::DnsError
    } else if lower.contains("connection refused") {
        DeliveryErrorCode::ConnectionRefused
    } else if lower.contains("connection reset") {
        DeliveryErrorCode::ConnectionReset
    } else if lower.contains("timed out") || lower.contains("timeout") {
        DeliveryErrorCode::Timeout
    } else {
        DeliveryErrorCode::Generic
    }
}

fn is_loopback_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(is_loopback_host))
        .unwrap_or(false)
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{head}...")
    }
}
