//! Analysis Sidecar
//!
//! Optionally forwards anonymized messages to the sentiment and toxicity
//! endpoints of the analysis service. Strictly best-effort: any failure
//! here is a warning, never a run failure, and delivery proceeds
//! regardless.

use crate::config::RuntimeConfig;
use crate::processor::chatlog::{AnonymizationResult, PayloadMessage};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest {
    messages: Vec<PayloadMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
}

/// Client for the sentiment/toxicity analysis service
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    client: Client,
}

impl AnalysisClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(ANALYSIS_TIMEOUT)
            .build()
            .expect("Failed to create analysis HTTP client");

        Self { client }
    }

    /// Forward anonymized messages per the config's enable flags. Only
    /// role, content and timestamp leave the worker; the synthetic
    /// conversation id is the file hash.
    pub async fn forward(&self, config: &RuntimeConfig, result: &AnonymizationResult) {
        let (Some(base_url), Some(api_key)) = (
            config.analysis_service_url.as_deref(),
            config.analysis_service_api_key.as_deref(),
        ) else {
            return;
        };

        if !config.analysis_service_sentiment_enabled && !config.analysis_service_toxicity_enabled
        {
            return;
        }

        let request = AnalysisRequest {
            messages: result.payload_messages(),
            conversation_id: Some(result.source_file_hash.clone()),
            language_code: Some(config.analysis_service_language_code.clone()),
            model: config.analysis_service_model.clone(),
            channel: config.analysis_service_channel.clone(),
            tags: config.analysis_service_tags.clone(),
        };

        if config.analysis_service_sentiment_enabled {
            self.post(base_url, "sentiment", api_key, &request).await;
        }
        if config.analysis_service_toxicity_enabled {
            self.post(base_url, "toxicity", api_key, &request).await;
        }
    }

    async fn post(&self, base_url: &str, kind: &str, api_key: &str, request: &AnalysisRequest) {
        let url = format!(
            "{}/api/v1/analysis/{}",
            base_url.trim_end_matches('/'),
            kind
        );

        let result = async {
            self.client
                .post(&url)
                .header("X-API-Key", api_key)
                .json(request)
                .send()
                .await?
                .error_for_status()?;
            Ok::<(), reqwest::Error>(())
        }
        .await;

        match result {
            Ok(()) => debug!(kind, "analysis forwarded"),
            Err(e) => warn!(kind, error = %e, "analysis forwarding failed, continuing"),
        }
    }
}

impl Default for AnalysisClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::chatlog::{AnonymizedMessage, Role};
    use chrono::Utc;

    fn sample_result() -> AnonymizationResult {
        AnonymizationResult {
            source_file_hash: "cafe".to_string(),
            byte_size: 10,
            processed_at: Utc::now(),
            messages: vec![AnonymizedMessage {
                id: "m1".to_string(),
                role: Role::User,
                content: "hi".to_string(),
                timestamp: None,
                entities_found: 0,
            }],
            metadata: None,
        }
    }

    #[test]
    fn test_request_shape_uses_camel_case_and_file_hash() {
        let result = sample_result();
        let request = AnalysisRequest {
            messages: result.payload_messages(),
            conversation_id: Some(result.source_file_hash.clone()),
            language_code: Some("en".to_string()),
            model: None,
            channel: None,
            tags: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["conversationId"], "cafe");
        assert_eq!(value["languageCode"], "en");
        assert!(value.get("model").is_none());
        assert!(value["messages"][0].get("id").is_none());
        assert_eq!(value["messages"][0]["content"], "hi");
    }
}
