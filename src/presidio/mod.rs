//! Presidio Client
//!
//! Thin HTTP client over the entity-detection service: the analyzer finds
//! typed PII spans in free text, the anonymizer rewrites those spans using
//! a single anonymization operator. Both calls share one pooled client
//! with a fixed request timeout.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Request timeout for analyzer and anonymizer calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anonymization strategy applied uniformly to every detected entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnonymizationOperator {
    /// Replace the span with its entity-type label
    #[default]
    Replace,
    /// Remove the span entirely
    Redact,
    /// Replace the span with a SHA-256 hash of its text
    Hash,
}

/// A single PII span found by the analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

/// Errors from analyzer/anonymizer calls
///
/// HTTP-status failures are kept distinct from transport failures so the
/// pipeline can log which side of the service misbehaved.
#[derive(Debug, Error)]
pub enum PresidioError {
    #[error("analyzer returned HTTP {0}")]
    AnalyzerHttp(u16),
    #[error("anonymizer returned HTTP {0}")]
    AnonymizerHttp(u16),
    #[error("entity-detection service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    entities: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score_threshold: Option<f64>,
}

#[derive(Serialize)]
struct AnonymizeRequest<'a> {
    text: &'a str,
    analyzer_results: &'a [Finding],
    anonymizers: Value,
}

#[derive(Deserialize)]
struct AnonymizeResponse {
    text: String,
}

/// HTTP client for the analyzer and anonymizer endpoints
#[derive(Debug, Clone)]
pub struct PresidioClient {
    client: Client,
    analyzer_url: String,
    anonymizer_url: String,
}

impl PresidioClient {
    pub fn new(analyzer_url: &str, anonymizer_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create Presidio HTTP client");

        Self {
            client,
            analyzer_url: analyzer_url.trim_end_matches('/').to_string(),
            anonymizer_url: anonymizer_url.trim_end_matches('/').to_string(),
        }
    }

    /// Scan `text` for PII entities
    pub async fn analyze(
        &self,
        text: &str,
        language: &str,
        entities: Option<&[String]>,
        score_threshold: Option<f64>,
    ) -> Result<Vec<Finding>, PresidioError> {
        let request = AnalyzeRequest {
            text,
            language,
            entities,
            score_threshold,
        };

        let response = self
            .client
            .post(format!("{}/analyze", self.analyzer_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PresidioError::AnalyzerHttp(status.as_u16()));
        }

        Ok(response.json().await?)
    }

    /// Rewrite the detected spans in `text` using the given operator
    pub async fn anonymize(
        &self,
        text: &str,
        findings: &[Finding],
        operator: AnonymizationOperator,
    ) -> Result<String, PresidioError> {
        let request = AnonymizeRequest {
            text,
            analyzer_results: findings,
            anonymizers: operator_map(operator),
        };

        let response = self
            .client
            .post(format!("{}/anonymize", self.anonymizer_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PresidioError::AnonymizerHttp(status.as_u16()));
        }

        let body: AnonymizeResponse = response.json().await?;
        Ok(body.text)
    }
}

/// Build the anonymizer operator map.
///
/// A single DEFAULT entry applies the operator to every detected entity
/// type; there is no per-entity-type override.
pub fn operator_map(operator: AnonymizationOperator) -> Value {
    match operator {
        AnonymizationOperator::Replace => json!({ "DEFAULT": { "type": "replace" } }),
        AnonymizationOperator::Redact => json!({ "DEFAULT": { "type": "redact" } }),
        AnonymizationOperator::Hash => {
            json!({ "DEFAULT": { "type": "hash", "hash_type": "sha256" } })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_map_replace() {
        let map = operator_map(AnonymizationOperator::Replace);
        assert_eq!(map["DEFAULT"]["type"], "replace");
        assert!(map["DEFAULT"].get("hash_type").is_none());
    }

    #[test]
    fn test_operator_map_redact() {
        let map = operator_map(AnonymizationOperator::Redact);
        assert_eq!(map["DEFAULT"]["type"], "redact");
    }

    #[test]
    fn test_operator_map_hash_carries_hash_type() {
        let map = operator_map(AnonymizationOperator::Hash);
        assert_eq!(map["DEFAULT"]["type"], "hash");
        assert_eq!(map["DEFAULT"]["hash_type"], "sha256");
    }

    #[test]
    fn test_operator_wire_values() {
        let op: AnonymizationOperator = serde_json::from_str("\"redact\"").unwrap();
        assert_eq!(op, AnonymizationOperator::Redact);
        assert_eq!(
            serde_json::to_string(&AnonymizationOperator::Hash).unwrap(),
            "\"hash\""
        );
    }

    #[test]
    fn test_finding_deserializes_analyzer_shape() {
        let raw = r#"{"entity_type":"EMAIL_ADDRESS","start":8,"end":24,"score":0.95}"#;
        let finding: Finding = serde_json::from_str(raw).unwrap();
        assert_eq!(finding.entity_type, "EMAIL_ADDRESS");
        assert_eq!(finding.start, 8);
        assert_eq!(finding.end, 24);
        assert!(finding.score > 0.9);
    }
}
