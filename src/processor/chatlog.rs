//! Chat-Log Schema
//!
//! Input shape for uploaded files and the in-memory output of
//! anonymization. The input is parsed strictly: `id`, `role`, and
//! `content` are required on every message. Neither the raw log nor the
//! anonymized result is ever persisted; the result lives only long enough
//! to be delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message of an uploaded chat log
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An uploaded chat log, parsed but not yet anonymized
#[derive(Debug, Clone, Deserialize)]
pub struct ChatLog {
    #[serde(default)]
    pub version: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// A message after PII removal
#[derive(Debug, Clone, Serialize)]
pub struct AnonymizedMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub entities_found: u32,
}

/// The full anonymized output for one file, consumed by delivery
#[derive(Debug, Clone, Serialize)]
pub struct AnonymizationResult {
    /// Hex SHA-256 of the original file base name, never of the content
    pub source_file_hash: String,
    pub byte_size: u64,
    pub processed_at: DateTime<Utc>,
    pub messages: Vec<AnonymizedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Outbound view of a message: role, content and timestamp only. The
/// internal `id` and `entities_found` fields stay out of third-party
/// payloads.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&AnonymizedMessage> for PayloadMessage {
    fn from(message: &AnonymizedMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            timestamp: message.timestamp,
        }
    }
}

impl AnonymizationResult {
    /// Messages stripped to the outbound shape
    pub fn payload_messages(&self) -> Vec<PayloadMessage> {
        self.messages.iter().map(PayloadMessage::from).collect()
    }
}

/// Hex SHA-256 of a file base name
pub fn file_name_hash(file_name: &str) -> String {
    hex::encode(Sha256::digest(file_name.as_bytes()))
}

/// The privacy-safe identifier recorded in place of a filename
pub fn source_file_name(file_name: &str) -> String {
    format!("sha256:{}", file_name_hash(file_name))
}
