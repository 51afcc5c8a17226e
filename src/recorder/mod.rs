//! Run/Audit Recorder
//!
//! Client for the control plane's run and audit-log endpoints. Runs are
//! created and patched through their lifecycle; audit events are appended
//! fire-and-forget from a detached task so a slow or dead control plane
//! can never stall the pipeline. Nothing written here may contain raw
//! content, filenames, or paths.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Request timeout for run and log writes
const RECORDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Tag recorded on every run produced by this worker
pub const SOURCE_TYPE: &str = "folder_upload";

/// Processing-run lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Processing,
    Anonymized,
    Delivered,
    Failed,
    Deleted,
}

/// Closed set of audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    FileDetected,
    WorkerHeartbeat,
    AnonymizeStarted,
    AnonymizeSucceeded,
    DeliveryStarted,
    DeliverySucceeded,
    DeliveryFailed,
    CleanupDeleted,
    RunFailed,
}

/// Severity of an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

/// Fields for creating a run; the control plane assigns id and timestamps
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRun {
    pub source_type: &'static str,
    /// Always `sha256:<hex>`, never a raw filename
    pub source_file_name: String,
    pub source_file_size: u64,
    pub status: RunStatus,
}

/// Partial update applied to a run; unset fields are left untouched
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message_safe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presidio_stats: Option<HashMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_target_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_success_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_failure_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Deserialize)]
struct CreatedRun {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditEventBody {
    level: AuditLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Value>,
}

/// Control-plane client for runs and audit logs
#[derive(Debug, Clone)]
pub struct Recorder {
    client: Client,
    base_url: String,
}

impl Recorder {
    pub fn new(control_plane_url: &str) -> Self {
        let client = Client::builder()
            .timeout(RECORDER_TIMEOUT)
            .build()
            .expect("Failed to create recorder HTTP client");

        Self {
            client,
            base_url: control_plane_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a run, returning its id. A control-plane failure is logged
    /// and returns `None`; the caller keeps processing without run
    /// mutations.
    pub async fn create_run(&self, run: &NewRun) -> Option<String> {
        let result: Result<CreatedRun, reqwest::Error> = async {
            self.client
                .post(format!("{}/runs", self.base_url))
                .json(run)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        }
        .await;

        match result {
            Ok(created) => Some(created.id),
            Err(e) => {
                warn!(error = %e, "run creation failed, continuing without run record");
                None
            }
        }
    }

    /// Patch a run. Failures are logged and swallowed.
    pub async fn update_run(&self, run_id: &str, patch: &RunPatch) {
        let result = async {
            self.client
                .patch(format!("{}/runs/{}", self.base_url, run_id))
                .json(patch)
                .send()
                .await?
                .error_for_status()?;
            Ok::<(), reqwest::Error>(())
        }
        .await;

        if let Err(e) = result {
            warn!(run_id, error = %e, "run update failed");
        }
    }

    /// Append an audit event without waiting for the write. The post runs
    /// on a detached task; a failure is logged locally and never reaches
    /// the caller.
    pub fn audit(
        &self,
        run_id: Option<&str>,
        event_type: AuditEventType,
        level: AuditLevel,
        meta: Option<Value>,
    ) {
        let body = AuditEventBody {
            level,
            run_id: run_id.map(str::to_string),
            event_type,
            meta,
        };
        let client = self.client.clone();
        let url = format!("{}/logs", self.base_url);

        tokio::spawn(async move {
            let result = async {
                client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok::<(), reqwest::Error>(())
            }
            .await;

            if let Err(e) = result {
                debug!(event = ?body.event_type, error = %e, "audit append dropped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_values() {
        assert_eq!(serde_json::to_string(&RunStatus::Queued).unwrap(), "\"queued\"");
        assert_eq!(
            serde_json::to_string(&RunStatus::Anonymized).unwrap(),
            "\"anonymized\""
        );
        assert_eq!(serde_json::to_string(&RunStatus::Failed).unwrap(), "\"failed\"");
    }

    #[test]
    fn test_event_type_wire_values() {
        assert_eq!(
            serde_json::to_string(&AuditEventType::FileDetected).unwrap(),
            "\"file_detected\""
        );
        assert_eq!(
            serde_json::to_string(&AuditEventType::WorkerHeartbeat).unwrap(),
            "\"worker_heartbeat\""
        );
        assert_eq!(
            serde_json::to_string(&AuditEventType::CleanupDeleted).unwrap(),
            "\"cleanup_deleted\""
        );
    }

    #[test]
    fn test_patch_skips_unset_fields() {
        let patch = RunPatch {
            status: Some(RunStatus::Processing),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({"status": "processing"}));
    }

    #[test]
    fn test_patch_uses_camel_case() {
        let patch = RunPatch {
            status: Some(RunStatus::Failed),
            error_code: Some("INVALID_SCHEMA".to_string()),
            error_message_safe: Some("file is not a valid chat log".to_string()),
            duration_ms: Some(12),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value["errorCode"], "INVALID_SCHEMA");
        assert_eq!(value["errorMessageSafe"], "file is not a valid chat log");
        assert_eq!(value["durationMs"], 12);
    }

    #[test]
    fn test_new_run_shape() {
        let run = NewRun {
            source_type: SOURCE_TYPE,
            source_file_name: "sha256:abcd".to_string(),
            source_file_size: 100,
            status: RunStatus::Queued,
        };
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["sourceType"], "folder_upload");
        assert_eq!(value["sourceFileName"], "sha256:abcd");
        assert_eq!(value["sourceFileSize"], 100);
        assert_eq!(value["status"], "queued");
    }
}
