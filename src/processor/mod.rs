//! File Processing Pipeline
//!
//! State machine for a single detected file: pre-run gate, run creation,
//! read and schema validation, per-message anonymization, optional
//! analysis forwarding, multi-target delivery, cleanup. Each stage has a
//! defined failure transition; each path is orchestrated at most once at
//! a time.

pub mod chatlog;

use crate::analysis::AnalysisClient;
use crate::config::{ConfigProvider, RuntimeConfig, Settings};
use crate::delivery::{DeliveryEngine, DeliveryError};
use crate::presidio::PresidioClient;
use crate::recorder::{
    AuditEventType, AuditLevel, NewRun, Recorder, RunPatch, RunStatus, SOURCE_TYPE,
};
use chatlog::{file_name_hash, AnonymizationResult, AnonymizedMessage, ChatLog};
use chrono::Utc;
use dashmap::DashSet;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error codes persisted on failed runs
pub const READ_ERROR: &str = "READ_ERROR";
pub const INVALID_SCHEMA: &str = "INVALID_SCHEMA";
pub const PRESIDIO_ERROR: &str = "PRESIDIO_ERROR";

// Persisted error messages are fixed strings; exception details stay in
// local logs only.
const SAFE_READ_ERROR: &str = "source file could not be read";
const SAFE_INVALID_SCHEMA: &str = "file failed chat-log schema validation";
const SAFE_PRESIDIO_ERROR: &str = "entity-detection service call failed";

/// Orchestrates the pipeline for detected files
pub struct Processor {
    settings: Settings,
    config: ConfigProvider,
    presidio: PresidioClient,
    recorder: Recorder,
    analysis: AnalysisClient,
    delivery: DeliveryEngine,
    /// Paths currently being orchestrated; duplicate events for a path
    /// in flight are ignored
    in_flight: DashSet<PathBuf>,
}

impl Processor {
    pub fn new(
        settings: Settings,
        config: ConfigProvider,
        presidio: PresidioClient,
        recorder: Recorder,
        analysis: AnalysisClient,
        delivery: DeliveryEngine,
    ) -> Self {
        Self {
            settings,
            config,
            presidio,
            recorder,
            analysis,
            delivery,
            in_flight: DashSet::new(),
        }
    }

    /// Entry point for one file-detection event
    pub async fn handle_event(&self, path: PathBuf) {
        if !self.in_flight.insert(path.clone()) {
            debug!(path = %path.display(), "orchestration already in flight, ignoring event");
            return;
        }
        self.process(&path).await;
        self.in_flight.remove(&path);
    }

    async fn process(&self, path: &Path) {
        let trace_id = Uuid::new_v4();
        let started = Instant::now();

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
        else {
            return;
        };

        let config = self.config.fetch().await;

        // Pre-run gate: wrong extension or oversized files are skipped
        // with a local log line only; no run is created.
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let accepted = extension
            .map(|e| self.settings.accepted_extensions.iter().any(|a| *a == e))
            .unwrap_or(false);
        if !accepted {
            debug!(%trace_id, "skipping file with unaccepted extension");
            return;
        }

        let byte_size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(%trace_id, error = %e, "could not stat candidate file, skipping");
                return;
            }
        };
        if byte_size > config.max_file_size_bytes {
            info!(
                %trace_id,
                byte_size,
                limit = config.max_file_size_bytes,
                "skipping oversized file"
            );
            return;
        }

        // Run creation. A control-plane outage degrades to run-less
        // processing: the file still flows, later run mutations are
        // skipped.
        let hash = file_name_hash(&file_name);
        let run_id = self
            .recorder
            .create_run(&NewRun {
                source_type: SOURCE_TYPE,
                source_file_name: format!("sha256:{hash}"),
                source_file_size: byte_size,
                status: RunStatus::Queued,
            })
            .await;
        let run_ref = run_id.as_deref();
        self.recorder.audit(
            run_ref,
            AuditEventType::FileDetected,
            AuditLevel::Info,
            Some(json!({ "byteSize": byte_size })),
        );
        info!(%trace_id, run_id = run_ref.unwrap_or("none"), byte_size, "processing detected file");

        self.patch(run_ref, RunPatch {
            status: Some(RunStatus::Processing),
            ..Default::default()
        })
        .await;
        self.recorder
            .audit(run_ref, AuditEventType::AnonymizeStarted, AuditLevel::Info, None);

        // Read and schema-validate
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%trace_id, error = %e, "source read failed");
                self.fail_run(
                    run_ref,
                    READ_ERROR,
                    SAFE_READ_ERROR,
                    RunPatch::default(),
                    &config,
                    path,
                    started,
                )
                .await;
                return;
            }
        };
        let chat_log: ChatLog = match serde_json::from_str(&text) {
            Ok(log) => log,
            Err(e) => {
                warn!(%trace_id, error = %e, "chat-log schema validation failed");
                self.fail_run(
                    run_ref,
                    INVALID_SCHEMA,
                    SAFE_INVALID_SCHEMA,
                    RunPatch::default(),
                    &config,
                    path,
                    started,
                )
                .await;
                return;
            }
        };

        // Per-message anonymization, original order preserved
        let mut messages = Vec::with_capacity(chat_log.messages.len());
        let mut stats: HashMap<String, u64> = HashMap::new();
        for message in chat_log.messages {
            let findings = match self
                .presidio
                .analyze(
                    &message.content,
                    &config.analysis_service_language_code,
                    None,
                    None,
                )
                .await
            {
                Ok(findings) => findings,
                Err(e) => {
                    warn!(%trace_id, error = %e, "entity analysis failed");
                    self.fail_run(
                        run_ref,
                        PRESIDIO_ERROR,
                        SAFE_PRESIDIO_ERROR,
                        RunPatch::default(),
                        &config,
                        path,
                        started,
                    )
                    .await;
                    return;
                }
            };

            let entities_found = findings.len() as u32;
            let content = if findings.is_empty() {
                message.content
            } else {
                for finding in &findings {
                    *stats.entry(finding.entity_type.clone()).or_default() += 1;
                }
                match self
                    .presidio
                    .anonymize(&message.content, &findings, config.anonymization_operator)
                    .await
                {
                    Ok(anonymized) => anonymized,
                    Err(e) => {
                        warn!(%trace_id, error = %e, "anonymization failed");
                        self.fail_run(
                            run_ref,
                            PRESIDIO_ERROR,
                            SAFE_PRESIDIO_ERROR,
                            RunPatch::default(),
                            &config,
                            path,
                            started,
                        )
                        .await;
                        return;
                    }
                }
            };

            messages.push(AnonymizedMessage {
                id: message.id,
                role: message.role,
                content,
                timestamp: message.timestamp,
                entities_found,
            });
        }

        let entity_count: u64 = stats.values().sum();
        self.patch(run_ref, RunPatch {
            status: Some(RunStatus::Anonymized),
            presidio_stats: Some(stats),
            ..Default::default()
        })
        .await;
        self.recorder.audit(
            run_ref,
            AuditEventType::AnonymizeSucceeded,
            AuditLevel::Info,
            Some(json!({ "entityCount": entity_count })),
        );

        let result = AnonymizationResult {
            source_file_hash: hash,
            byte_size,
            processed_at: Utc::now(),
            messages,
            metadata: chat_log.metadata,
        };

        // Optional analysis forwarding; never blocks delivery
        self.analysis.forward(&config, &result).await;

        // Delivery. Targets run sequentially so a later failure cannot
        // race an earlier success. Every enabled target is attempted even
        // after a failure; the run fails if any target failed.
        self.recorder
            .audit(run_ref, AuditEventType::DeliveryStarted, AuditLevel::Info, None);
        let delivery_started = Instant::now();

        let mut targets = self.delivery.resolve_targets().await;
        if targets.is_empty() {
            targets.extend(self.delivery.legacy_target());
        }

        let mut success_count: u32 = 0;
        let mut failure_count: u32 = 0;
        let mut last_status: Option<u16> = None;
        let mut first_error: Option<DeliveryError> = None;

        for target in &targets {
            match self.delivery.deliver(target, &result).await {
                Ok(status) => {
                    success_count += 1;
                    last_status = Some(status);
                }
                Err(e) => {
                    failure_count += 1;
                    warn!(
                        %trace_id,
                        target_name = %target.name,
                        code = e.code.as_str(),
                        "target delivery failed"
                    );
                    self.recorder.audit(
                        run_ref,
                        AuditEventType::DeliveryFailed,
                        AuditLevel::Warn,
                        Some(json!({ "targetId": target.id, "errorCode": e.code.as_str() })),
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        let target_count = targets.len() as u32;
        let delivery_duration_ms = delivery_started.elapsed().as_millis() as u64;
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(error) = first_error {
            let extra = RunPatch {
                delivery_target_count: Some(target_count),
                delivery_success_count: Some(success_count),
                delivery_failure_count: Some(failure_count),
                delivery_duration_ms: Some(delivery_duration_ms),
                ..Default::default()
            };
            self.fail_run(
                run_ref,
                error.code.as_str(),
                &error.safe_message,
                extra,
                &config,
                path,
                started,
            )
            .await;
            return;
        }

        self.patch(run_ref, RunPatch {
            status: Some(RunStatus::Delivered),
            delivery_target_count: Some(target_count),
            delivery_success_count: Some(success_count),
            delivery_failure_count: Some(0),
            delivery_status_code: last_status,
            delivery_duration_ms: Some(delivery_duration_ms),
            duration_ms: Some(duration_ms),
            ..Default::default()
        })
        .await;
        self.recorder.audit(
            run_ref,
            AuditEventType::DeliverySucceeded,
            AuditLevel::Info,
            Some(json!({
                "statusCode": last_status,
                "targetCount": target_count,
                "durationMs": delivery_duration_ms
            })),
        );
        info!(%trace_id, targets = target_count, duration_ms, "file delivered");

        if config.delete_after_success {
            self.remove_source(run_ref, path, true).await;
        }
    }

    async fn patch(&self, run_id: Option<&str>, patch: RunPatch) {
        if let Some(id) = run_id {
            self.recorder.update_run(id, &patch).await;
        }
    }

    /// Terminal failure transition: patch the run, append `run_failed`,
    /// honor the delete-after-failure policy.
    #[allow(clippy::too_many_arguments)]
    async fn fail_run(
        &self,
        run_id: Option<&str>,
        code: &str,
        safe_message: &str,
        extra: RunPatch,
        config: &RuntimeConfig,
        path: &Path,
        started: Instant,
    ) {
        let mut patch = extra;
        patch.status = Some(RunStatus::Failed);
        patch.error_code = Some(code.to_string());
        patch.error_message_safe = Some(safe_message.to_string());
        patch.duration_ms = Some(started.elapsed().as_millis() as u64);
        self.patch(run_id, patch).await;

        self.recorder.audit(
            run_id,
            AuditEventType::RunFailed,
            AuditLevel::Error,
            Some(json!({ "errorCode": code })),
        );

        if config.delete_after_failure {
            // The run keeps its failed status; only the file goes away
            self.remove_source(run_id, path, false).await;
        }
    }

    /// Delete the source file. On the success path the run advances to
    /// `deleted`; a deletion error is a warning either way.
    async fn remove_source(&self, run_id: Option<&str>, path: &Path, advance_to_deleted: bool) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                if advance_to_deleted {
                    self.patch(run_id, RunPatch {
                        status: Some(RunStatus::Deleted),
                        ..Default::default()
                    })
                    .await;
                }
                self.recorder.audit(
                    run_id,
                    AuditEventType::CleanupDeleted,
                    AuditLevel::Info,
                    None,
                );
            }
            Err(e) => {
                warn!(error = %e, "source cleanup failed, leaving file in place");
            }
        }
    }
}
