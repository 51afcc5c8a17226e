//! Worker Heartbeat
//!
//! Periodic liveness signal appended to the audit trail so operators can
//! tell a quiet worker from a dead one.

use crate::recorder::{AuditEventType, AuditLevel, Recorder};
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn the heartbeat loop. The first beat fires immediately.
pub fn spawn_heartbeat(recorder: Recorder, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            recorder.audit(
                None,
                AuditEventType::WorkerHeartbeat,
                AuditLevel::Info,
                Some(json!({ "watchedDirCount": 1 })),
            );
        }
    })
}
