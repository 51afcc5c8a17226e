//! Upload Folder Watcher
//!
//! Debounced notify watcher over the upload directory. Create and modify
//! events for regular files are forwarded to the processing pipeline over
//! a channel. The debounce window lets uploads finish before the pipeline
//! reads them.

use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Debounce window for file writes
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to create watcher: {0}")]
    Create(notify::Error),
    #[error("failed to watch path: {0}")]
    Watch(notify::Error),
}

/// Running watcher over one upload folder. Dropping it stops the watch.
#[allow(dead_code)]
pub struct UploadWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    path: PathBuf,
}

/// Start watching `path`, sending candidate file paths to `events`.
///
/// The notify callback runs on the debouncer's own thread; paths cross
/// into the async runtime through the channel.
pub fn start_watcher(
    path: PathBuf,
    events: mpsc::Sender<PathBuf>,
) -> Result<UploadWatcher, WatcherError> {
    let watched_folder = path.clone();

    let mut debouncer = new_debouncer(
        DEBOUNCE_WINDOW,
        None,
        move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
            Ok(batch) => {
                for event in batch {
                    handle_file_event(&event, &watched_folder, &events);
                }
            }
            Err(errors) => {
                for e in errors {
                    error!(error = ?e, "watcher error");
                }
            }
        },
    )
    .map_err(WatcherError::Create)?;

    debouncer
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(WatcherError::Watch)?;

    Ok(UploadWatcher { debouncer, path })
}

/// Filter a debounced event down to candidate upload files
fn handle_file_event(event: &DebouncedEvent, watched_folder: &Path, tx: &mpsc::Sender<PathBuf>) {
    // New uploads arrive as creates; slow writers finish with a modify
    let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    if !relevant {
        return;
    }

    for path in &event.paths {
        if path.is_dir() {
            continue;
        }

        // Skip symlinks so nothing escapes the watched folder
        if path.is_symlink() {
            continue;
        }

        // Verify the file is within the watched folder (symlinked parents
        // could otherwise smuggle paths in)
        if let (Ok(canonical_path), Ok(canonical_watched)) =
            (path.canonicalize(), watched_folder.canonicalize())
        {
            if !canonical_path.starts_with(&canonical_watched) {
                warn!("skipping file outside watched folder");
                continue;
            }
        } else {
            continue;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        // Skip hidden files, temp files, and partial downloads
        if file_name.starts_with('.')
            || file_name.ends_with(".tmp")
            || file_name.ends_with(".crdownload")
            || file_name.ends_with(".part")
            || file_name.ends_with(".download")
        {
            continue;
        }

        let metadata = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.file_type().is_symlink() {
            continue;
        }

        // Size 0 means the writer has not flushed yet; the modify event
        // that follows will re-trigger us
        if metadata.len() == 0 {
            continue;
        }

        if tx.blocking_send(path.clone()).is_err() {
            debug!("event channel closed, dropping file event");
        }
    }
}
