pub mod analysis;
pub mod config;
pub mod delivery;
pub mod presidio;
pub mod processor;
pub mod recorder;
pub mod services;

use config::{ConfigProvider, Settings};
use processor::Processor;
use recorder::Recorder;
use services::heartbeat::spawn_heartbeat;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Wire the worker together and run until interrupted.
///
/// Every client is constructed exactly once here and handed to the
/// components that need it; nothing reaches for ambient globals.
pub async fn run(settings: Settings) {
    let recorder = Recorder::new(&settings.control_plane_url);
    let config = ConfigProvider::new(&settings.control_plane_url);
    let presidio = presidio::PresidioClient::new(&settings.analyzer_url, &settings.anonymizer_url);
    let analysis = analysis::AnalysisClient::new();
    let delivery = delivery::DeliveryEngine::new(&settings);

    let watch_dir = settings.watch_dir.clone();
    let heartbeat_interval = settings.heartbeat_interval_secs;

    let processor = Arc::new(Processor::new(
        settings,
        config,
        presidio,
        recorder.clone(),
        analysis,
        delivery,
    ));

    let (tx, mut rx) = mpsc::channel::<PathBuf>(256);
    let _watcher = services::watcher::start_watcher(watch_dir.clone(), tx)
        .expect("failed to start upload watcher");
    info!(dir = %watch_dir.display(), "watching upload folder");

    let _heartbeat = spawn_heartbeat(recorder, heartbeat_interval);

    // Each detected file gets its own task; orchestrations for different
    // files run concurrently, the in-flight set dedups the same path
    let dispatcher = {
        let processor = processor.clone();
        tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                let processor = processor.clone();
                tokio::spawn(async move {
                    processor.handle_event(path).await;
                });
            }
        })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    dispatcher.abort();
}
