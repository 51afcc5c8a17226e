pub mod heartbeat;
pub mod watcher;
