use scrubrelay::config::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env - check current dir first, then the parent
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path("../.env");
    }

    // Initialize tracing with RUST_LOG env filter
    // Use RUST_LOG=debug for verbose per-file logs
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,scrubrelay=info")),
        )
        .init();

    let settings = Settings::from_env();
    scrubrelay::run(settings).await;
}
