//! Abode application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration (file, env, flags)
//! 2. Initialize tracing
//! 3. Open the SQLite database (migrations run on open)
//! 4. Build the LLM client and the shared API state
//! 5. Start the expired-session purge loop
//! 6. Serve the axum API until Ctrl-C

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use abode_api::routes;
use abode_api::state::AppState;
use abode_chat::{ChatOrchestrator, LlmClient};
use abode_core::config::AbodeConfig;
use abode_storage::Database;

use cli::CliArgs;

/// Periodically delete sessions whose window has closed.
async fn purge_loop(orchestrator: Arc<ChatOrchestrator>, interval_hours: u32) {
    let period = Duration::from_secs(u64::from(interval_hours.max(1)) * 3600);
    tracing::info!(interval_hours, "Session purge loop started");

    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match orchestrator.purge_expired() {
            Ok(0) => tracing::debug!("No expired sessions to purge"),
            Ok(n) => tracing::info!(purged = n, "Expired sessions purged"),
            Err(e) => tracing::warn!(error = %e, "Session purge failed"),
        }
    }
}

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    match data_dir.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(data_dir),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config: file < environment < flags.
    let config_file = args.resolve_config_path();
    let mut config = AbodeConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    args.apply_to(&mut config);

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Abode v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("abode.db");
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // LLM client.
    let llm = LlmClient::new(&config.llm)?;
    if llm.is_configured() {
        tracing::info!(model = %config.llm.model, "LLM client configured");
    } else {
        tracing::warn!("LLM_API_KEY not set; complex messages will get a canned apology");
    }

    let port = config.general.port;
    let purge_hours = config.chat.purge_interval_hours;
    let state = AppState::new(config, db, Arc::new(llm));

    // === Background tasks ===
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        purge_loop(orchestrator, purge_hours).await;
    });

    // === API server ===
    let addr = format!("0.0.0.0:{}", port);
    let router = routes::create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind - is another instance running?");
            tracing::error!("Try: abode --port {}", port.saturating_add(1));
            return Err(e.into());
        }
    };

    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
