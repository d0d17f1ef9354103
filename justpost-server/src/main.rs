//! justpost-server - HTTP API for connecting platforms and publishing posts

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use justpost_server::{router, AppState};
use libjustpost::logging::{LogFormat, LoggingConfig};
use libjustpost::store::{Sealer, SecretStore, SqliteBackend};
use libjustpost::{Config, Connectors, JustPostError};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Parser, Debug)]
#[command(name = "justpost-server")]
#[command(version, about = "Connect social accounts and publish to all of them at once", long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to $JUSTPOST_CONFIG or the XDG config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding server.bind
    #[arg(short, long)]
    bind: Option<String>,

    /// Log output format (text, json or pretty)
    #[arg(long, env = "JUSTPOST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "Server stopped");
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<JustPostError>()
            .map(JustPostError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    config.validate()?;

    let sealer = Sealer::from_secret_key(config.store.require_encryption_key()?)
        .map_err(JustPostError::from)?;
    let db_path = config.store.expanded_path();
    let backend = Arc::new(
        SqliteBackend::connect(&db_path)
            .await
            .map_err(JustPostError::from)
            .with_context(|| format!("Failed to open secret store at {}", db_path.display()))?,
    );
    let store = SecretStore::new(backend.clone(), sealer);
    spawn_purge_task(backend);

    let connectors = Connectors::from_config(&config, store.clone())?;
    info!(platforms = ?connectors.platforms(), "Connectors ready");

    let state = AppState::from_config(&config.server, connectors, store)?;
    let app = router(state);

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(address = %config.server.bind, "Listening");

    let signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;
    let handle = signals.handle();

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(signals))
        .await
        .context("Server error")?;

    handle.close();
    info!("Server stopped");
    Ok(())
}

async fn wait_for_shutdown(mut signals: Signals) {
    if let Some(signal) = signals.next().await {
        info!(signal, "Received shutdown signal, stopping gracefully...");
    }
}

/// Drop expired pending logins and tokens in the background.
fn spawn_purge_task(backend: Arc<SqliteBackend>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match backend.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Purged expired secrets"),
                Err(e) => warn!(error = %e, "Failed to purge expired secrets"),
            }
        }
    });
}
