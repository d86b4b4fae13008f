//! wwf-locations - filming-locations lookup service
//!
//! Serves the locations pipeline over HTTP: lookup, single-place geocoding,
//! background pipeline runs with live progress over SSE, and search history.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wwf_common::config::{load_service_config, load_toml_config};
use wwf_common::events::EventBus;
use wwf_locations::config::ServiceConfig;
use wwf_locations::{build_router, db, AppState};

/// Command-line arguments for wwf-locations
#[derive(Parser, Debug)]
#[command(name = "wwf-locations")]
#[command(about = "Filming-locations lookup service")]
#[command(version)]
struct Args {
    /// Explicit TOML config file (default: <config dir>/wwf/wwf-locations.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address override, e.g. 0.0.0.0:5730
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing so its log level can seed the filter
    let toml = match &args.config {
        Some(path) => load_toml_config(path),
        None => load_service_config("wwf-locations"),
    }
    .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("wwf_locations={0},wwf_common={0},tower_http=info", toml.logging.level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting wwf-locations v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let mut config = ServiceConfig::resolve(&toml).context("Invalid configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    info!("Database path: {}", config.database_path.display());
    let pool = db::init_database_pool(&config.database_path).await?;
    info!("✓ Database ready");

    let event_bus = EventBus::new(100);
    let state = AppState::from_config(&config, pool, event_bus)?;
    let app = build_router(state);

    info!("Listening on http://{}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
