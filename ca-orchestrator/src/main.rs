//! Content-analysis orchestrator - Main entry point
//!
//! Loads the bootstrap configuration, opens the database, seeds the backend
//! registry and serves the HTTP API until ctrl-c or SIGTERM.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use ca_common::config::{load_or_default, TomlConfig};
use ca_orchestrator::scheduler::spawn_retry_sweep;
use ca_orchestrator::{build_router, AppState};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_ENV_VAR: &str = "CA_CONFIG";

/// Command-line arguments for ca-orchestrator
#[derive(Parser, Debug)]
#[command(name = "ca-orchestrator")]
#[command(about = "Distributes content analysis work to analysis backends")]
#[command(version)]
struct Args {
    /// Path to the TOML bootstrap configuration
    #[arg(short, long, env = "CA_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "CA_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(short, long, env = "CA_DATABASE")]
    database: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(short, long, env = "CA_BIND")]
    bind: Option<String>,
}

fn apply_overrides(mut config: TomlConfig, args: &Args) -> TomlConfig {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = &args.database {
        config.database_path = Some(database.clone());
    }
    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    config
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| "ca_orchestrator=info,ca_common=info,tower_http=info".into());

    let (file_layer, stderr_layer) = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            (
                Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
                None,
            )
        }
        None => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_or_default(args.config.as_deref(), CONFIG_ENV_VAR)
        .context("Failed to load configuration")?;
    let config = apply_overrides(config, &args);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        "Starting content-analysis orchestrator"
    );

    let db_path = config.resolved_database_path();
    info!("Database: {}", db_path.display());
    let db = ca_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let shutdown = CancellationToken::new();
    let state = AppState::new(db.clone(), config.clone(), shutdown.clone())
        .context("Failed to initialize services")?;

    for backend in &config.backends {
        state
            .registry
            .upsert(&backend.to_backend())
            .await
            .with_context(|| format!("Failed to register backend {}", backend.backend_id))?;
        info!(
            backend_id = backend.backend_id,
            endpoint = %backend.endpoint,
            enabled = backend.enabled,
            "Backend registered"
        );
    }

    let sweep = if config.retry_sweep_interval_secs > 0 {
        Some(spawn_retry_sweep(
            db,
            state.scheduler.clone(),
            Duration::from_secs(config.retry_sweep_interval_secs),
            shutdown.clone(),
        ))
    } else {
        info!("Retry sweep disabled");
        None
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(sweep) = sweep {
        if let Err(e) = sweep.await {
            warn!(error = %e, "Retry sweep ended abnormally");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
