#![forbid(unsafe_code)]

//! `craftplane`: game-server control plane binary.
//!
//! Bootstraps configuration, starts the acquisition worker and the session
//! registry, and serves the WebSocket control channel until a shutdown
//! signal arrives.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use craftplane::config::GlobalConfig;
use craftplane::control::server::{self, ControlState};
use craftplane::driver::DriverSet;
use craftplane::orchestrator::acquisition::AcquisitionQueue;
use craftplane::orchestrator::registry::{RegistrySettings, SessionRegistry};
use craftplane::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "craftplane", about = "Game-server control plane", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the control-channel listening port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("craftplane bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    info!(build_dir = %config.build_dir.display(), "configuration loaded");

    // ── Bind the control channel ────────────────────────
    let bind = format!("{}:{}", config.listen_address, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;
    let control_port = listener
        .local_addr()
        .map_err(|err| AppError::Config(format!("failed to read bound address: {err}")))?
        .port();

    // ── Build orchestration ─────────────────────────────
    let drivers = DriverSet::builtin(&config)?;
    info!(kinds = ?drivers.kinds(), "worker drivers registered");

    let queue_ct = CancellationToken::new();
    let (queue, queue_handle) = AcquisitionQueue::start(queue_ct.clone());
    let registry = SessionRegistry::new(
        drivers,
        queue,
        RegistrySettings::from_config(&config, control_port),
    );

    // ── Serve ───────────────────────────────────────────
    let server_ct = CancellationToken::new();
    let state = ControlState {
        registry: registry.clone(),
        client_buffer: config.client_buffer,
        ct: server_ct.clone(),
    };
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(listener, state).await {
            error!(%err, "control channel failed");
        }
    });

    info!(port = control_port, "craftplane ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    // Abandon queued acquisitions, then stop running workers while clients
    // are still connected to see them close.
    queue_ct.cancel();
    registry.shutdown(config.shutdown_grace()).await;
    server_ct.cancel();

    let _ = tokio::join!(server_handle, queue_handle);
    info!("craftplane shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
