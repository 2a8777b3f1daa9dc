//! aihub gateway binary.
//!
//! - Loads and validates the YAML config
//! - Serves ops endpoints and the tenant proxy
//! - `SIGHUP` reloads tenants, Ctrl-C/`SIGTERM` drains then stops

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use aihub_core::error::{GatewayError, Result};
use aihub_gateway::{app_state::AppState, config, router};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "aihub-gateway", version, about = "Tenant-aware gateway for Azure AI services")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, env = "AIHUB_CONFIG", default_value = "aihub.yaml")]
    config: String,

    #[arg(long, env = "AIHUB_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(filter).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "aihub-gateway exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_from_file(&cli.config)?;
    let listen = cfg.gateway.listen_addr()?;
    let drain_grace = Duration::from_millis(cfg.gateway.drain_grace_ms);

    let state = AppState::new(cfg)?;
    let app = router::build_router(state.clone());

    spawn_reload_on_sighup(state.clone(), cli.config.clone());

    tracing::info!(%listen, tenants = state.registry().snapshot().len(), "aihub-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| GatewayError::Internal(format!("bind {listen} failed: {e}")))?;

    let drain_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            drain_state.set_draining();
            tracing::info!(grace_ms = drain_grace.as_millis() as u64, "draining");
            tokio::time::sleep(drain_grace).await;
            drain_state.shutdown_token().cancel();
        })
        .await
        .map_err(|e| GatewayError::Internal(format!("server failed: {e}")))?;

    tracing::info!("aihub-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
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
}

#[cfg(unix)]
fn spawn_reload_on_sighup(state: AppState, path: String) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP handler unavailable; reload disabled");
                return;
            }
        };
        while hup.recv().await.is_some() {
            match config::load_from_file(&path).and_then(|cfg| state.reload(&cfg)) {
                Ok(()) => tracing::info!(path = %path, "config reloaded"),
                Err(e) => tracing::error!(path = %path, error = %e, "config reload rejected"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_state: AppState, _path: String) {}
