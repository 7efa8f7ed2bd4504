mod config;
mod pending;
mod pipeline;
mod web;
mod webrtc_peer;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::web::AppState;

fn parse_args() -> (PathBuf, Option<u16>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("./config/gateway.toml");
    let mut port_override = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    (config_path, port_override)
}

/// Scans every registered session every 10 seconds and closes those that
/// have gone quiet past `idle_timeout_sec` (spec.md §4.7 idle watchdog, C11).
async fn run_idle_reaper(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        let timeout_ms = state.config.session.idle_timeout_sec * 1000;
        let idle = state
            .registry
            .idle_sessions(gateway_core::now_ms(), timeout_ms)
            .await;
        for session_id in idle {
            if let Some(orchestrator) = state.registry.get(&session_id).await {
                tracing::info!(session_id, "closing idle session");
                orchestrator.on_idle_timeout().await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config_path, port_override) = parse_args();
    let mut config =
        config::load_config(&config_path).context("failed to load configuration")?;
    if let Some(port) = port_override {
        config.server.port = port;
    }

    if let Err(issues) = config.validate() {
        let has_error = issues.iter().any(|i| i.starts_with("ERROR"));
        for issue in &issues {
            if issue.starts_with("ERROR") {
                tracing::error!("{issue}");
            } else {
                tracing::warn!("{issue}");
            }
        }
        if has_error {
            std::process::exit(1);
        }
    }

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let state = Arc::new(AppState::new(config)?);

    let reaper_state = state.clone();
    let reaper = tokio::spawn(run_idle_reaper(reaper_state));

    let app = web::build_router(state.clone());
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .context("invalid server.bind/server.port")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server loop exited with an error")?;

    reaper.abort();
    tracing::info!("stopping active sessions");
    state.registry.shutdown_all().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
