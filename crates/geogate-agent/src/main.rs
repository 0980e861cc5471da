//! # geogate-agent
//!
//! Runs the geofence engine next to the platform bridge.
//!
//! This binary provides:
//! - REST API for the geofence lifecycle, location delivery and door state
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package geogate-agent
//!
//! # With an explicit config file
//! GEOGATE_CONFIG=./config.toml ./geogate-agent
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use geogate_agent::{api, logging, state::AppState};
use geogate_core::{GeofenceNotice, GeogateConfig};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GeogateConfig::load().context("failed to load configuration")?;
    logging::init(config.server.production)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        api = %config.api.base_url,
        "Starting geogate-agent"
    );

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let state = AppState::new(config).await?;
    tokio::spawn(log_notices(state.engine().subscribe()));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, api::create_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine().shutdown().await;
    info!("geogate-agent stopped");
    Ok(())
}

/// Surface engine notices in the log, where the bridge's alert would go.
async fn log_notices(mut notices: broadcast::Receiver<GeofenceNotice>) {
    loop {
        match notices.recv().await {
            Ok(GeofenceNotice::AutoValidated { message }) => {
                info!(?message, "Door auto-validated");
            }
            Ok(GeofenceNotice::ForegroundOnly) => {
                warn!("Background location denied, auto-validation only works in the foreground");
            }
            Ok(GeofenceNotice::AuthorizationRevoked { message }) => {
                warn!(%message, "Authorization revoked, auto-validation turned off");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Dropped geofence notices");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Could not install signal handlers, falling back to Ctrl+C");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler failed");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}
