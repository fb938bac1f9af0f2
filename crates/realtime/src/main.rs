//! Realtime engine
//!
//! Presence and message-routing server for chat spaces, channels, direct
//! messages and voice-call presence.
//!
//! # Servers
//!
//! - WebSocket gateway for clients (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the store (seed file if configured)
//! 4. Create the spaces and sessions engines
//! 5. Spawn a server actor per persisted server, plus `global`
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Start the WebSocket gateway
//! 8. Mark ready and wait for shutdown signal
//!
//! # Shutdown Flow
//!
//! Not ready, stop accepting connections, stop every session (each one
//! disconnects from the still-running spaces), then stop the spaces.

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use realtime::actors::ActorSystem;
use realtime::config::Config;
use realtime::gateway::{gateway_router, GatewayState};
use realtime::observability::{health_router, init_metrics_recorder, HealthState};
use realtime::services::memory::InMemoryStore;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting realtime engine");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        heartbeat_interval_seconds = config.heartbeat_interval_seconds,
        heartbeat_wait_seconds = config.heartbeat_wait_seconds,
        outbound_buffer = config.outbound_buffer,
        stop_timeout_seconds = config.stop_timeout_seconds,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let store = match &config.seed_file {
        Some(path) => InMemoryStore::from_file(path).map_err(|e| {
            error!(error = %e, path = %path.display(), "Failed to load seed file");
            e
        })?,
        None => InMemoryStore::new(),
    };

    // Initialize actor system
    let system = ActorSystem::new(Arc::new(store), config.stop_timeout());
    let servers = system.bootstrap_spaces().await.map_err(|e| {
        error!(error = %e, "Failed to bootstrap server actors");
        e
    })?;
    info!(servers, "Actor system initialized");

    let health_state = Arc::new(HealthState::new(system.clone()));

    let shutdown_token = CancellationToken::new();

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_task = serve(
        "health",
        &config.health_bind_address,
        health_router(Arc::clone(&health_state)).merge(metrics_router),
        shutdown_token.child_token(),
    )
    .await?;

    let gateway_task = serve(
        "gateway",
        &config.bind_address,
        gateway_router(GatewayState::new(system.clone(), &config)),
        shutdown_token.child_token(),
    )
    .await?;

    health_state.set_ready();
    info!("Realtime engine ready");
    shutdown_signal().await;

    info!("Shutdown signal received, draining");
    health_state.set_not_ready();

    // Stop accepting connections. Open WebSockets end once their sessions stop.
    shutdown_token.cancel();

    let stop_timeout = config.stop_timeout() * 2;
    if !system.sessions.shutdown(stop_timeout).await {
        warn!("Sessions did not stop in time");
    }
    if !system.spaces.shutdown(stop_timeout).await {
        warn!("Spaces did not stop in time");
    }

    if tokio::time::timeout(stop_timeout, gateway_task).await.is_err() {
        warn!("Gateway did not drain in time");
    }
    let _ = health_task.await;

    info!("Realtime engine shutdown complete");
    Ok(())
}

/// Bind `addr` and serve `router` until `shutdown` fires.
///
/// Binding happens before spawning so a bad address fails startup.
async fn serve(
    name: &'static str,
    addr: &str,
    router: Router,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>, Box<dyn std::error::Error>> {
    let addr: SocketAddr = addr.parse().map_err(|e| {
        error!(server = name, error = %e, addr, "Invalid bind address");
        format!("Invalid {name} bind address {addr}: {e}")
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(server = name, error = %e, addr = %addr, "Failed to bind");
        format!("Failed to bind {name} to {addr}: {e}")
    })?;

    Ok(tokio::spawn(async move {
        info!(server = name, addr = %addr, "Listening");
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!(server = name, "Stopped accepting connections");
        });
        if let Err(e) = server.await {
            error!(server = name, error = %e, "Server failed");
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "No way to shut down cleanly without a signal handler"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "No way to shut down cleanly without a signal handler"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
