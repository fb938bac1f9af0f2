//! WebSocket gateway.
//!
//! `GET /ws/:user_id` upgrades to a WebSocket and hands the socket to
//! [`connection::serve`], which owns one session actor for the lifetime of
//! the connection. Authentication happens upstream; the path id is trusted.

pub mod connection;

pub use connection::ConnectionEnd;

use crate::actors::ActorSystem;
use crate::config::Config;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use common::UserId;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Per-connection settings plus the actor system every connection joins.
#[derive(Clone, Debug)]
pub struct GatewayState {
    pub system: ActorSystem,
    /// Silence allowed before a connection is closed.
    pub heartbeat_deadline: Duration,
    /// Outbound frames buffered per session.
    pub outbound_buffer: usize,
    /// Bound on waiting for a session to stop.
    pub stop_timeout: Duration,
}

impl GatewayState {
    pub fn new(system: ActorSystem, config: &Config) -> Self {
        Self {
            system,
            heartbeat_deadline: config.heartbeat_deadline(),
            outbound_buffer: config.outbound_buffer,
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// Create the gateway router.
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws/:user_id", get(upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<GatewayState>,
) -> Response {
    let user_id = UserId::from(user_id);
    debug!(target: "rt.gateway", user_id = %user_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| async move {
        connection::serve(socket, user_id, state).await;
    })
}
