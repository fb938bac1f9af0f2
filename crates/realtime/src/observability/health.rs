//! Liveness and readiness probes.
//!
//! - `GET /health` answers 200 while the process runs.
//! - `GET /ready` answers 200 only while the engine is serving, with a
//!   JSON body naming the phase and how many actors each engine hosts.
//!
//! The phase moves `starting -> serving -> draining` and never back. `main`
//! flips it to serving once every persisted server actor is up, and to
//! draining before any session is stopped.

use crate::actors::ActorSystem;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle phase reported by `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Starting,
    Serving,
    Draining,
}

impl Phase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Serving,
            2 => Phase::Draining,
            _ => Phase::Starting,
        }
    }
}

/// Readiness payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub phase: Phase,
    pub spaces: usize,
    pub sessions: usize,
}

/// Probe state shared with the handlers.
#[derive(Debug)]
pub struct HealthState {
    phase: AtomicU8,
    system: ActorSystem,
}

impl HealthState {
    /// Probe state for `system`, starting in [`Phase::Starting`].
    #[must_use]
    pub fn new(system: ActorSystem) -> Self {
        Self {
            phase: AtomicU8::new(Phase::Starting as u8),
            system,
        }
    }

    /// Spaces are bootstrapped; accept connections.
    pub fn set_ready(&self) {
        let _ = self.phase.compare_exchange(
            Phase::Starting as u8,
            Phase::Serving as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Shutdown has begun.
    pub fn set_not_ready(&self) {
        self.phase.store(Phase::Draining as u8, Ordering::SeqCst);
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Serving
    }

    fn readiness(&self) -> Readiness {
        Readiness {
            phase: self.phase(),
            spaces: self.system.spaces.len(),
            sessions: self.system.sessions.len(),
        }
    }
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<Readiness>) {
    let status = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(state.readiness()))
}
