//! Observability for the realtime engine.
//!
//! # Privacy by Default
//!
//! Actor run loops use `#[instrument(skip_all)]` and record only PIDs.
//! Message content never reaches logs or metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rt_sessions_active` | Gauge | none | Live WebSocket sessions |
//! | `rt_actors_active` | Gauge | `actor_type` | Live actors per kind |
//! | `rt_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `rt_actor_panics_total` | Counter | `actor_type` | Bugs |
//! | `rt_messages_dropped_total` | Counter | `actor_type` | Full outbound queues |
//! | `rt_delivery_failures_total` | Counter | `reason` | Sends to dead or stale PIDs |
//! | `rt_message_latency_seconds` | Histogram | `message_type` | Handler latency |
//! | `rt_heartbeat_timeouts_total` | Counter | none | Connections closed by deadline |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
