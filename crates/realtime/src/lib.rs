//! Realtime presence and message-routing engine.
//!
//! Tracks who is connected to which chat server, channel and voice call, and
//! fans domain events out to every live WebSocket connection that should
//! see them:
//!
//! - Server and channel membership (presence) with join-order snapshots
//! - Voice-call participants per channel
//! - Chat message creation, edits and deletions, persisted before broadcast
//! - Friend invites and direct-message channels on the reserved `global` server
//! - Heartbeat-supervised WebSocket transport
//!
//! # Architecture
//!
//! ```text
//! gateway (axum WebSocket) ──spawns──> SessionActor (sessions engine)
//!                                        │ Connect / Disconnect
//!                                        ▼
//!                     ServerActor ──owns──> ChannelActor (spaces engine)
//!                                        ▲
//! RealtimeApi (request handlers) ────────┘
//! ```
//!
//! Each actor owns its state and is driven by one mailbox; no state is shared
//! across actors. Persistence goes through the [`services::DomainService`]
//! seam.
//!
//! # Modules
//!
//! - [`engine`] - Actor registry, addressing, spawn/send/poison
//! - [`actors`] - Server, channel and session actors
//! - [`api`] - Request-facing facade over the actors
//! - [`gateway`] - WebSocket transport and heartbeat supervision
//! - [`services`] - Persistence seam and the in-memory store
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with appropriate error codes
//! - [`observability`] - Metrics and health endpoints

pub mod actors;
pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod observability;
pub mod services;
