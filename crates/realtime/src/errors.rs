//! Realtime engine error types.
//!
//! Error types map to numeric codes for HTTP-facing callers of
//! [`RealtimeApi`](crate::api::RealtimeApi). Internal details are logged
//! server-side but not exposed to clients.

use crate::config::ConfigError;
use crate::engine::{DeliveryError, SpawnError};
use crate::services::ServiceError;
use common::{ChannelId, ServerId};
use thiserror::Error;

/// Realtime engine error type.
///
/// Maps to error codes:
/// - `Forbidden`: `FORBIDDEN` (3)
/// - `*NotFound`: `NOT_FOUND` (4)
/// - `InvalidInput`, `Spawn(AlreadyRegistered)`: `CONFLICT` (5)
/// - Internal, Delivery, Spawn, Config, Unavailable: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The domain service rejected or failed the operation.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Server actor is not live.
    #[error("Server not found: {0}")]
    ServerNotFound(ServerId),

    /// Channel actor is not live.
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// Message could not be delivered to an actor.
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Actor could not be spawned.
    #[error("Spawn error: {0}")]
    Spawn(#[from] SpawnError),

    /// Actor stopped before replying.
    #[error("Actor stopped before replying: {0}")]
    NoReply(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Returns the error code value for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            RealtimeError::Service(ServiceError::Forbidden(_)) => 3, // FORBIDDEN
            RealtimeError::Service(ServiceError::NotFound(_))
            | RealtimeError::ServerNotFound(_)
            | RealtimeError::ChannelNotFound(_) => 4, // NOT_FOUND
            RealtimeError::Service(ServiceError::InvalidInput(_))
            | RealtimeError::Spawn(SpawnError::AlreadyRegistered(_)) => 5, // CONFLICT
            RealtimeError::Service(ServiceError::Unavailable(_))
            | RealtimeError::Delivery(_)
            | RealtimeError::Spawn(_)
            | RealtimeError::NoReply(_)
            | RealtimeError::Config(_)
            | RealtimeError::Internal(_) => 6, // INTERNAL_ERROR
        }
    }

    /// Returns a bounded label string for the error variant (for metrics).
    ///
    /// Uses enum variant names, not error message content.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            RealtimeError::Service(ServiceError::Forbidden(_)) => "forbidden",
            RealtimeError::Service(ServiceError::NotFound(_)) => "not_found",
            RealtimeError::Service(ServiceError::InvalidInput(_)) => "invalid_input",
            RealtimeError::Service(ServiceError::Unavailable(_)) => "service_unavailable",
            RealtimeError::ServerNotFound(_) => "server_not_found",
            RealtimeError::ChannelNotFound(_) => "channel_not_found",
            RealtimeError::Delivery(_) => "delivery",
            RealtimeError::Spawn(_) => "spawn",
            RealtimeError::NoReply(_) => "no_reply",
            RealtimeError::Config(_) => "config",
            RealtimeError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            RealtimeError::Service(ServiceError::Forbidden(msg))
            | RealtimeError::Service(ServiceError::InvalidInput(msg)) => msg.clone(),
            RealtimeError::Service(ServiceError::NotFound(_)) => "Resource not found".to_string(),
            RealtimeError::ServerNotFound(_) => "Server not found".to_string(),
            RealtimeError::ChannelNotFound(_) => "Channel not found".to_string(),
            RealtimeError::Spawn(SpawnError::AlreadyRegistered(_)) => {
                "Resource already exists".to_string()
            }
            RealtimeError::Service(ServiceError::Unavailable(_))
            | RealtimeError::Delivery(_)
            | RealtimeError::Spawn(_)
            | RealtimeError::NoReply(_)
            | RealtimeError::Config(_)
            | RealtimeError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
