//! Common types shared across the realtime workspace.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

pub use types::{ChannelId, MessageId, RoleId, ServerId, UserId, GLOBAL_SERVER_ID};
