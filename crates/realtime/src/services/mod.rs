//! Domain service seam.
//!
//! Actors never touch storage directly. Every persistence-backed transition
//! goes through [`DomainService`], which also owns authorization (server
//! ownership, message authorship). The engine only decides *who hears about*
//! a change once the service has accepted it.

pub mod memory;
pub mod mock;

pub use memory::{InMemoryStore, Seed};

use async_trait::async_trait;
use common::{ChannelId, MessageId, RoleId, ServerId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wire_protocol::{ChannelInfo, ChannelType, ChatMessage, DeletedMessage, EditedMessage, UserSummary};

/// Domain service failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backing store is unreachable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Persisted server row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRow {
    pub id: ServerId,
    pub owner_id: UserId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// Channel creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChannel {
    /// Preassigned id (direct-message channels), otherwise generated.
    #[serde(default)]
    pub id: Option<ChannelId>,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub description: String,
    /// Users explicitly targeted by the channel.
    #[serde(default)]
    pub users: Vec<UserId>,
    /// Roles explicitly targeted by the channel.
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

impl NewChannel {
    /// Text channel with no targeting.
    #[must_use]
    pub fn textual(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            channel_type: ChannelType::Textual,
            description: String::new(),
            users: Vec::new(),
            roles: Vec::new(),
            x: 0,
            y: 0,
        }
    }

    /// Whether creation is announced only to targeted users and roles.
    #[must_use]
    pub fn is_targeted(&self) -> bool {
        !self.users.is_empty() || !self.roles.is_empty()
    }
}

/// Message content for creation and edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub content: serde_json::Value,
    #[serde(default)]
    pub mentions_users: Vec<UserId>,
    #[serde(default)]
    pub mentions_channels: Vec<ChannelId>,
    #[serde(default)]
    pub everyone: bool,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl MessageBody {
    /// Plain-text body with no mentions.
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self {
            content: serde_json::json!({ "type": "doc", "text": text }),
            mentions_users: Vec::new(),
            mentions_channels: Vec::new(),
            everyone: false,
            attachments: Vec::new(),
        }
    }
}

/// Persistence and authorization used by the actors.
#[async_trait]
pub trait DomainService: Send + Sync {
    /// Every persisted server, loaded once at process start.
    async fn list_servers(&self) -> Result<Vec<ServerRow>, ServiceError>;

    /// Channels of one server.
    async fn list_channels_of_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<ChannelInfo>, ServiceError>;

    /// Servers the user is a member of. Never includes the global server.
    async fn list_servers_of_user(&self, user_id: &UserId) -> Result<Vec<ServerId>, ServiceError>;

    /// Persist a channel. `creator` must own the server unless it is the
    /// global user.
    async fn create_channel(
        &self,
        creator: &UserId,
        server_id: &ServerId,
        channel: NewChannel,
    ) -> Result<ChannelInfo, ServiceError>;

    /// Delete a channel. `user` must own the server.
    async fn delete_channel(
        &self,
        user: &UserId,
        server_id: &ServerId,
        channel_id: &ChannelId,
    ) -> Result<(), ServiceError>;

    /// Persist a message. The author must be able to see the channel.
    async fn create_message(
        &self,
        author: &UserSummary,
        server_id: &ServerId,
        channel_id: &ChannelId,
        body: MessageBody,
    ) -> Result<ChatMessage, ServiceError>;

    /// Replace a message's content. Only the author may edit.
    async fn edit_message(
        &self,
        user: &UserId,
        channel_id: &ChannelId,
        message_id: &MessageId,
        body: MessageBody,
    ) -> Result<EditedMessage, ServiceError>;

    /// Delete a message. Only the author may delete.
    async fn delete_message(
        &self,
        user: &UserId,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<DeletedMessage, ServiceError>;

    /// Delete a server and its channels. `user` must own it.
    async fn delete_server(&self, user: &UserId, server_id: &ServerId) -> Result<(), ServiceError>;

    /// Members of the server holding any of `roles`.
    async fn users_with_roles(
        &self,
        server_id: &ServerId,
        roles: &[RoleId],
    ) -> Result<Vec<UserId>, ServiceError>;
}
