//! Mock domain service for testing.
//!
//! Wraps an [`InMemoryStore`] so the happy path behaves like the real
//! thing, and lets tests force any operation to fail and count calls.

use super::{DomainService, InMemoryStore, MessageBody, NewChannel, ServerRow, ServiceError};

use async_trait::async_trait;
use common::{ChannelId, MessageId, RoleId, ServerId, UserId};
use dashmap::DashMap;
use std::sync::Arc;
use wire_protocol::{ChannelInfo, ChatMessage, DeletedMessage, EditedMessage, UserSummary};

/// One [`DomainService`] operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListServers,
    ListChannelsOfServer,
    ListServersOfUser,
    CreateChannel,
    DeleteChannel,
    CreateMessage,
    EditMessage,
    DeleteMessage,
    DeleteServer,
    UsersWithRoles,
}

/// Mock domain service for unit and integration tests.
#[derive(Debug)]
pub struct MockDomainService {
    store: Arc<InMemoryStore>,
    failures: DashMap<Operation, ServiceError>,
    calls: DashMap<Operation, usize>,
}

impl Default for MockDomainService {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }
}

impl MockDomainService {
    /// Mock backed by `store`.
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self {
            store,
            failures: DashMap::new(),
            calls: DashMap::new(),
        }
    }

    /// Backing store, for seeding and assertions.
    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    /// Make `operation` return `error` until [`MockDomainService::succeed`].
    pub fn fail(&self, operation: Operation, error: ServiceError) {
        self.failures.insert(operation, error);
    }

    /// Make `operation` reach the store again.
    pub fn succeed(&self, operation: Operation) {
        self.failures.remove(&operation);
    }

    /// Number of times `operation` was called.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.calls.get(&operation).map_or(0, |count| *count)
    }

    fn enter(&self, operation: Operation) -> Result<(), ServiceError> {
        *self.calls.entry(operation).or_insert(0) += 1;
        match self.failures.get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DomainService for MockDomainService {
    async fn list_servers(&self) -> Result<Vec<ServerRow>, ServiceError> {
        self.enter(Operation::ListServers)?;
        self.store.list_servers().await
    }

    async fn list_channels_of_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<ChannelInfo>, ServiceError> {
        self.enter(Operation::ListChannelsOfServer)?;
        self.store.list_channels_of_server(server_id).await
    }

    async fn list_servers_of_user(&self, user_id: &UserId) -> Result<Vec<ServerId>, ServiceError> {
        self.enter(Operation::ListServersOfUser)?;
        self.store.list_servers_of_user(user_id).await
    }

    async fn create_channel(
        &self,
        creator: &UserId,
        server_id: &ServerId,
        channel: NewChannel,
    ) -> Result<ChannelInfo, ServiceError> {
        self.enter(Operation::CreateChannel)?;
        self.store.create_channel(creator, server_id, channel).await
    }

    async fn delete_channel(
        &self,
        user: &UserId,
        server_id: &ServerId,
        channel_id: &ChannelId,
    ) -> Result<(), ServiceError> {
        self.enter(Operation::DeleteChannel)?;
        self.store.delete_channel(user, server_id, channel_id).await
    }

    async fn create_message(
        &self,
        author: &UserSummary,
        server_id: &ServerId,
        channel_id: &ChannelId,
        body: MessageBody,
    ) -> Result<ChatMessage, ServiceError> {
        self.enter(Operation::CreateMessage)?;
        self.store
            .create_message(author, server_id, channel_id, body)
            .await
    }

    async fn edit_message(
        &self,
        user: &UserId,
        channel_id: &ChannelId,
        message_id: &MessageId,
        body: MessageBody,
    ) -> Result<EditedMessage, ServiceError> {
        self.enter(Operation::EditMessage)?;
        self.store
            .edit_message(user, channel_id, message_id, body)
            .await
    }

    async fn delete_message(
        &self,
        user: &UserId,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<DeletedMessage, ServiceError> {
        self.enter(Operation::DeleteMessage)?;
        self.store.delete_message(user, channel_id, message_id).await
    }

    async fn delete_server(&self, user: &UserId, server_id: &ServerId) -> Result<(), ServiceError> {
        self.enter(Operation::DeleteServer)?;
        self.store.delete_server(user, server_id).await
    }

    async fn users_with_roles(
        &self,
        server_id: &ServerId,
        roles: &[RoleId],
    ) -> Result<Vec<UserId>, ServiceError> {
        self.enter(Operation::UsersWithRoles)?;
        self.store.users_with_roles(server_id, roles).await
    }
}
