//! In-memory [`DomainService`] for development and tests.
//!
//! Rows live behind one `tokio::sync::RwLock`. The store can be seeded from
//! a JSON document (see [`Seed`]) so the binary boots with persisted
//! servers and channels.

use super::{DomainService, MessageBody, NewChannel, ServerRow, ServiceError};

use async_trait::async_trait;
use chrono::Utc;
use common::{ChannelId, MessageId, RoleId, ServerId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;
use wire_protocol::{ChannelInfo, ChannelType, ChatMessage, DeletedMessage, EditedMessage, UserSummary};

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME: usize = 50;

/// Maximum channel description length.
pub const MAX_CHANNEL_DESCRIPTION: usize = 280;

/// Role assignment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRow {
    pub server_id: ServerId,
    pub role_id: RoleId,
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// Initial store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub servers: Vec<ServerRow>,
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
    #[serde(default)]
    pub roles: Vec<RoleRow>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    author: UserId,
    server_id: ServerId,
    channel_id: ChannelId,
}

#[derive(Debug, Default)]
struct State {
    servers: BTreeMap<ServerId, ServerRow>,
    channels: BTreeMap<ChannelId, ChannelInfo>,
    roles: HashMap<(ServerId, RoleId), Vec<UserId>>,
    messages: HashMap<MessageId, StoredMessage>,
}

impl State {
    fn owns(&self, user: &UserId, server_id: &ServerId) -> Result<(), ServiceError> {
        let server = self
            .servers
            .get(server_id)
            .ok_or_else(|| ServiceError::NotFound(format!("server {server_id}")))?;
        if server.owner_id == *user {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "{user} does not own server {server_id}"
            )))
        }
    }

    fn channel_in(&self, server_id: &ServerId, channel_id: &ChannelId) -> Result<&ChannelInfo, ServiceError> {
        self.channels
            .get(channel_id)
            .filter(|channel| channel.server_id == *server_id)
            .ok_or_else(|| ServiceError::NotFound(format!("channel {channel_id}")))
    }

    fn can_post(&self, user: &UserId, channel: &ChannelInfo) -> bool {
        if channel.server_id.is_global() {
            return channel.users.contains(user);
        }
        self.servers
            .get(&channel.server_id)
            .is_some_and(|server| server.owner_id == *user || server.members.contains(user))
    }
}

/// Seedable in-memory domain store.
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store. The global server always exists.
    #[must_use]
    pub fn new() -> Self {
        Self::from_seed(Seed::default())
    }

    /// Store preloaded with `seed`.
    #[must_use]
    pub fn from_seed(seed: Seed) -> Self {
        let mut state = State::default();
        state.servers.insert(
            ServerId::global(),
            ServerRow {
                id: ServerId::global(),
                owner_id: UserId::global(),
                name: "global".to_string(),
                members: Vec::new(),
            },
        );
        for server in seed.servers {
            state.servers.insert(server.id.clone(), server);
        }
        for channel in seed.channels {
            state.channels.insert(channel.id.clone(), channel);
        }
        for role in seed.roles {
            state.roles.insert((role.server_id, role.role_id), role.members);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Load a seed document from disk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ServiceError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::InvalidInput(format!("{}: {e}", path.display())))?;
        let seed: Seed = serde_json::from_str(&raw)
            .map_err(|e| ServiceError::InvalidInput(format!("{}: {e}", path.display())))?;
        info!(
            target: "rt.services",
            servers = seed.servers.len(),
            channels = seed.channels.len(),
            "Loaded seed file"
        );
        Ok(Self::from_seed(seed))
    }

    /// Create a server owned by `owner`, who is also its first member.
    pub async fn insert_server(&self, id: ServerId, owner: UserId, name: impl Into<String>) -> ServerRow {
        let row = ServerRow {
            id: id.clone(),
            members: vec![owner.clone()],
            owner_id: owner,
            name: name.into(),
        };
        self.state.write().await.servers.insert(id, row.clone());
        row
    }

    /// Record `user` as a member of `server_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown server.
    pub async fn add_member(&self, server_id: &ServerId, user: UserId) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        let server = state
            .servers
            .get_mut(server_id)
            .ok_or_else(|| ServiceError::NotFound(format!("server {server_id}")))?;
        if !server.members.contains(&user) {
            server.members.push(user);
        }
        Ok(())
    }

    /// Drop `user` from `server_id`'s members.
    pub async fn remove_member(&self, server_id: &ServerId, user: &UserId) {
        if let Some(server) = self.state.write().await.servers.get_mut(server_id) {
            server.members.retain(|member| member != user);
        }
    }

    /// Grant `role_id` to `user` on `server_id`.
    pub async fn assign_role(&self, server_id: &ServerId, role_id: &RoleId, user: UserId) {
        let mut state = self.state.write().await;
        let members = state
            .roles
            .entry((server_id.clone(), role_id.clone()))
            .or_default();
        if !members.contains(&user) {
            members.push(user);
        }
    }

    /// Current server row.
    pub async fn server(&self, server_id: &ServerId) -> Option<ServerRow> {
        self.state.read().await.servers.get(server_id).cloned()
    }

    /// Current channel row.
    pub async fn channel(&self, channel_id: &ChannelId) -> Option<ChannelInfo> {
        self.state.read().await.channels.get(channel_id).cloned()
    }
}

#[async_trait]
impl DomainService for InMemoryStore {
    async fn list_servers(&self) -> Result<Vec<ServerRow>, ServiceError> {
        Ok(self.state.read().await.servers.values().cloned().collect())
    }

    async fn list_channels_of_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<ChannelInfo>, ServiceError> {
        let state = self.state.read().await;
        if !state.servers.contains_key(server_id) {
            return Err(ServiceError::NotFound(format!("server {server_id}")));
        }
        Ok(state
            .channels
            .values()
            .filter(|channel| channel.server_id == *server_id)
            .cloned()
            .collect())
    }

    async fn list_servers_of_user(&self, user_id: &UserId) -> Result<Vec<ServerId>, ServiceError> {
        Ok(self
            .state
            .read()
            .await
            .servers
            .values()
            .filter(|server| !server.id.is_global() && server.members.contains(user_id))
            .map(|server| server.id.clone())
            .collect())
    }

    async fn create_channel(
        &self,
        creator: &UserId,
        server_id: &ServerId,
        channel: NewChannel,
    ) -> Result<ChannelInfo, ServiceError> {
        if channel.name.is_empty() || channel.name.chars().count() > MAX_CHANNEL_NAME {
            return Err(ServiceError::InvalidInput(format!(
                "channel name must be 1 to {MAX_CHANNEL_NAME} characters"
            )));
        }
        if channel.description.chars().count() > MAX_CHANNEL_DESCRIPTION {
            return Err(ServiceError::InvalidInput(format!(
                "channel description exceeds {MAX_CHANNEL_DESCRIPTION} characters"
            )));
        }
        if channel.channel_type == ChannelType::Dm && !server_id.is_global() {
            return Err(ServiceError::InvalidInput(
                "direct-message channels live on the global server".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if !creator.is_global() {
            state.owns(creator, server_id)?;
        } else if !state.servers.contains_key(server_id) {
            return Err(ServiceError::NotFound(format!("server {server_id}")));
        }

        let id = channel.id.unwrap_or_default();
        if state.channels.contains_key(&id) {
            return Err(ServiceError::InvalidInput(format!("channel {id} already exists")));
        }

        let now = Utc::now();
        let info = ChannelInfo {
            id: id.clone(),
            server_id: server_id.clone(),
            name: channel.name,
            channel_type: channel.channel_type,
            description: channel.description,
            users: channel.users,
            roles: channel.roles,
            x: channel.x,
            y: channel.y,
            created_at: now,
            updated_at: now,
        };
        state.channels.insert(id, info.clone());
        Ok(info)
    }

    async fn delete_channel(
        &self,
        user: &UserId,
        server_id: &ServerId,
        channel_id: &ChannelId,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        state.owns(user, server_id)?;
        state.channel_in(server_id, channel_id)?;
        state.channels.remove(channel_id);
        state.messages.retain(|_, message| message.channel_id != *channel_id);
        Ok(())
    }

    async fn create_message(
        &self,
        author: &UserSummary,
        server_id: &ServerId,
        channel_id: &ChannelId,
        body: MessageBody,
    ) -> Result<ChatMessage, ServiceError> {
        let mut state = self.state.write().await;
        let channel = state.channel_in(server_id, channel_id)?;
        if !state.can_post(&author.id, channel) {
            return Err(ServiceError::Forbidden(format!(
                "{} cannot post in channel {channel_id}",
                author.id
            )));
        }

        let id = MessageId::new();
        let now = Utc::now();
        state.messages.insert(
            id.clone(),
            StoredMessage {
                author: author.id.clone(),
                server_id: server_id.clone(),
                channel_id: channel_id.clone(),
            },
        );
        Ok(ChatMessage {
            id,
            author: author.clone(),
            server_id: server_id.clone(),
            channel_id: channel_id.clone(),
            content: body.content,
            mentions_users: body.mentions_users,
            mentions_channels: body.mentions_channels,
            everyone: body.everyone,
            attachments: body.attachments,
            created_at: now,
            updated_at: now,
        })
    }

    async fn edit_message(
        &self,
        user: &UserId,
        channel_id: &ChannelId,
        message_id: &MessageId,
        body: MessageBody,
    ) -> Result<EditedMessage, ServiceError> {
        let state = self.state.read().await;
        let message = authored(&state, user, channel_id, message_id)?;
        Ok(EditedMessage {
            message_id: message_id.clone(),
            server_id: message.server_id.clone(),
            channel_id: message.channel_id.clone(),
            content: body.content,
            mentions_users: body.mentions_users,
            mentions_channels: body.mentions_channels,
            everyone: body.everyone,
            updated_at: Utc::now(),
        })
    }

    async fn delete_message(
        &self,
        user: &UserId,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<DeletedMessage, ServiceError> {
        let mut state = self.state.write().await;
        let message = authored(&state, user, channel_id, message_id)?.clone();
        state.messages.remove(message_id);
        Ok(DeletedMessage {
            message_id: message_id.clone(),
            server_id: message.server_id,
            channel_id: message.channel_id,
        })
    }

    async fn delete_server(&self, user: &UserId, server_id: &ServerId) -> Result<(), ServiceError> {
        if server_id.is_global() {
            return Err(ServiceError::Forbidden("the global server cannot be deleted".to_string()));
        }
        let mut state = self.state.write().await;
        state.owns(user, server_id)?;
        state.servers.remove(server_id);
        let removed: HashSet<ChannelId> = state
            .channels
            .values()
            .filter(|channel| channel.server_id == *server_id)
            .map(|channel| channel.id.clone())
            .collect();
        state.channels.retain(|id, _| !removed.contains(id));
        state.messages.retain(|_, message| message.server_id != *server_id);
        state.roles.retain(|(server, _), _| server != server_id);
        Ok(())
    }

    async fn users_with_roles(
        &self,
        server_id: &ServerId,
        roles: &[RoleId],
    ) -> Result<Vec<UserId>, ServiceError> {
        let state = self.state.read().await;
        let mut seen = HashSet::new();
        let mut users = Vec::new();
        for role in roles {
            let Some(members) = state.roles.get(&(server_id.clone(), role.clone())) else {
                continue;
            };
            for member in members {
                if seen.insert(member.clone()) {
                    users.push(member.clone());
                }
            }
        }
        Ok(users)
    }
}

fn authored<'a>(
    state: &'a State,
    user: &UserId,
    channel_id: &ChannelId,
    message_id: &MessageId,
) -> Result<&'a StoredMessage, ServiceError> {
    let message = state
        .messages
        .get(message_id)
        .filter(|message| message.channel_id == *channel_id)
        .ok_or_else(|| ServiceError::NotFound(format!("message {message_id}")))?;
    if message.author == *user {
        Ok(message)
    } else {
        Err(ServiceError::Forbidden(format!(
            "{user} is not the author of message {message_id}"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn store_with_server() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_server(ServerId::from("s1"), UserId::from("owner"), "Home")
            .await;
        store
            .add_member(&ServerId::from("s1"), UserId::from("member"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_global_server_always_exists() {
        let store = InMemoryStore::new();
        let servers = store.list_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert!(servers.first().unwrap().id.is_global());

        assert!(store
            .delete_server(&UserId::global(), &ServerId::global())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_only_owner_creates_channels() {
        let store = store_with_server().await;
        let s1 = ServerId::from("s1");

        let denied = store
            .create_channel(&UserId::from("member"), &s1, NewChannel::textual("general"))
            .await;
        assert!(matches!(denied, Err(ServiceError::Forbidden(_))));

        let created = store
            .create_channel(&UserId::from("owner"), &s1, NewChannel::textual("general"))
            .await
            .unwrap();
        assert_eq!(created.server_id, s1);
        assert_eq!(store.list_channels_of_server(&s1).await.unwrap(), vec![created]);
    }

    #[tokio::test]
    async fn test_global_creator_bypasses_ownership() {
        let store = InMemoryStore::new();
        let mut dm = NewChannel::textual("dm");
        dm.channel_type = ChannelType::Dm;
        dm.id = Some(ChannelId::from("dm-1"));
        dm.users = vec![UserId::from("a"), UserId::from("b")];

        let created = store
            .create_channel(&UserId::global(), &ServerId::global(), dm)
            .await
            .unwrap();
        assert_eq!(created.id, ChannelId::from("dm-1"));
    }

    #[tokio::test]
    async fn test_channel_validation() {
        let store = store_with_server().await;
        let owner = UserId::from("owner");
        let s1 = ServerId::from("s1");

        let long_name = NewChannel::textual("x".repeat(MAX_CHANNEL_NAME + 1));
        assert!(matches!(
            store.create_channel(&owner, &s1, long_name).await,
            Err(ServiceError::InvalidInput(_))
        ));

        let mut dm = NewChannel::textual("dm");
        dm.channel_type = ChannelType::Dm;
        assert!(matches!(
            store.create_channel(&owner, &s1, dm).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_only_author_edits_and_deletes() {
        let store = store_with_server().await;
        let s1 = ServerId::from("s1");
        let channel = store
            .create_channel(&UserId::from("owner"), &s1, NewChannel::textual("general"))
            .await
            .unwrap();
        let author = UserSummary::new(UserId::from("member"), "member");

        let message = store
            .create_message(&author, &s1, &channel.id, MessageBody::text("hi"))
            .await
            .unwrap();

        let denied = store
            .edit_message(&UserId::from("owner"), &channel.id, &message.id, MessageBody::text("x"))
            .await;
        assert!(matches!(denied, Err(ServiceError::Forbidden(_))));

        let edited = store
            .edit_message(&author.id, &channel.id, &message.id, MessageBody::text("hello"))
            .await
            .unwrap();
        assert_eq!(edited.server_id, s1);

        store
            .delete_message(&author.id, &channel.id, &message.id)
            .await
            .unwrap();
        assert!(matches!(
            store.delete_message(&author.id, &channel.id, &message.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_outsider_cannot_post() {
        let store = store_with_server().await;
        let s1 = ServerId::from("s1");
        let channel = store
            .create_channel(&UserId::from("owner"), &s1, NewChannel::textual("general"))
            .await
            .unwrap();

        let outsider = UserSummary::new(UserId::from("stranger"), "stranger");
        let result = store
            .create_message(&outsider, &s1, &channel.id, MessageBody::text("hi"))
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_servers_of_user_excludes_global() {
        let store = store_with_server().await;
        let servers = store
            .list_servers_of_user(&UserId::from("member"))
            .await
            .unwrap();
        assert_eq!(servers, vec![ServerId::from("s1")]);
        assert!(store
            .list_servers_of_user(&UserId::from("stranger"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_users_with_roles_deduplicates() {
        let store = store_with_server().await;
        let s1 = ServerId::from("s1");
        let (mods, admins) = (RoleId::from("mods"), RoleId::from("admins"));
        store.assign_role(&s1, &mods, UserId::from("a")).await;
        store.assign_role(&s1, &mods, UserId::from("b")).await;
        store.assign_role(&s1, &admins, UserId::from("a")).await;

        let users = store.users_with_roles(&s1, &[mods, admins]).await.unwrap();
        assert_eq!(users, vec![UserId::from("a"), UserId::from("b")]);
    }

    #[tokio::test]
    async fn test_delete_server_removes_channels() {
        let store = store_with_server().await;
        let s1 = ServerId::from("s1");
        let owner = UserId::from("owner");
        store
            .create_channel(&owner, &s1, NewChannel::textual("general"))
            .await
            .unwrap();

        store.delete_server(&owner, &s1).await.unwrap();
        assert!(store.server(&s1).await.is_none());
        assert!(matches!(
            store.list_channels_of_server(&s1).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_seed_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"{
                "servers": [{"id": "s1", "owner_id": "u1", "name": "Home", "members": ["u1"]}],
                "roles": [{"server_id": "s1", "role_id": "r1", "members": ["u1"]}]
            }"#,
        )
        .unwrap();

        let store = InMemoryStore::from_file(&path).unwrap();
        let state = store.state.try_read().unwrap();
        assert!(state.servers.contains_key(&ServerId::from("s1")));
        assert!(state.servers.contains_key(&ServerId::global()));
    }

    #[test]
    fn test_malformed_seed_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            InMemoryStore::from_file(&path),
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
