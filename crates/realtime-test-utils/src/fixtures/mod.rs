//! Pre-configured test data fixtures for realtime testing.
//!
//! Provides builders and test data for:
//! - Users and their public profiles
//! - Servers with owners, members, channels and roles
//! - Message bodies

use common::{ChannelId, RoleId, ServerId, UserId};
use realtime::services::memory::InMemoryStore;
use realtime::services::{DomainService, MessageBody, NewChannel};
use uuid::Uuid;
use wire_protocol::{ChannelType, UserSummary};

/// Test user fixture.
#[derive(Debug, Clone)]
pub struct TestUser {
    /// User ID.
    pub id: UserId,
    /// Username (also used as display name).
    pub username: String,
}

impl TestUser {
    /// Create a user whose id equals its name (for readable assertions).
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            id: UserId::from(name),
            username: name.to_string(),
        }
    }

    /// Create a test user with a random name.
    #[must_use]
    pub fn random() -> Self {
        let suffix = Uuid::new_v4().to_string();
        Self::new(&format!("user-{}", suffix.get(..8).unwrap_or("00000000")))
    }

    /// Public profile as broadcast to other members.
    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary::new(self.id.clone(), self.username.clone())
    }
}

/// Channel seeded into a [`TestServer`].
#[derive(Debug, Clone)]
pub struct TestChannel {
    pub id: ChannelId,
    pub name: String,
    pub channel_type: ChannelType,
    pub users: Vec<UserId>,
}

/// Test server fixture.
#[derive(Debug, Clone)]
pub struct TestServer {
    /// Server ID.
    pub id: ServerId,
    /// Owner (always a member).
    pub owner: UserId,
    /// Members besides the owner.
    pub members: Vec<UserId>,
    /// Channels created at install time.
    pub channels: Vec<TestChannel>,
    /// Role assignments.
    pub roles: Vec<(RoleId, UserId)>,
}

impl TestServer {
    /// Create a server owned by `owner`.
    #[must_use]
    pub fn new(id: &str, owner: &TestUser) -> Self {
        Self {
            id: ServerId::from(id),
            owner: owner.id.clone(),
            members: Vec::new(),
            channels: Vec::new(),
            roles: Vec::new(),
        }
    }

    /// Add members.
    #[must_use]
    pub fn with_members(mut self, members: &[&TestUser]) -> Self {
        self.members
            .extend(members.iter().map(|user| user.id.clone()));
        self
    }

    /// Add a text channel visible to every member.
    #[must_use]
    pub fn with_channel(self, id: &str) -> Self {
        self.with_typed_channel(id, ChannelType::Textual)
    }

    /// Add a voice channel.
    #[must_use]
    pub fn with_voice_channel(self, id: &str) -> Self {
        self.with_typed_channel(id, ChannelType::Voice)
    }

    fn with_typed_channel(mut self, id: &str, channel_type: ChannelType) -> Self {
        self.channels.push(TestChannel {
            id: ChannelId::from(id),
            name: id.to_string(),
            channel_type,
            users: Vec::new(),
        });
        self
    }

    /// Assign a role to a member.
    #[must_use]
    pub fn with_role(mut self, role: &str, user: &TestUser) -> Self {
        self.roles.push((RoleId::from(role), user.id.clone()));
        self
    }

    /// Persist the server, its members, roles and channels into `store`.
    pub async fn install(&self, store: &InMemoryStore) -> anyhow::Result<()> {
        store
            .insert_server(self.id.clone(), self.owner.clone(), self.id.as_str())
            .await;
        for member in &self.members {
            store.add_member(&self.id, member.clone()).await?;
        }
        for (role, user) in &self.roles {
            store.assign_role(&self.id, role, user.clone()).await;
        }
        for channel in &self.channels {
            let creator = if self.id.is_global() {
                UserId::global()
            } else {
                self.owner.clone()
            };
            store
                .create_channel(
                    &creator,
                    &self.id,
                    NewChannel {
                        id: Some(channel.id.clone()),
                        name: channel.name.clone(),
                        channel_type: channel.channel_type,
                        description: String::new(),
                        users: channel.users.clone(),
                        roles: Vec::new(),
                        x: 0,
                        y: 0,
                    },
                )
                .await?;
        }
        Ok(())
    }
}

/// Direct-message channel between two users on the global server.
pub async fn install_dm(
    store: &InMemoryStore,
    channel_id: &str,
    a: &TestUser,
    b: &TestUser,
) -> anyhow::Result<ChannelId> {
    let info = store
        .create_channel(
            &UserId::global(),
            &ServerId::global(),
            NewChannel {
                id: Some(ChannelId::from(channel_id)),
                name: "dm".to_string(),
                channel_type: ChannelType::Dm,
                description: String::new(),
                users: vec![a.id.clone(), b.id.clone()],
                roles: Vec::new(),
                x: 0,
                y: 0,
            },
        )
        .await?;
    Ok(info.id)
}

/// Text channel targeted at explicit users and roles.
#[must_use]
pub fn targeted_channel(name: &str, users: &[&TestUser], roles: &[&str]) -> NewChannel {
    let mut channel = NewChannel::textual(name);
    channel.users = users.iter().map(|user| user.id.clone()).collect();
    channel.roles = roles.iter().map(|role| RoleId::from(*role)).collect();
    channel
}

/// Plain-text message body.
#[must_use]
pub fn text(body: &str) -> MessageBody {
    MessageBody::text(body)
}
