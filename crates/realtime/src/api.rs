//! Request-facing facade over the actor system.
//!
//! Request handlers speak in ids; [`RealtimeApi`] resolves them to live
//! actors and delivers the matching message. Operations backed by
//! persistence wait for the owning actor's reply so storage and
//! authorization failures reach the caller. Everything else is
//! fire-and-forget.
//!
//! Persisting membership, friendships and profiles is the caller's job; this
//! layer only keeps the live actors in step with it.

use crate::actors::{
    ActorSystem, ChannelMessage, Event, Reply, ServerActor, ServerMessage,
};
use crate::engine::{Address, Engine, Pid};
use crate::errors::RealtimeError;
use crate::services::{MessageBody, NewChannel};

use common::{ChannelId, MessageId, ServerId, UserId};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};
use wire_protocol::{
    AcceptFriend, ChannelInfo, ChannelType, ChatMessage, ConnectReason, DeleteFriend,
    DeletedMessage, DisconnectReason, EditedMessage, Envelope, FriendInvite, RoleEvent,
    UserSummary,
};

/// Name given to direct-message channels.
const DM_CHANNEL_NAME: &str = "dm";

/// Entry point for request handlers.
#[derive(Clone, Debug)]
pub struct RealtimeApi {
    system: ActorSystem,
}

impl RealtimeApi {
    pub fn new(system: ActorSystem) -> Self {
        Self { system }
    }

    #[must_use]
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    fn server(&self, server_id: &ServerId) -> Result<Pid, RealtimeError> {
        self.system
            .server_pid(server_id)
            .ok_or_else(|| RealtimeError::ServerNotFound(server_id.clone()))
    }

    fn channel(&self, server_id: &ServerId, channel_id: &ChannelId) -> Result<Pid, RealtimeError> {
        self.system
            .spaces
            .lookup(&Address::channel(server_id, channel_id))
            .ok_or_else(|| RealtimeError::ChannelNotFound(channel_id.clone()))
    }

    // -- servers ---------------------------------------------------------

    /// Start the actor of a freshly persisted server and subscribe its
    /// owner's session to it.
    ///
    /// # Errors
    ///
    /// `Spawn` if the server is already running or its channels fail to load.
    #[instrument(skip_all, fields(server_id = %server_id, owner = %owner))]
    pub async fn create_server(
        &self,
        owner: &UserId,
        server_id: &ServerId,
    ) -> Result<Pid, RealtimeError> {
        let pid = self
            .system
            .spaces
            .spawn(
                ServerActor::new(server_id.clone(), self.system.clone()),
                Address::server(server_id),
            )
            .await?;

        if let Some(session) = self.system.session_of(owner) {
            self.system
                .notify([&session], Event::ServerJoined { pid: pid.clone() });
        }

        info!(target: "rt.api", server_id = %server_id, "Server started");
        Ok(pid)
    }

    /// Delete a server. Only its owner may do so.
    ///
    /// # Errors
    ///
    /// `ServerNotFound` if the server is not running; the service's error if
    /// deletion is rejected.
    #[instrument(skip_all, fields(server_id = %server_id, user_id = %user))]
    pub async fn delete_server(&self, user: &UserId, server_id: &ServerId) -> Result<(), RealtimeError> {
        let pid = self.server(server_id)?;
        request(&self.system.spaces, &pid, |respond_to| {
            ServerMessage::RemoveServer {
                user: user.clone(),
                respond_to,
            }
        })
        .await
    }

    /// A user became a member of a server.
    ///
    /// Existing members are told about the newcomer; if the newcomer is
    /// online, their session joins the server and all of its channels.
    ///
    /// # Errors
    ///
    /// `ServerNotFound` if the server is not running.
    pub fn join_server(&self, user: UserSummary, server_id: &ServerId) -> Result<(), RealtimeError> {
        let server = self.server(server_id)?;
        let session = self.system.session_of(&user.id);

        self.system
            .spaces
            .send(&server, ServerMessage::NewUserInServer { user })?;
        if let Some(session) = session {
            self.system
                .connect(&server, ConnectReason::JoinServer, &session)?;
        }
        Ok(())
    }

    /// A user stopped being a member of a server.
    ///
    /// # Errors
    ///
    /// `ServerNotFound` if the server is not running.
    pub fn leave_server(&self, user_id: &UserId, server_id: &ServerId) -> Result<(), RealtimeError> {
        let server = self.server(server_id)?;
        if let Some(session) = self.system.session_of(user_id) {
            self.system
                .disconnect(&server, DisconnectReason::LeaveServer, &session)?;
        }
        Ok(())
    }

    /// Forward a role change to every member of the server.
    ///
    /// # Errors
    ///
    /// `ServerNotFound` if the server is not running.
    pub fn role_event(&self, server_id: &ServerId, event: RoleEvent) -> Result<(), RealtimeError> {
        let server = self.server(server_id)?;
        self.system.spaces.send(&server, ServerMessage::Role(event))?;
        Ok(())
    }

    // -- channels --------------------------------------------------------

    /// # Errors
    ///
    /// `ServerNotFound` if the server is not running; the service's error if
    /// creation is rejected.
    #[instrument(skip_all, fields(server_id = %server_id, creator = %creator))]
    pub async fn create_channel(
        &self,
        creator: &UserId,
        server_id: &ServerId,
        channel: NewChannel,
    ) -> Result<ChannelInfo, RealtimeError> {
        let server = self.server(server_id)?;
        request(&self.system.spaces, &server, |respond_to| {
            ServerMessage::CreateChannel {
                creator: creator.clone(),
                channel,
                respond_to,
            }
        })
        .await
    }

    /// # Errors
    ///
    /// `ServerNotFound` if the server is not running; the service's error if
    /// deletion is rejected. A persisted channel without a live actor is
    /// still deleted.
    #[instrument(skip_all, fields(server_id = %server_id, channel_id = %channel_id))]
    pub async fn delete_channel(
        &self,
        user: &UserId,
        server_id: &ServerId,
        channel_id: &ChannelId,
    ) -> Result<(), RealtimeError> {
        let server = self.server(server_id)?;
        request(&self.system.spaces, &server, |respond_to| {
            ServerMessage::RemoveChannel {
                user: user.clone(),
                channel_id: channel_id.clone(),
                respond_to,
            }
        })
        .await
    }

    // -- messages --------------------------------------------------------

    /// # Errors
    ///
    /// `ChannelNotFound` if the channel is not running; the service's error
    /// if the author may not post.
    pub async fn create_message(
        &self,
        author: UserSummary,
        server_id: &ServerId,
        channel_id: &ChannelId,
        body: MessageBody,
    ) -> Result<ChatMessage, RealtimeError> {
        let channel = self.channel(server_id, channel_id)?;
        request(&self.system.spaces, &channel, |respond_to| {
            ChannelMessage::NewMessage {
                author,
                body,
                respond_to,
            }
        })
        .await
    }

    /// # Errors
    ///
    /// `ChannelNotFound` if the channel is not running; the service's error
    /// if the user is not the author.
    pub async fn edit_message(
        &self,
        user: &UserId,
        server_id: &ServerId,
        channel_id: &ChannelId,
        message_id: &MessageId,
        body: MessageBody,
    ) -> Result<EditedMessage, RealtimeError> {
        let channel = self.channel(server_id, channel_id)?;
        request(&self.system.spaces, &channel, |respond_to| {
            ChannelMessage::EditMessage {
                user: user.clone(),
                message_id: message_id.clone(),
                body,
                respond_to,
            }
        })
        .await
    }

    /// # Errors
    ///
    /// `ChannelNotFound` if the channel is not running; the service's error
    /// if the user is not the author.
    pub async fn delete_message(
        &self,
        user: &UserId,
        server_id: &ServerId,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<DeletedMessage, RealtimeError> {
        let channel = self.channel(server_id, channel_id)?;
        request(&self.system.spaces, &channel, |respond_to| {
            ChannelMessage::DeleteMessage {
                user: user.clone(),
                message_id: message_id.clone(),
                respond_to,
            }
        })
        .await
    }

    // -- calls -----------------------------------------------------------

    /// Join a voice call, or update mute and deafen state if already in it.
    ///
    /// # Errors
    ///
    /// `ChannelNotFound` if the channel is not running.
    pub fn connect_to_call(
        &self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        user_id: &UserId,
        deafened: bool,
        muted: bool,
    ) -> Result<(), RealtimeError> {
        let channel = self.channel(server_id, channel_id)?;
        self.system.spaces.send(
            &channel,
            ChannelMessage::ConnectToCall {
                user_id: user_id.clone(),
                deafened,
                muted,
            },
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// `ChannelNotFound` if the channel is not running.
    pub fn disconnect_from_call(
        &self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        user_id: &UserId,
    ) -> Result<(), RealtimeError> {
        let channel = self.channel(server_id, channel_id)?;
        self.system.spaces.send(
            &channel,
            ChannelMessage::DisconnectFromCall {
                user_id: user_id.clone(),
            },
        )?;
        Ok(())
    }

    // -- users -----------------------------------------------------------

    /// Broadcast a profile change to every server the user belongs to and
    /// every direct-message channel they are part of.
    ///
    /// Returns how many spaces were notified.
    ///
    /// # Errors
    ///
    /// The service's error if memberships cannot be loaded.
    pub async fn update_user_information(&self, user: UserSummary) -> Result<usize, RealtimeError> {
        let mut notified = 0;

        for server_id in self.system.service.list_servers_of_user(&user.id).await? {
            let Some(server) = self.system.server_pid(&server_id) else {
                continue;
            };
            if self
                .system
                .spaces
                .send(&server, ServerMessage::UserInformationChanged { user: user.clone() })
                .is_ok()
            {
                notified += 1;
            }
        }

        let global = ServerId::global();
        let direct = self.system.service.list_channels_of_server(&global).await?;
        for channel in direct.iter().filter(|c| c.users.contains(&user.id)) {
            let Some(pid) = self
                .system
                .spaces
                .lookup(&Address::channel(&global, &channel.id))
            else {
                continue;
            };
            if self
                .system
                .spaces
                .send(&pid, ChannelMessage::UserInformationChanged { user: user.clone() })
                .is_ok()
            {
                notified += 1;
            }
        }

        debug!(target: "rt.api", user_id = %user.id, notified, "User information changed");
        Ok(notified)
    }

    // -- friends ---------------------------------------------------------

    /// Deliver a friend request to the invitee, if online.
    ///
    /// Returns whether the invitee was reached.
    pub fn send_friend_invite(&self, invite_id: &str, from: UserSummary, to: &UserId) -> bool {
        let Some(session) = self.system.session_of(to) else {
            return false;
        };
        self.system.notify(
            [&session],
            Event::Envelope(Envelope::FriendInvite(FriendInvite {
                invite_id: invite_id.to_string(),
                user: from,
            })),
        ) == 1
    }

    /// `user` accepted the invite `friend` sent.
    ///
    /// Revives `existing_channel` if the pair already had a direct-message
    /// channel, otherwise creates one on the global server. Both users are
    /// then told about the new friendship. Returns the channel id.
    ///
    /// # Errors
    ///
    /// `ServerNotFound` if the global server is not running; the service's
    /// error if the channel cannot be created.
    #[instrument(skip_all, fields(invite_id = %invite_id, user_id = %user.id, friend = %friend))]
    pub async fn accept_friend(
        &self,
        invite_id: &str,
        user: UserSummary,
        friend: &UserId,
        existing_channel: Option<ChannelId>,
    ) -> Result<ChannelId, RealtimeError> {
        let global = self.server(&ServerId::global())?;
        let users = vec![user.id.clone(), friend.clone()];

        let channel_id = if let Some(channel_id) = existing_channel {
            // Sessions must queue the subscription ahead of `AcceptFriend`.
            request(&self.system.spaces, &global, |respond_to| {
                ServerMessage::StartChannel {
                    channel_id: channel_id.clone(),
                    users,
                    respond_to,
                }
            })
            .await?;
            channel_id
        } else {
            let channel = NewChannel {
                id: Some(ChannelId::new()),
                name: DM_CHANNEL_NAME.to_string(),
                channel_type: ChannelType::Dm,
                description: String::new(),
                users,
                roles: Vec::new(),
                x: 0,
                y: 0,
            };
            let info = request(&self.system.spaces, &global, |respond_to| {
                ServerMessage::CreateChannel {
                    creator: UserId::global(),
                    channel,
                    respond_to,
                }
            })
            .await?;
            info.id
        };

        let inviter = self.system.sessions_of([friend]);
        self.system.notify(
            &inviter,
            Event::Envelope(Envelope::AcceptFriend(AcceptFriend {
                invite_id: invite_id.to_string(),
                channel_id: channel_id.clone(),
                user: Some(user.clone()),
                sender: true,
            })),
        );
        let accepter = self.system.sessions_of([&user.id]);
        self.system.notify(
            &accepter,
            Event::Envelope(Envelope::AcceptFriend(AcceptFriend {
                invite_id: invite_id.to_string(),
                channel_id: channel_id.clone(),
                user: None,
                sender: false,
            })),
        );

        info!(target: "rt.api", channel_id = %channel_id, "Friendship accepted");
        Ok(channel_id)
    }

    /// `user` removed `friend`. The friend is told, and the pair's
    /// direct-message channel stops.
    ///
    /// # Errors
    ///
    /// `ServerNotFound` if the global server is not running.
    pub fn delete_friend(
        &self,
        invite_id: &str,
        user: &UserId,
        friend: &UserId,
        channel_id: &ChannelId,
    ) -> Result<(), RealtimeError> {
        let global = self.server(&ServerId::global())?;

        let targets = self.system.sessions_of([friend]);
        self.system.notify(
            &targets,
            Event::Envelope(Envelope::DeleteFriend(DeleteFriend {
                invite_id: invite_id.to_string(),
                user_id: user.clone(),
            })),
        );
        self.system.spaces.send(
            &global,
            ServerMessage::KillChannel {
                channel_id: channel_id.clone(),
                users: vec![user.clone(), friend.clone()],
            },
        )?;
        Ok(())
    }
}

/// Send a message carrying a reply channel and wait for the answer.
async fn request<M, T>(
    engine: &Engine,
    pid: &Pid,
    build: impl FnOnce(Reply<T>) -> M,
) -> Result<T, RealtimeError>
where
    M: Send + 'static,
{
    let (respond_to, reply) = oneshot::channel();
    engine.send(pid, build(respond_to))?;
    reply
        .await
        .map_err(|_| RealtimeError::NoReply(pid.to_string()))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::testing::Listener;
    use crate::services::memory::InMemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    async fn api_with(store: InMemoryStore) -> RealtimeApi {
        let system = ActorSystem::new(Arc::new(store), Duration::from_secs(1));
        system.bootstrap_spaces().await.unwrap();
        RealtimeApi::new(system)
    }

    #[tokio::test]
    async fn test_unknown_server_is_reported() {
        let api = api_with(InMemoryStore::new()).await;
        let missing = ServerId::from("nope");

        let err = api
            .create_channel(&UserId::from("u1"), &missing, NewChannel::textual("general"))
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::ServerNotFound(id) if id == missing));

        let err = api.role_event(&missing, RoleEvent::Deleted { role_id: "r".into() });
        assert!(matches!(err, Err(RealtimeError::ServerNotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_reported() {
        let api = api_with(InMemoryStore::new()).await;

        let err = api
            .create_message(
                UserSummary::new(UserId::from("u1"), "alice"),
                &ServerId::global(),
                &ChannelId::from("c404"),
                MessageBody::text("hi"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::ChannelNotFound(id) if id.as_str() == "c404"));

        let err = api.connect_to_call(
            &ServerId::global(),
            &ChannelId::from("c404"),
            &UserId::from("u1"),
            false,
            false,
        );
        assert!(matches!(err, Err(RealtimeError::ChannelNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_server_twice_conflicts() {
        let owner = UserId::from("u1");
        let server_id = ServerId::from("s1");
        let store = InMemoryStore::new();
        store
            .insert_server(server_id.clone(), owner.clone(), "one")
            .await;
        let api = RealtimeApi::new(ActorSystem::new(Arc::new(store), Duration::from_secs(1)));

        api.create_server(&owner, &server_id).await.unwrap();
        let err = api.create_server(&owner, &server_id).await.unwrap_err();
        assert_eq!(err.error_code(), 5);
    }

    #[tokio::test]
    async fn test_accept_friend_creates_dm_on_global() {
        let api = api_with(InMemoryStore::new()).await;
        let alice = UserSummary::new(UserId::from("alice"), "alice");
        let bob = UserId::from("bob");

        let channel_id = api
            .accept_friend("inv-1", alice.clone(), &bob, None)
            .await
            .unwrap();

        assert!(api.system().spaces.lookup(&Address::channel(&ServerId::global(), &channel_id)).is_some());

        let rows = api
            .system()
            .service
            .list_channels_of_server(&ServerId::global())
            .await
            .unwrap();
        let dm = rows.iter().find(|c| c.id == channel_id).unwrap();
        assert_eq!(dm.channel_type, ChannelType::Dm);
        assert!(dm.users.contains(&alice.id) && dm.users.contains(&bob));
    }

    #[tokio::test]
    async fn test_delete_friend_stops_dm_channel() {
        let api = api_with(InMemoryStore::new()).await;
        let alice = UserSummary::new(UserId::from("alice"), "alice");
        let bob = UserId::from("bob");
        let channel_id = api
            .accept_friend("inv-1", alice.clone(), &bob, None)
            .await
            .unwrap();
        let address = Address::channel(&ServerId::global(), &channel_id);
        let pid = api.system().spaces.lookup(&address).unwrap();

        api.delete_friend("inv-1", &alice.id, &bob, &channel_id).unwrap();

        // The kill is processed by the global server; wait until the
        // channel actor has been deregistered.
        tokio::time::timeout(Duration::from_secs(1), async {
            while api.system().spaces.lookup(&address).is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(api.system().spaces.send(&pid, ChannelMessage::DisconnectFromCall { user_id: bob }).is_err());
    }

    #[tokio::test]
    async fn test_refriend_subscribes_before_accepting() {
        let api = api_with(InMemoryStore::new()).await;
        let alice = UserSummary::new(UserId::from("alice"), "alice");
        let bob = UserId::from("bob");
        let channel_id = api
            .accept_friend("inv-1", alice.clone(), &bob, None)
            .await
            .unwrap();
        let address = Address::channel(&ServerId::global(), &channel_id);
        api.delete_friend("inv-1", &alice.id, &bob, &channel_id).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while api.system().spaces.lookup(&address).is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let mut inviter = Listener::spawn(api.system(), "bob").await;
        api.accept_friend("inv-2", alice, &bob, Some(channel_id))
            .await
            .unwrap();

        let restarted = api.system().spaces.lookup(&address).unwrap();
        assert!(matches!(&*inviter.next().await, Event::ChannelStarted { pid } if *pid == restarted));
        assert!(matches!(
            inviter.envelope().await,
            Envelope::AcceptFriend(accepted) if accepted.sender
        ));
    }
}
