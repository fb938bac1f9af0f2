//! Channel actor: one per text, voice or direct-message channel.
//!
//! Tracks which sessions are subscribed to the channel and who is in its
//! voice call. A call participant is always a connected user.

use super::messages::{ChannelMessage, ChannelSnapshot, Event, Reply};
use super::ActorSystem;
use crate::engine::{Actor, Context, Pid};
use crate::observability::metrics as rt_metrics;
use crate::services::MessageBody;

use async_trait::async_trait;
use common::{ChannelId, MessageId, ServerId, UserId};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use wire_protocol::{
    CallInitialization, CallUser, ChatMessage, ConnectToCall, DeletedMessage, DisconnectFromCall,
    EditedMessage, Envelope, UserInformationChanged, UserSummary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VoiceState {
    deafened: bool,
    muted: bool,
}

/// Actor for one channel.
pub struct ChannelActor {
    server_id: ServerId,
    channel_id: ChannelId,
    system: ActorSystem,
    connected_users: HashMap<UserId, Pid>,
    call_participants: BTreeMap<UserId, VoiceState>,
}

impl ChannelActor {
    pub fn new(server_id: ServerId, channel_id: ChannelId, system: ActorSystem) -> Self {
        Self {
            server_id,
            channel_id,
            system,
            connected_users: HashMap::new(),
            call_participants: BTreeMap::new(),
        }
    }

    fn call_users(&self) -> Vec<CallUser> {
        self.call_participants
            .iter()
            .map(|(user_id, voice)| CallUser {
                user_id: user_id.clone(),
                deafened: voice.deafened,
                muted: voice.muted,
            })
            .collect()
    }

    fn broadcast(&self, envelope: Envelope) -> usize {
        self.system
            .notify(self.connected_users.values(), Event::Envelope(envelope))
    }

    fn handle_connect(&mut self, sender: Option<Pid>) {
        let Some(session) = sender else {
            warn!(
                target: "rt.actor.channel",
                channel_id = %self.channel_id,
                "Connect without a session sender"
            );
            return;
        };
        let Some(user_id) = session.address().user_id() else {
            warn!(
                target: "rt.actor.channel",
                channel_id = %self.channel_id,
                sender = %session,
                "Connect from a non-session actor"
            );
            return;
        };

        if self.connected_users.get(&user_id) == Some(&session) {
            warn!(
                target: "rt.actor.channel",
                channel_id = %self.channel_id,
                user_id = %user_id,
                "Session already connected"
            );
            return;
        }

        if !self.call_participants.is_empty() {
            self.system.notify(
                [&session],
                Event::Envelope(Envelope::CallInitialization(CallInitialization {
                    server_id: self.server_id.clone(),
                    channel_id: self.channel_id.clone(),
                    call_users: self.call_users(),
                })),
            );
        }
        self.connected_users.insert(user_id, session);
    }

    fn handle_disconnect(&mut self, sender: Option<Pid>) {
        let Some(session) = sender else {
            return;
        };
        let Some(user_id) = session.address().user_id() else {
            return;
        };

        if self.connected_users.get(&user_id) != Some(&session) {
            warn!(
                target: "rt.actor.channel",
                channel_id = %self.channel_id,
                user_id = %user_id,
                "Disconnect from a session that is not connected"
            );
            return;
        }
        self.connected_users.remove(&user_id);

        if self.call_participants.remove(&user_id).is_some() {
            self.broadcast(Envelope::DisconnectFromCall(DisconnectFromCall {
                server_id: self.server_id.clone(),
                channel_id: self.channel_id.clone(),
                user_id,
            }));
        }
    }

    fn handle_connect_to_call(&mut self, user_id: UserId, deafened: bool, muted: bool) {
        if !self.connected_users.contains_key(&user_id) {
            warn!(
                target: "rt.actor.channel",
                channel_id = %self.channel_id,
                user_id = %user_id,
                "Call join from a user not connected to the channel"
            );
            return;
        }

        self.call_participants
            .insert(user_id.clone(), VoiceState { deafened, muted });
        self.broadcast(Envelope::ConnectToCall(ConnectToCall {
            server_id: self.server_id.clone(),
            channel_id: self.channel_id.clone(),
            user_id,
            deafened,
            muted,
        }));
    }

    fn handle_disconnect_from_call(&mut self, user_id: UserId) {
        if self.call_participants.remove(&user_id).is_none() {
            debug!(
                target: "rt.actor.channel",
                channel_id = %self.channel_id,
                user_id = %user_id,
                "Call leave from a non-participant"
            );
            return;
        }

        self.broadcast(Envelope::DisconnectFromCall(DisconnectFromCall {
            server_id: self.server_id.clone(),
            channel_id: self.channel_id.clone(),
            user_id,
        }));
    }

    async fn handle_new_message(
        &self,
        author: UserSummary,
        body: MessageBody,
        respond_to: Reply<ChatMessage>,
    ) {
        let result = self
            .system
            .service
            .create_message(&author, &self.server_id, &self.channel_id, body)
            .await;
        match result {
            Ok(message) => {
                self.broadcast(Envelope::ChatMessage(message.clone()));
                let _ = respond_to.send(Ok(message));
            }
            Err(e) => {
                error!(
                    target: "rt.actor.channel",
                    channel_id = %self.channel_id,
                    author = %author.id,
                    error = %e,
                    "Message creation rejected"
                );
                let _ = respond_to.send(Err(e.into()));
            }
        }
    }

    async fn handle_edit_message(
        &self,
        user: UserId,
        message_id: MessageId,
        body: MessageBody,
        respond_to: Reply<EditedMessage>,
    ) {
        let result = self
            .system
            .service
            .edit_message(&user, &self.channel_id, &message_id, body)
            .await;
        match result {
            Ok(edited) => {
                self.broadcast(Envelope::EditMessage(edited.clone()));
                let _ = respond_to.send(Ok(edited));
            }
            Err(e) => {
                error!(
                    target: "rt.actor.channel",
                    channel_id = %self.channel_id,
                    message_id = %message_id,
                    user_id = %user,
                    error = %e,
                    "Message edit rejected"
                );
                let _ = respond_to.send(Err(e.into()));
            }
        }
    }

    async fn handle_delete_message(
        &self,
        user: UserId,
        message_id: MessageId,
        respond_to: Reply<DeletedMessage>,
    ) {
        let result = self
            .system
            .service
            .delete_message(&user, &self.channel_id, &message_id)
            .await;
        match result {
            Ok(deleted) => {
                self.broadcast(Envelope::DeleteMessage(deleted.clone()));
                let _ = respond_to.send(Ok(deleted));
            }
            Err(e) => {
                error!(
                    target: "rt.actor.channel",
                    channel_id = %self.channel_id,
                    message_id = %message_id,
                    user_id = %user,
                    error = %e,
                    "Message deletion rejected"
                );
                let _ = respond_to.send(Err(e.into()));
            }
        }
    }

    fn snapshot(&self) -> ChannelSnapshot {
        let mut users: Vec<UserId> = self.connected_users.keys().cloned().collect();
        users.sort();
        ChannelSnapshot {
            server_id: self.server_id.clone(),
            channel_id: self.channel_id.clone(),
            users,
            call: self.call_users(),
        }
    }
}

#[async_trait]
impl Actor for ChannelActor {
    type Message = ChannelMessage;

    async fn handle(&mut self, _ctx: &Context, message: ChannelMessage, sender: Option<Pid>) {
        let started = Instant::now();
        let label = message.label();

        match message {
            ChannelMessage::Connect { .. } => self.handle_connect(sender),
            ChannelMessage::Disconnect { .. } => self.handle_disconnect(sender),
            ChannelMessage::ConnectToCall {
                user_id,
                deafened,
                muted,
            } => self.handle_connect_to_call(user_id, deafened, muted),
            ChannelMessage::DisconnectFromCall { user_id } => {
                self.handle_disconnect_from_call(user_id);
            }
            ChannelMessage::NewMessage {
                author,
                body,
                respond_to,
            } => self.handle_new_message(author, body, respond_to).await,
            ChannelMessage::EditMessage {
                user,
                message_id,
                body,
                respond_to,
            } => {
                self.handle_edit_message(user, message_id, body, respond_to)
                    .await;
            }
            ChannelMessage::DeleteMessage {
                user,
                message_id,
                respond_to,
            } => self.handle_delete_message(user, message_id, respond_to).await,
            ChannelMessage::UserInformationChanged { user } => {
                self.broadcast(Envelope::UserInformationChanged(UserInformationChanged { user }));
            }
            ChannelMessage::Inspect { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }

        rt_metrics::record_message_latency(label, started.elapsed());
    }

    async fn stopped(&mut self, _ctx: &Context) {
        info!(
            target: "rt.actor.channel",
            server_id = %self.server_id,
            channel_id = %self.channel_id,
            members = self.connected_users.len(),
            "Channel stopped"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::testing::Listener;
    use crate::errors::RealtimeError;
    use crate::services::memory::InMemoryStore;
    use crate::services::mock::{MockDomainService, Operation};
    use crate::services::{DomainService, NewChannel, ServiceError};
    use crate::engine::Address;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use wire_protocol::{ConnectReason, DisconnectReason};

    struct Fixture {
        system: ActorSystem,
        service: Arc<MockDomainService>,
        channel: Pid,
    }

    /// Server s1 owned by alice with bob as member, and voice channel v1.
    async fn fixture() -> Fixture {
        let alice = UserId::from("alice");
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_server(ServerId::from("s1"), alice.clone(), "s1")
            .await;
        store
            .add_member(&ServerId::from("s1"), UserId::from("bob"))
            .await
            .unwrap();
        let mut voice = NewChannel::textual("v1");
        voice.id = Some(ChannelId::from("v1"));
        voice.channel_type = wire_protocol::ChannelType::Voice;
        store
            .create_channel(&alice, &ServerId::from("s1"), voice)
            .await
            .unwrap();

        let service = Arc::new(MockDomainService::new(store));
        let system = ActorSystem::new(service.clone(), Duration::from_secs(1));
        let channel = system
            .spaces
            .spawn(
                ChannelActor::new(ServerId::from("s1"), ChannelId::from("v1"), system.clone()),
                Address::channel(&ServerId::from("s1"), &ChannelId::from("v1")),
            )
            .await
            .unwrap();
        Fixture {
            system,
            service,
            channel,
        }
    }

    impl Fixture {
        async fn join(&self, user: &str) -> Listener {
            let listener = Listener::spawn(&self.system, user).await;
            self.system
                .connect(&self.channel, ConnectReason::Connecting, &listener.pid)
                .unwrap();
            listener
        }

        fn send(&self, message: ChannelMessage) {
            self.system.spaces.send(&self.channel, message).unwrap();
        }

        async fn snapshot(&self) -> ChannelSnapshot {
            let (respond_to, snapshot) = oneshot::channel();
            self.send(ChannelMessage::Inspect { respond_to });
            snapshot.await.unwrap()
        }

        fn call(&self, user: &str, deafened: bool, muted: bool) {
            self.send(ChannelMessage::ConnectToCall {
                user_id: UserId::from(user),
                deafened,
                muted,
            });
        }
    }

    #[tokio::test]
    async fn test_join_during_call_gets_private_initialization() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;
        f.call("alice", false, true);
        assert!(matches!(alice.envelope().await, Envelope::ConnectToCall(c) if c.muted));

        let mut bob = f.join("bob").await;

        match bob.envelope().await {
            Envelope::CallInitialization(init) => {
                assert_eq!(init.call_users.len(), 1);
                let first = init.call_users.first().unwrap();
                assert_eq!(first.user_id, UserId::from("alice"));
                assert!(first.muted);
            }
            other => unreachable!("expected call initialization, got {other:?}"),
        }
        assert!(alice.drain().await.is_empty());
        assert_eq!(f.snapshot().await.users.len(), 2);
    }

    #[tokio::test]
    async fn test_join_without_call_sends_nothing() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;

        assert_eq!(f.snapshot().await.users, vec![UserId::from("alice")]);
        assert!(alice.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_call_join_updates_state() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;
        let mut bob = f.join("bob").await;

        f.call("alice", false, false);
        f.call("alice", true, true);

        let call = f.snapshot().await.call;
        assert_eq!(call.len(), 1);
        let only = call.first().unwrap();
        assert!(only.deafened && only.muted);

        // Both updates are broadcast to every member.
        for listener in [&mut alice, &mut bob] {
            assert!(matches!(listener.envelope().await, Envelope::ConnectToCall(c) if !c.deafened));
            assert!(matches!(listener.envelope().await, Envelope::ConnectToCall(c) if c.deafened));
        }
    }

    #[tokio::test]
    async fn test_call_join_requires_membership() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;

        f.call("mallory", false, false);

        assert!(f.snapshot().await.call.is_empty());
        assert!(alice.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_leaving_call_is_broadcast_to_everyone_including_leaver() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;
        let mut bob = f.join("bob").await;
        f.call("alice", false, false);
        alice.envelope().await;
        bob.envelope().await;

        f.send(ChannelMessage::DisconnectFromCall {
            user_id: UserId::from("alice"),
        });

        assert!(f.snapshot().await.call.is_empty());
        for listener in [&mut alice, &mut bob] {
            assert!(matches!(
                listener.envelope().await,
                Envelope::DisconnectFromCall(d) if d.user_id == UserId::from("alice")
            ));
        }

        // Leaving again is a no-op.
        f.send(ChannelMessage::DisconnectFromCall {
            user_id: UserId::from("alice"),
        });
        f.snapshot().await;
        assert!(alice.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_drops_call_presence() {
        let f = fixture().await;
        let alice = f.join("alice").await;
        let mut bob = f.join("bob").await;
        f.call("alice", false, false);
        bob.envelope().await;

        f.system
            .disconnect(&f.channel, DisconnectReason::Disconnecting, &alice.pid)
            .unwrap();

        let snapshot = f.snapshot().await;
        assert_eq!(snapshot.users, vec![UserId::from("bob")]);
        assert!(snapshot.call.is_empty());
        assert!(matches!(bob.envelope().await, Envelope::DisconnectFromCall(_)));
    }

    #[tokio::test]
    async fn test_unknown_disconnect_changes_nothing() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;
        let stranger = Listener::spawn(&f.system, "carol").await;

        f.system
            .disconnect(&f.channel, DisconnectReason::Disconnecting, &stranger.pid)
            .unwrap();

        assert_eq!(f.snapshot().await.users, vec![UserId::from("alice")]);
        assert!(alice.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_message_is_persisted_then_broadcast() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;
        let mut bob = f.join("bob").await;

        let (respond_to, reply) = oneshot::channel();
        f.send(ChannelMessage::NewMessage {
            author: UserSummary::new(UserId::from("bob"), "bob"),
            body: MessageBody::text("hello"),
            respond_to,
        });
        let message = reply.await.unwrap().unwrap();

        for listener in [&mut alice, &mut bob] {
            assert!(matches!(listener.envelope().await, Envelope::ChatMessage(m) if m.id == message.id));
        }
        assert_eq!(f.service.call_count(Operation::CreateMessage), 1);
    }

    #[tokio::test]
    async fn test_rejected_message_is_not_broadcast() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;
        f.service.fail(
            Operation::CreateMessage,
            ServiceError::Unavailable("store down".to_string()),
        );

        let (respond_to, reply) = oneshot::channel();
        f.send(ChannelMessage::NewMessage {
            author: UserSummary::new(UserId::from("alice"), "alice"),
            body: MessageBody::text("lost"),
            respond_to,
        });

        let err = reply.await.unwrap().unwrap_err();
        assert!(matches!(err, RealtimeError::Service(ServiceError::Unavailable(_))));
        assert!(alice.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_only_author_can_edit() {
        let f = fixture().await;
        let mut alice = f.join("alice").await;
        let (respond_to, reply) = oneshot::channel();
        f.send(ChannelMessage::NewMessage {
            author: UserSummary::new(UserId::from("alice"), "alice"),
            body: MessageBody::text("draft"),
            respond_to,
        });
        let message = reply.await.unwrap().unwrap();
        alice.envelope().await;

        let (respond_to, reply) = oneshot::channel();
        f.send(ChannelMessage::EditMessage {
            user: UserId::from("bob"),
            message_id: message.id.clone(),
            body: MessageBody::text("hijacked"),
            respond_to,
        });
        assert!(matches!(
            reply.await.unwrap(),
            Err(RealtimeError::Service(ServiceError::Forbidden(_)))
        ));
        assert!(alice.drain().await.is_empty());

        let (respond_to, reply) = oneshot::channel();
        f.send(ChannelMessage::DeleteMessage {
            user: UserId::from("alice"),
            message_id: message.id.clone(),
            respond_to,
        });
        let deleted = reply.await.unwrap().unwrap();
        assert_eq!(deleted.message_id, message.id);
        assert!(matches!(alice.envelope().await, Envelope::DeleteMessage(_)));
    }
}
