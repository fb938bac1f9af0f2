//! Message types for the server, channel and session actors.
//!
//! Each actor accepts one closed enum and matches it exhaustively.
//! Persistence-backed requests carry a [`Reply`] so callers learn about
//! authorization and storage failures; nothing is broadcast on failure.

use crate::engine::Pid;
use crate::errors::RealtimeError;
use crate::services::{MessageBody, NewChannel};

use bytes::Bytes;
use common::{ChannelId, MessageId, ServerId, UserId};
use std::sync::Arc;
use tokio::sync::oneshot;
use wire_protocol::{
    CallUser, ChannelInfo, ChatMessage, ConnectReason, DeletedMessage, DisconnectReason,
    EditedMessage, Envelope, RoleEvent, UserSummary,
};

/// One-shot reply channel for persistence-backed requests.
pub type Reply<T> = oneshot::Sender<Result<T, RealtimeError>>;

/// Messages accepted by a server actor.
#[derive(Debug)]
pub enum ServerMessage {
    /// The sending session subscribes to this server.
    Connect { reason: ConnectReason },
    /// The sending session unsubscribes from this server.
    Disconnect { reason: DisconnectReason },
    CreateChannel {
        creator: UserId,
        channel: NewChannel,
        respond_to: Reply<ChannelInfo>,
    },
    RemoveChannel {
        user: UserId,
        channel_id: ChannelId,
        respond_to: Reply<()>,
    },
    /// Stop a channel without touching storage.
    KillChannel {
        channel_id: ChannelId,
        users: Vec<UserId>,
    },
    /// Bring a persisted direct-message channel back to life. Replies once
    /// the listed sessions have been told to subscribe.
    StartChannel {
        channel_id: ChannelId,
        users: Vec<UserId>,
        respond_to: Reply<Pid>,
    },
    NewUserInServer { user: UserSummary },
    UserInformationChanged { user: UserSummary },
    Role(RoleEvent),
    RemoveServer {
        user: UserId,
        respond_to: Reply<()>,
    },
    Inspect {
        respond_to: oneshot::Sender<ServerSnapshot>,
    },
}

impl ServerMessage {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            ServerMessage::Connect { .. } => "server_connect",
            ServerMessage::Disconnect { .. } => "server_disconnect",
            ServerMessage::CreateChannel { .. } => "create_channel",
            ServerMessage::RemoveChannel { .. } => "remove_channel",
            ServerMessage::KillChannel { .. } => "kill_channel",
            ServerMessage::StartChannel { .. } => "start_channel",
            ServerMessage::NewUserInServer { .. } => "new_user_in_server",
            ServerMessage::UserInformationChanged { .. } => "server_user_information_changed",
            ServerMessage::Role(_) => "role",
            ServerMessage::RemoveServer { .. } => "remove_server",
            ServerMessage::Inspect { .. } => "server_inspect",
        }
    }
}

/// Messages accepted by a channel actor.
#[derive(Debug)]
pub enum ChannelMessage {
    Connect { reason: ConnectReason },
    Disconnect { reason: DisconnectReason },
    ConnectToCall {
        user_id: UserId,
        deafened: bool,
        muted: bool,
    },
    DisconnectFromCall { user_id: UserId },
    NewMessage {
        author: UserSummary,
        body: MessageBody,
        respond_to: Reply<ChatMessage>,
    },
    EditMessage {
        user: UserId,
        message_id: MessageId,
        body: MessageBody,
        respond_to: Reply<EditedMessage>,
    },
    DeleteMessage {
        user: UserId,
        message_id: MessageId,
        respond_to: Reply<DeletedMessage>,
    },
    UserInformationChanged { user: UserSummary },
    Inspect {
        respond_to: oneshot::Sender<ChannelSnapshot>,
    },
}

impl ChannelMessage {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            ChannelMessage::Connect { .. } => "channel_connect",
            ChannelMessage::Disconnect { .. } => "channel_disconnect",
            ChannelMessage::ConnectToCall { .. } => "connect_to_call",
            ChannelMessage::DisconnectFromCall { .. } => "disconnect_from_call",
            ChannelMessage::NewMessage { .. } => "new_message",
            ChannelMessage::EditMessage { .. } => "edit_message",
            ChannelMessage::DeleteMessage { .. } => "delete_message",
            ChannelMessage::UserInformationChanged { .. } => "channel_user_information_changed",
            ChannelMessage::Inspect { .. } => "channel_inspect",
        }
    }
}

/// Notification delivered to session actors.
///
/// One value is built per fan-out and shared through an `Arc`.
#[derive(Debug)]
pub enum Event {
    /// Forward to the transport as-is.
    Envelope(Envelope),
    /// A channel visible to this user was created; subscribe to it.
    ChannelCreated { channel: ChannelInfo, pid: Pid },
    /// A channel this user may be subscribed to is gone.
    ChannelRemoved {
        server_id: ServerId,
        channel_id: ChannelId,
        pid: Pid,
    },
    /// The user created a server; subscribe to it.
    ServerJoined { pid: Pid },
    /// A direct-message channel came back to life; subscribe to it.
    ChannelStarted { pid: Pid },
    /// A server admitted this session into these spaces.
    Subscribed { pids: Vec<Pid> },
    /// A server released this session from these spaces.
    Unsubscribed { pids: Vec<Pid> },
}

impl Event {
    /// Bounded label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Event::Envelope(envelope) => envelope.label(),
            Event::ChannelCreated { .. } => "channel_created",
            Event::ChannelRemoved { .. } => "channel_removed",
            Event::ServerJoined { .. } => "server_joined",
            Event::ChannelStarted { .. } => "channel_started",
            Event::Subscribed { .. } => "subscribed",
            Event::Unsubscribed { .. } => "unsubscribed",
        }
    }
}

/// Messages accepted by a session actor.
#[derive(Debug)]
pub enum SessionMessage {
    Event(Arc<Event>),
    Inspect {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// Frame queued for the transport writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Encoded envelope.
    Binary(Bytes),
    /// Heartbeat reply.
    Heartbeat,
}

/// Membership view of a server actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub server_id: ServerId,
    /// Connected users in join order.
    pub users: Vec<UserId>,
    /// Session PID per connected user, in join order.
    pub sessions: Vec<Pid>,
    /// Live channels, ordered by id.
    pub channels: Vec<(ChannelId, Pid)>,
}

/// Membership view of a channel actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    /// Connected users, ordered by id.
    pub users: Vec<UserId>,
    /// Call participants, ordered by id.
    pub call: Vec<CallUser>,
}

/// Subscription view of a session actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user_id: UserId,
    pub servers: Vec<Pid>,
    pub channels: Vec<Pid>,
    /// Frames dropped because the transport fell behind.
    pub dropped: u64,
}
