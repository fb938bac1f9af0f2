//! Event payloads carried inside wire frames.
//!
//! Each [`Envelope`] variant maps to exactly one [`EventType`] tag; the
//! payload struct is serialized as JSON after the frame header.
//!
//! [`EventType`]: crate::frame::EventType

use chrono::{DateTime, Utc};
use common::{ChannelId, MessageId, RoleId, ServerId, UserId};
use serde::{Deserialize, Serialize};

/// Why a user connects to a server or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectReason {
    /// Session bootstrap or subscription to an existing membership.
    Connecting,
    /// The user just became a member of the server.
    JoinServer,
}

/// Why a user disconnects from a server or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    /// Session teardown.
    Disconnecting,
    /// The user left the server for good.
    LeaveServer,
}

/// Kind of channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Text chat channel.
    Textual,
    /// Voice channel with call presence.
    Voice,
    /// Private direct-message channel (lives on the global server).
    Dm,
}

/// Public profile of a user, as shown to other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
}

impl UserSummary {
    /// Minimal profile with only identity fields set.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id,
            display_name: username.clone(),
            username,
            avatar: None,
            banner: None,
            about: None,
        }
    }
}

/// A user connected to a server.
///
/// The joining user receives the whole join-ordered member list in `users`;
/// every other member receives an empty list and only `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConnect {
    pub server_id: ServerId,
    pub user_id: UserId,
    pub reason: ConnectReason,
    #[serde(default)]
    pub users: Vec<UserId>,
}

/// A user disconnected from a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDisconnect {
    pub server_id: ServerId,
    pub user_id: UserId,
    pub reason: DisconnectReason,
}

/// A channel was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub server_id: ServerId,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    pub x: i32,
    pub y: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A channel was removed (deleted, or a direct-message channel closed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRemoved {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
}

/// A chat message as broadcast to channel members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author: UserSummary,
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    /// Rich-text document produced by the client editor, relayed untouched.
    pub content: serde_json::Value,
    #[serde(default)]
    pub mentions_users: Vec<UserId>,
    #[serde(default)]
    pub mentions_channels: Vec<ChannelId>,
    #[serde(default)]
    pub everyone: bool,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chat message was edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedMessage {
    pub message_id: MessageId,
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub content: serde_json::Value,
    #[serde(default)]
    pub mentions_users: Vec<UserId>,
    #[serde(default)]
    pub mentions_channels: Vec<ChannelId>,
    #[serde(default)]
    pub everyone: bool,
    pub updated_at: DateTime<Utc>,
}

/// A chat message was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedMessage {
    pub message_id: MessageId,
    pub server_id: ServerId,
    pub channel_id: ChannelId,
}

/// A new member joined a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserInServer {
    pub server_id: ServerId,
    pub user: UserSummary,
}

/// Incoming friend request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendInvite {
    pub invite_id: String,
    pub user: UserSummary,
}

/// A friend request was accepted.
///
/// `sender` is true for the user who originally sent the invite; only they
/// receive the accepting user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptFriend {
    pub invite_id: String,
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    pub sender: bool,
}

/// A friendship was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFriend {
    pub invite_id: String,
    pub user_id: UserId,
}

/// One participant of a voice call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUser {
    pub user_id: UserId,
    pub deafened: bool,
    pub muted: bool,
}

/// Snapshot of a channel's call, sent only to a user joining the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInitialization {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub call_users: Vec<CallUser>,
}

/// A user joined (or updated their state in) a voice call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectToCall {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub deafened: bool,
    pub muted: bool,
}

/// A user left a voice call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectFromCall {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
}

/// A user's public profile changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInformationChanged {
    pub user: UserSummary,
}

/// Role administration inside a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoleEvent {
    Created {
        role_id: RoleId,
        name: String,
        color: String,
    },
    MemberAdded {
        role_id: RoleId,
        user_id: UserId,
    },
    MemberRemoved {
        role_id: RoleId,
        user_id: UserId,
    },
    RankingChanged {
        roles: Vec<RoleId>,
    },
    Deleted {
        role_id: RoleId,
    },
}

/// Role change broadcast to server members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdate {
    pub server_id: ServerId,
    pub event: RoleEvent,
}

/// A wire event: exactly one populated variant per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    UserConnect(UserConnect),
    UserDisconnect(UserDisconnect),
    ChannelCreation(ChannelInfo),
    ChannelRemoved(ChannelRemoved),
    ChatMessage(ChatMessage),
    EditMessage(EditedMessage),
    DeleteMessage(DeletedMessage),
    NewUserInServer(NewUserInServer),
    FriendInvite(FriendInvite),
    AcceptFriend(AcceptFriend),
    DeleteFriend(DeleteFriend),
    CallInitialization(CallInitialization),
    ConnectToCall(ConnectToCall),
    DisconnectFromCall(DisconnectFromCall),
    UserInformationChanged(UserInformationChanged),
    RoleUpdate(RoleUpdate),
}

impl Envelope {
    /// Bounded label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Envelope::UserConnect(_) => "user_connect",
            Envelope::UserDisconnect(_) => "user_disconnect",
            Envelope::ChannelCreation(_) => "channel_creation",
            Envelope::ChannelRemoved(_) => "channel_removed",
            Envelope::ChatMessage(_) => "chat_message",
            Envelope::EditMessage(_) => "edit_message",
            Envelope::DeleteMessage(_) => "delete_message",
            Envelope::NewUserInServer(_) => "new_user_in_server",
            Envelope::FriendInvite(_) => "friend_invite",
            Envelope::AcceptFriend(_) => "accept_friend",
            Envelope::DeleteFriend(_) => "delete_friend",
            Envelope::CallInitialization(_) => "call_initialization",
            Envelope::ConnectToCall(_) => "connect_to_call",
            Envelope::DisconnectFromCall(_) => "disconnect_from_call",
            Envelope::UserInformationChanged(_) => "user_information_changed",
            Envelope::RoleUpdate(_) => "role_update",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_use_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConnectReason::JoinServer).unwrap(),
            "\"JOIN_SERVER\""
        );
        assert_eq!(
            serde_json::to_string(&DisconnectReason::Disconnecting).unwrap(),
            "\"DISCONNECTING\""
        );
    }

    #[test]
    fn test_channel_type_field_is_named_type() {
        let now = Utc::now();
        let info = ChannelInfo {
            id: ChannelId::from("c1"),
            server_id: ServerId::from("s1"),
            name: "general".to_string(),
            channel_type: ChannelType::Voice,
            description: String::new(),
            users: vec![],
            roles: vec![],
            x: 10,
            y: 20,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "voice");
        assert!(json.get("channel_type").is_none());
    }

    #[test]
    fn test_role_event_is_tagged_by_action() {
        let event = RoleEvent::MemberAdded {
            role_id: RoleId::from("r1"),
            user_id: UserId::from("u1"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "member_added");
        assert_eq!(json["user_id"], "u1");
    }

    #[test]
    fn test_user_summary_omits_empty_optionals() {
        let summary = UserSummary::new(UserId::from("u1"), "alice");
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["display_name"], "alice");
        assert!(json.get("avatar").is_none());
    }
}
