//! Frame header layout and event type tags.

/// Heartbeat control payload exchanged as a bare WebSocket message.
pub const HEARTBEAT: &[u8] = HEARTBEAT_TEXT.as_bytes();

/// Heartbeat as a text message. Replies are always sent in this form.
pub const HEARTBEAT_TEXT: &str = "heartbeat";

/// Event type tag carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    UserConnect = 0x01,
    UserDisconnect = 0x02,
    ChannelCreation = 0x03,
    ChannelRemoved = 0x04,
    ChatMessage = 0x05,
    EditMessage = 0x06,
    DeleteMessage = 0x07,
    NewUserInServer = 0x08,
    FriendInvite = 0x09,
    AcceptFriend = 0x0A,
    DeleteFriend = 0x0B,
    CallInitialization = 0x0C,
    ConnectToCall = 0x0D,
    DisconnectFromCall = 0x0E,
    UserInformationChanged = 0x0F,
    RoleUpdate = 0x10,
}

impl EventType {
    /// Parse a tag byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::UserConnect,
            0x02 => Self::UserDisconnect,
            0x03 => Self::ChannelCreation,
            0x04 => Self::ChannelRemoved,
            0x05 => Self::ChatMessage,
            0x06 => Self::EditMessage,
            0x07 => Self::DeleteMessage,
            0x08 => Self::NewUserInServer,
            0x09 => Self::FriendInvite,
            0x0A => Self::AcceptFriend,
            0x0B => Self::DeleteFriend,
            0x0C => Self::CallInitialization,
            0x0D => Self::ConnectToCall,
            0x0E => Self::DisconnectFromCall,
            0x0F => Self::UserInformationChanged,
            0x10 => Self::RoleUpdate,
            _ => return None,
        })
    }
}

/// Frame header.
///
/// Frame format (6 bytes header):
/// - Version: 1 byte
/// - Event Type: 1 byte
/// - Payload Length: 4 bytes (big endian)
/// - Payload: variable (JSON-encoded event)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Type of the event in the payload
    pub event_type: EventType,
    /// Payload length in bytes
    pub payload_len: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const HEADER_SIZE: usize = 6;

    /// Current protocol version
    pub const VERSION: u8 = 1;

    /// Largest accepted payload (1 MiB)
    pub const MAX_PAYLOAD: usize = 1 << 20;
}
