//! Codec for encoding and decoding event frames.

use crate::envelope::Envelope;
use crate::frame::{EventType, FrameHeader, HEARTBEAT};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Insufficient data to decode
    #[error("Insufficient data")]
    InsufficientData,

    /// Unsupported version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid event type
    #[error("Invalid event type: {0}")]
    InvalidEventType(u8),

    /// Payload exceeds the frame limit
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Payload JSON could not be encoded or decoded
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Whether a raw message is the heartbeat control payload.
#[must_use]
pub fn is_heartbeat(data: &[u8]) -> bool {
    data == HEARTBEAT
}

/// Encode an envelope to a binary frame
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized or exceeds
/// [`FrameHeader::MAX_PAYLOAD`].
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let (event_type, payload) = match envelope {
        Envelope::UserConnect(p) => (EventType::UserConnect, to_json(p)?),
        Envelope::UserDisconnect(p) => (EventType::UserDisconnect, to_json(p)?),
        Envelope::ChannelCreation(p) => (EventType::ChannelCreation, to_json(p)?),
        Envelope::ChannelRemoved(p) => (EventType::ChannelRemoved, to_json(p)?),
        Envelope::ChatMessage(p) => (EventType::ChatMessage, to_json(p)?),
        Envelope::EditMessage(p) => (EventType::EditMessage, to_json(p)?),
        Envelope::DeleteMessage(p) => (EventType::DeleteMessage, to_json(p)?),
        Envelope::NewUserInServer(p) => (EventType::NewUserInServer, to_json(p)?),
        Envelope::FriendInvite(p) => (EventType::FriendInvite, to_json(p)?),
        Envelope::AcceptFriend(p) => (EventType::AcceptFriend, to_json(p)?),
        Envelope::DeleteFriend(p) => (EventType::DeleteFriend, to_json(p)?),
        Envelope::CallInitialization(p) => (EventType::CallInitialization, to_json(p)?),
        Envelope::ConnectToCall(p) => (EventType::ConnectToCall, to_json(p)?),
        Envelope::DisconnectFromCall(p) => (EventType::DisconnectFromCall, to_json(p)?),
        Envelope::UserInformationChanged(p) => {
            (EventType::UserInformationChanged, to_json(p)?)
        }
        Envelope::RoleUpdate(p) => (EventType::RoleUpdate, to_json(p)?),
    };

    let payload_len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= FrameHeader::MAX_PAYLOAD)
        .ok_or(CodecError::PayloadTooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(FrameHeader::HEADER_SIZE + payload.len());

    // Version (1 byte)
    buf.put_u8(FrameHeader::VERSION);

    // Event Type (1 byte)
    buf.put_u8(event_type as u8);

    // Payload Length (4 bytes)
    buf.put_u32(payload_len);

    // Payload
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Decode a frame header without consuming the payload
///
/// # Errors
///
/// Returns an error if the header is truncated or carries an unknown
/// version or event type.
pub fn decode_header(data: &mut impl Buf) -> Result<FrameHeader, CodecError> {
    if data.remaining() < FrameHeader::HEADER_SIZE {
        return Err(CodecError::InsufficientData);
    }

    // Version (1 byte)
    let version = data.get_u8();
    if version != FrameHeader::VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    // Event Type (1 byte)
    let tag = data.get_u8();
    let event_type = EventType::from_u8(tag).ok_or(CodecError::InvalidEventType(tag))?;

    // Payload Length (4 bytes)
    let payload_len = data.get_u32();

    Ok(FrameHeader {
        version,
        event_type,
        payload_len,
    })
}

/// Decode an envelope from a binary frame
///
/// # Errors
///
/// Returns an error if the frame is truncated, malformed, or its payload
/// does not match the declared event type.
pub fn decode_envelope(data: &mut impl Buf) -> Result<Envelope, CodecError> {
    let header = decode_header(data)?;

    let payload_len = header.payload_len as usize;
    if payload_len > FrameHeader::MAX_PAYLOAD {
        return Err(CodecError::PayloadTooLarge(payload_len));
    }
    if data.remaining() < payload_len {
        return Err(CodecError::InsufficientData);
    }
    let payload = data.copy_to_bytes(payload_len);

    let envelope = match header.event_type {
        EventType::UserConnect => Envelope::UserConnect(from_json(&payload)?),
        EventType::UserDisconnect => Envelope::UserDisconnect(from_json(&payload)?),
        EventType::ChannelCreation => Envelope::ChannelCreation(from_json(&payload)?),
        EventType::ChannelRemoved => Envelope::ChannelRemoved(from_json(&payload)?),
        EventType::ChatMessage => Envelope::ChatMessage(from_json(&payload)?),
        EventType::EditMessage => Envelope::EditMessage(from_json(&payload)?),
        EventType::DeleteMessage => Envelope::DeleteMessage(from_json(&payload)?),
        EventType::NewUserInServer => Envelope::NewUserInServer(from_json(&payload)?),
        EventType::FriendInvite => Envelope::FriendInvite(from_json(&payload)?),
        EventType::AcceptFriend => Envelope::AcceptFriend(from_json(&payload)?),
        EventType::DeleteFriend => Envelope::DeleteFriend(from_json(&payload)?),
        EventType::CallInitialization => Envelope::CallInitialization(from_json(&payload)?),
        EventType::ConnectToCall => Envelope::ConnectToCall(from_json(&payload)?),
        EventType::DisconnectFromCall => Envelope::DisconnectFromCall(from_json(&payload)?),
        EventType::UserInformationChanged => {
            Envelope::UserInformationChanged(from_json(&payload)?)
        }
        EventType::RoleUpdate => Envelope::RoleUpdate(from_json(&payload)?),
    };

    Ok(envelope)
}

fn to_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(payload)?)
}

fn from_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}
