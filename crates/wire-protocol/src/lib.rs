//! Wire protocol between session actors and their WebSocket transport.
//!
//! Every domain event travels as one binary frame carrying exactly one
//! [`envelope::Envelope`] variant. Liveness uses a separate fixed-length
//! heartbeat control payload that is never decoded as an event.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod envelope;
pub mod frame;

pub use codec::{decode_envelope, encode_envelope, is_heartbeat, CodecError};
pub use envelope::*;
pub use frame::{EventType, FrameHeader, HEARTBEAT, HEARTBEAT_TEXT};
