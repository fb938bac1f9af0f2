//! Identifier newtypes for servers, channels, users, messages and roles.
//!
//! Ids are opaque strings assigned by the persistence layer (snowflakes in
//! production). They serialize transparently so wire payloads carry plain
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Id of the reserved server that owns direct-message channels.
pub const GLOBAL_SERVER_ID: &str = "global";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a server (a chat space).
    ServerId
);

string_id!(
    /// Unique identifier for a channel inside a server.
    ChannelId
);

string_id!(
    /// Unique identifier for a user.
    UserId
);

string_id!(
    /// Unique identifier for a chat message.
    MessageId
);

string_id!(
    /// Unique identifier for a server role.
    RoleId
);

impl ServerId {
    /// The reserved server owning direct-message channels.
    #[must_use]
    pub fn global() -> Self {
        Self(GLOBAL_SERVER_ID.to_string())
    }

    /// Whether this is the reserved direct-message server.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_SERVER_ID
    }
}

impl UserId {
    /// Pseudo-user used as the creator of direct-message channels.
    #[must_use]
    pub fn global() -> Self {
        Self(GLOBAL_SERVER_ID.to_string())
    }

    /// Whether this is the direct-message pseudo-user.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_SERVER_ID
    }
}
