//! Structured actor addresses and process identifiers.

use common::{ChannelId, ServerId, UserId};
use std::fmt;
use std::sync::Arc;

/// Kind of actor living at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActorKind {
    /// One chat space.
    Server,
    /// One conversation or voice room, child of a server.
    Channel,
    /// One live user connection.
    User,
}

impl ActorKind {
    /// Returns the kind as a string for paths and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Server => "server",
            ActorKind::Channel => "channel",
            ActorKind::User => "user",
        }
    }
}

/// Logical path of an actor: `{kind, parent, id}`.
///
/// Channels are addressed under their server; servers and users have no
/// parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    kind: ActorKind,
    parent: Option<Arc<Address>>,
    id: String,
}

impl Address {
    /// Address of a server actor.
    #[must_use]
    pub fn server(server_id: &ServerId) -> Self {
        Self {
            kind: ActorKind::Server,
            parent: None,
            id: server_id.to_string(),
        }
    }

    /// Address of a channel actor under its server.
    #[must_use]
    pub fn channel(server_id: &ServerId, channel_id: &ChannelId) -> Self {
        Self {
            kind: ActorKind::Channel,
            parent: Some(Arc::new(Self::server(server_id))),
            id: channel_id.to_string(),
        }
    }

    /// Address of a user session actor.
    #[must_use]
    pub fn user(user_id: &UserId) -> Self {
        Self {
            kind: ActorKind::User,
            parent: None,
            id: user_id.to_string(),
        }
    }

    /// Kind of actor at this address.
    #[must_use]
    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    /// Raw id segment.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parent address, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Address> {
        self.parent.as_deref()
    }

    /// Server id for server addresses, or the owning server for channels.
    #[must_use]
    pub fn server_id(&self) -> Option<ServerId> {
        match self.kind {
            ActorKind::Server => Some(ServerId::from(self.id.as_str())),
            ActorKind::Channel => self.parent().and_then(Address::server_id),
            ActorKind::User => None,
        }
    }

    /// Channel id for channel addresses.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        (self.kind == ActorKind::Channel).then(|| ChannelId::from(self.id.as_str()))
    }

    /// User id for session addresses.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        (self.kind == ActorKind::User).then(|| UserId::from(self.id.as_str()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}/")?;
        }
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

/// Identifier of one live actor incarnation.
///
/// Two actors spawned at the same address get different incarnations, so a
/// PID held after its actor stopped never reaches a successor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pid {
    address: Arc<Address>,
    incarnation: u64,
}

impl Pid {
    pub(crate) fn new(address: Address, incarnation: u64) -> Self {
        Self {
            address: Arc::new(address),
            incarnation,
        }
    }

    /// Address this PID was spawned at.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Engine-unique incarnation number.
    #[must_use]
    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    /// Shorthand for `address().kind()`.
    #[must_use]
    pub fn kind(&self) -> ActorKind {
        self.address.kind()
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.incarnation)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_address_has_server_parent() {
        let address = Address::channel(&ServerId::from("s1"), &ChannelId::from("c1"));

        assert_eq!(address.kind(), ActorKind::Channel);
        assert_eq!(address.server_id(), Some(ServerId::from("s1")));
        assert_eq!(address.channel_id(), Some(ChannelId::from("c1")));
        assert_eq!(address.user_id(), None);
        assert_eq!(address.parent(), Some(&Address::server(&ServerId::from("s1"))));
        assert_eq!(address.to_string(), "server/s1/channel/c1");
    }

    #[test]
    fn test_typed_accessors_match_kind() {
        let server = Address::server(&ServerId::from("s1"));
        assert_eq!(server.server_id(), Some(ServerId::from("s1")));
        assert_eq!(server.channel_id(), None);

        let user = Address::user(&UserId::from("u1"));
        assert_eq!(user.user_id(), Some(UserId::from("u1")));
        assert_eq!(user.server_id(), None);
        assert_eq!(user.to_string(), "user/u1");
    }

    #[test]
    fn test_ids_containing_slashes_stay_intact() {
        let address = Address::user(&UserId::from("a/b"));
        assert_eq!(address.user_id(), Some(UserId::from("a/b")));
    }

    #[test]
    fn test_pids_differ_by_incarnation() {
        let address = Address::server(&ServerId::from("s1"));
        let first = Pid::new(address.clone(), 1);
        let second = Pid::new(address, 2);

        assert_ne!(first, second);
        assert_eq!(first.address(), second.address());
        assert_eq!(first.to_string(), "server/s1#1");
    }
}
