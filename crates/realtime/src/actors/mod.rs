//! Presence and routing actors.
//!
//! ```text
//! spaces engine
//! ├── ServerActor (one per server, plus "global" for direct messages)
//! │   └── ChannelActor (one per channel, addressed under its server)
//! sessions engine
//! └── SessionActor (one per live WebSocket connection, addressed by user)
//! ```
//!
//! Sessions subscribe to spaces by sending `Connect` with themselves as
//! sender; spaces fan events out to the sessions they hold. The two
//! engines are independent so that shutting down sessions first lets every
//! session disconnect from still-running spaces.
//!
//! # Modules
//!
//! - [`server`] - `ServerActor`, membership and channel lifecycle
//! - [`channel`] - `ChannelActor`, channel membership, call presence, messages
//! - [`session`] - `SessionActor`, subscriptions and the outbound queue
//! - [`messages`] - message enums, events and snapshots

pub mod channel;
pub mod messages;
pub mod server;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use channel::ChannelActor;
pub use messages::*;
pub use server::ServerActor;
pub use session::SessionActor;

use crate::engine::{ActorKind, Address, DeliveryError, Engine, Pid};
use crate::errors::RealtimeError;
use crate::services::DomainService;

use common::{ServerId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use wire_protocol::{ConnectReason, DisconnectReason};

/// Handles shared by every actor: both engines and the domain service.
#[derive(Clone)]
pub struct ActorSystem {
    pub spaces: Engine,
    pub sessions: Engine,
    pub service: Arc<dyn DomainService>,
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSystem")
            .field("spaces", &self.spaces)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl ActorSystem {
    /// Build a system with fresh engines.
    pub fn new(service: Arc<dyn DomainService>, stop_timeout: Duration) -> Self {
        Self {
            spaces: Engine::with_stop_timeout("spaces", stop_timeout),
            sessions: Engine::with_stop_timeout("sessions", stop_timeout),
            service,
        }
    }

    /// Spawn a server actor for every persisted server and for `global`.
    ///
    /// # Errors
    ///
    /// Any load or spawn failure is fatal to process start.
    pub async fn bootstrap_spaces(&self) -> Result<usize, RealtimeError> {
        let mut servers: Vec<ServerId> = self
            .service
            .list_servers()
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if !servers.iter().any(ServerId::is_global) {
            servers.push(ServerId::global());
        }

        for server_id in &servers {
            self.spaces
                .spawn(
                    ServerActor::new(server_id.clone(), self.clone()),
                    Address::server(server_id),
                )
                .await?;
        }

        info!(
            target: "rt.actor.server",
            servers = servers.len(),
            channels = self.spaces.len().saturating_sub(servers.len()),
            "Spaces bootstrapped"
        );
        Ok(servers.len())
    }

    /// Live session of a user.
    #[must_use]
    pub fn session_of(&self, user_id: &UserId) -> Option<Pid> {
        self.sessions.lookup(&Address::user(user_id))
    }

    /// Live server actor.
    #[must_use]
    pub fn server_pid(&self, server_id: &ServerId) -> Option<Pid> {
        self.spaces.lookup(&Address::server(server_id))
    }

    /// Subscribe `session` to a server or channel.
    pub(crate) fn connect(
        &self,
        space: &Pid,
        reason: ConnectReason,
        session: &Pid,
    ) -> Result<(), DeliveryError> {
        match space.kind() {
            ActorKind::Server => {
                self.spaces
                    .send_with_sender(space, ServerMessage::Connect { reason }, session.clone())
            }
            ActorKind::Channel => {
                self.spaces
                    .send_with_sender(space, ChannelMessage::Connect { reason }, session.clone())
            }
            ActorKind::User => Err(DeliveryError::MessageType(space.to_string())),
        }
    }

    /// Unsubscribe `session` from a server or channel.
    pub(crate) fn disconnect(
        &self,
        space: &Pid,
        reason: DisconnectReason,
        session: &Pid,
    ) -> Result<(), DeliveryError> {
        match space.kind() {
            ActorKind::Server => self.spaces.send_with_sender(
                space,
                ServerMessage::Disconnect { reason },
                session.clone(),
            ),
            ActorKind::Channel => self.spaces.send_with_sender(
                space,
                ChannelMessage::Disconnect { reason },
                session.clone(),
            ),
            ActorKind::User => Err(DeliveryError::MessageType(space.to_string())),
        }
    }

    /// Deliver one shared event to every session in `targets`.
    ///
    /// Returns how many sessions accepted it. Sessions that stopped since
    /// the target list was built are skipped.
    pub(crate) fn notify<'a>(&self, targets: impl IntoIterator<Item = &'a Pid>, event: Event) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        for pid in targets {
            match self
                .sessions
                .send(pid, SessionMessage::Event(Arc::clone(&event)))
            {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    target: "rt.actor.session",
                    pid = %pid,
                    event = event.label(),
                    error = %e,
                    "Dropped event for stopped session"
                ),
            }
        }
        delivered
    }

    /// Sessions of `users` that are online.
    pub(crate) fn sessions_of<'a>(&self, users: impl IntoIterator<Item = &'a UserId>) -> Vec<Pid> {
        users
            .into_iter()
            .filter_map(|user| self.session_of(user))
            .collect()
    }
}
