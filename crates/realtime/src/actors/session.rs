//! Session actor: one per live user connection.
//!
//! Bridges space events to the transport. Every event is encoded once into
//! a wire frame and pushed onto a bounded outbound queue drained by the
//! gateway's writer task; a full queue drops the frame instead of stalling
//! the actor.
//!
//! The session remembers every server and channel it subscribed to so its
//! stop hook can send each one a `Disconnect`.

use super::messages::{Event, OutboundFrame, SessionMessage, SessionSnapshot};
use super::ActorSystem;
use crate::engine::{Actor, ActorKind, Address, Context, Pid};
use crate::errors::RealtimeError;
use crate::observability::metrics as rt_metrics;

use async_trait::async_trait;
use common::{ServerId, UserId};
use std::collections::HashSet;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use wire_protocol::{encode_envelope, ChannelRemoved, ConnectReason, DisconnectReason, Envelope};

/// Actor for one user connection.
pub struct SessionActor {
    user_id: UserId,
    system: ActorSystem,
    outbound: mpsc::Sender<OutboundFrame>,
    subscribed_servers: HashSet<Pid>,
    subscribed_channels: HashSet<Pid>,
    dropped: u64,
}

impl SessionActor {
    pub fn new(user_id: UserId, system: ActorSystem, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            user_id,
            system,
            outbound,
            subscribed_servers: HashSet::new(),
            subscribed_channels: HashSet::new(),
            dropped: 0,
        }
    }

    /// Record `space` and send it `Connect` if it is new.
    fn subscribe(&mut self, ctx: &Context, space: Pid) {
        let inserted = match space.kind() {
            ActorKind::Server => self.subscribed_servers.insert(space.clone()),
            ActorKind::Channel => self.subscribed_channels.insert(space.clone()),
            ActorKind::User => false,
        };
        if !inserted {
            return;
        }
        if let Err(e) = self
            .system
            .connect(&space, ConnectReason::Connecting, ctx.pid())
        {
            debug!(
                target: "rt.actor.session",
                user_id = %self.user_id,
                space = %space,
                error = %e,
                "Subscription target already stopped"
            );
        }
    }

    fn record(&mut self, space: Pid) {
        match space.kind() {
            ActorKind::Server => {
                self.subscribed_servers.insert(space);
            }
            ActorKind::Channel => {
                self.subscribed_channels.insert(space);
            }
            ActorKind::User => {}
        }
    }

    fn forget(&mut self, space: &Pid) {
        self.subscribed_servers.remove(space);
        self.subscribed_channels.remove(space);
    }

    fn write(&mut self, envelope: &Envelope) {
        let frame = match encode_envelope(envelope) {
            Ok(bytes) => OutboundFrame::Binary(bytes),
            Err(e) => {
                error!(
                    target: "rt.actor.session",
                    user_id = %self.user_id,
                    event = envelope.label(),
                    error = %e,
                    "Failed to encode envelope"
                );
                return;
            }
        };

        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                rt_metrics::record_message_dropped(ActorKind::User.as_str());
                warn!(
                    target: "rt.actor.session",
                    user_id = %self.user_id,
                    event = envelope.label(),
                    dropped = self.dropped,
                    "Outbound queue full, frame dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "rt.actor.session",
                    user_id = %self.user_id,
                    "Transport closed"
                );
            }
        }
    }

    fn handle_event(&mut self, ctx: &Context, event: &Event) {
        match event {
            Event::Envelope(envelope) => self.write(envelope),
            Event::ChannelCreated { channel, pid } => {
                self.write(&Envelope::ChannelCreation(channel.clone()));
                self.subscribe(ctx, pid.clone());
            }
            Event::ChannelRemoved {
                server_id,
                channel_id,
                pid,
            } => {
                self.write(&Envelope::ChannelRemoved(ChannelRemoved {
                    server_id: server_id.clone(),
                    channel_id: channel_id.clone(),
                }));
                self.forget(pid);
            }
            Event::ServerJoined { pid } | Event::ChannelStarted { pid } => {
                self.subscribe(ctx, pid.clone());
            }
            Event::Subscribed { pids } => {
                for pid in pids {
                    self.record(pid.clone());
                }
            }
            Event::Unsubscribed { pids } => {
                for pid in pids {
                    self.forget(pid);
                }
            }
        }
    }

    async fn connect_memberships(&mut self, ctx: &Context) -> Result<(), RealtimeError> {
        let servers = self.system.service.list_servers_of_user(&self.user_id).await?;

        for server_id in servers {
            let Some(server) = self.system.spaces.lookup(&Address::server(&server_id)) else {
                debug!(
                    target: "rt.actor.session",
                    user_id = %self.user_id,
                    server_id = %server_id,
                    "Member server is not running"
                );
                continue;
            };
            self.subscribe(ctx, server);

            let channels = match self.system.service.list_channels_of_server(&server_id).await {
                Ok(channels) => channels,
                Err(e) => {
                    warn!(
                        target: "rt.actor.session",
                        user_id = %self.user_id,
                        server_id = %server_id,
                        error = %e,
                        "Failed to load channels"
                    );
                    continue;
                }
            };
            for channel in channels {
                if let Some(pid) = self
                    .system
                    .spaces
                    .lookup(&Address::channel(&server_id, &channel.id))
                {
                    self.subscribe(ctx, pid);
                }
            }
        }

        // Direct messages: only the channels this user is part of.
        let global = ServerId::global();
        let direct = self.system.service.list_channels_of_server(&global).await?;
        let pids: Vec<Pid> = direct
            .iter()
            .filter(|c| c.users.contains(&self.user_id))
            .filter_map(|c| self.system.spaces.lookup(&Address::channel(&global, &c.id)))
            .collect();
        for pid in pids {
            self.subscribe(ctx, pid);
        }
        Ok(())
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut servers: Vec<Pid> = self.subscribed_servers.iter().cloned().collect();
        let mut channels: Vec<Pid> = self.subscribed_channels.iter().cloned().collect();
        servers.sort_by_key(ToString::to_string);
        channels.sort_by_key(ToString::to_string);
        SessionSnapshot {
            user_id: self.user_id.clone(),
            servers,
            channels,
            dropped: self.dropped,
        }
    }
}

#[async_trait]
impl Actor for SessionActor {
    type Message = SessionMessage;

    async fn started(&mut self, ctx: &Context) -> Result<(), RealtimeError> {
        if let Err(e) = self.connect_memberships(ctx).await {
            error!(
                target: "rt.actor.session",
                user_id = %self.user_id,
                error = %e,
                "Failed to load memberships, session has no subscriptions"
            );
        }

        info!(
            target: "rt.actor.session",
            user_id = %self.user_id,
            servers = self.subscribed_servers.len(),
            channels = self.subscribed_channels.len(),
            "Session started"
        );
        Ok(())
    }

    async fn handle(&mut self, ctx: &Context, message: SessionMessage, _sender: Option<Pid>) {
        match message {
            SessionMessage::Event(event) => self.handle_event(ctx, &event),
            SessionMessage::Inspect { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    async fn stopped(&mut self, ctx: &Context) {
        let servers = std::mem::take(&mut self.subscribed_servers);
        let channels = std::mem::take(&mut self.subscribed_channels);
        let total = servers.len() + channels.len();

        for space in servers.iter().chain(channels.iter()) {
            let _ = self
                .system
                .disconnect(space, DisconnectReason::Disconnecting, ctx.pid());
        }

        info!(
            target: "rt.actor.session",
            user_id = %self.user_id,
            disconnected = total,
            dropped = self.dropped,
            "Session stopped"
        );
    }
}
