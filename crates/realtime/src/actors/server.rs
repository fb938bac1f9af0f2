//! Server actor: one per chat space.
//!
//! Owns the server's membership (which sessions are connected, in join
//! order) and the lifecycle of its channel actors. Because every mutation
//! runs inside this actor's single task, membership changes, channel
//! creation and broadcasts are totally ordered per server.

use super::messages::{Event, Reply, ServerMessage, ServerSnapshot};
use super::{ActorSystem, ChannelActor};
use crate::engine::{Actor, Address, Context, Pid};
use crate::errors::RealtimeError;
use crate::observability::metrics as rt_metrics;
use crate::services::NewChannel;

use async_trait::async_trait;
use common::{ChannelId, ServerId, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use wire_protocol::{
    ChannelInfo, ConnectReason, DisconnectReason, Envelope, NewUserInServer, RoleEvent, RoleUpdate,
    UserConnect, UserDisconnect, UserInformationChanged,
};

/// Actor for one server.
pub struct ServerActor {
    server_id: ServerId,
    system: ActorSystem,
    channels: BTreeMap<ChannelId, Pid>,
    connected_users: HashMap<UserId, Pid>,
    /// Join order; always the same set as `connected_users`.
    user_order: Vec<UserId>,
}

impl ServerActor {
    pub fn new(server_id: ServerId, system: ActorSystem) -> Self {
        Self {
            server_id,
            system,
            channels: BTreeMap::new(),
            connected_users: HashMap::new(),
            user_order: Vec::new(),
        }
    }

    fn member_sessions(&self) -> Vec<Pid> {
        self.user_order
            .iter()
            .filter_map(|user| self.connected_users.get(user).cloned())
            .collect()
    }

    async fn spawn_channel(&self, ctx: &Context, channel_id: &ChannelId) -> Result<Pid, RealtimeError> {
        let pid = ctx
            .engine()
            .spawn(
                ChannelActor::new(self.server_id.clone(), channel_id.clone(), self.system.clone()),
                Address::channel(&self.server_id, channel_id),
            )
            .await?;
        Ok(pid)
    }

    fn handle_connect(&mut self, ctx: &Context, reason: ConnectReason, sender: Option<Pid>) {
        let Some((session, user_id)) = session_sender(sender) else {
            warn!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                "Connect without a session sender"
            );
            return;
        };

        match self.connected_users.get(&user_id).cloned() {
            Some(current) if current == session => {
                warn!(
                    target: "rt.actor.server",
                    server_id = %self.server_id,
                    user_id = %user_id,
                    "Session already connected"
                );
                return;
            }
            Some(current) => {
                // Reconnect whose old session has not disconnected yet.
                debug!(
                    target: "rt.actor.server",
                    server_id = %self.server_id,
                    user_id = %user_id,
                    old = %current,
                    new = %session,
                    "Session takeover"
                );
                self.connected_users.insert(user_id.clone(), session.clone());
                self.system.notify(
                    [&session],
                    Event::Envelope(Envelope::UserConnect(UserConnect {
                        server_id: self.server_id.clone(),
                        user_id: user_id.clone(),
                        reason,
                        users: self.user_order.clone(),
                    })),
                );
            }
            None => {
                self.connected_users.insert(user_id.clone(), session.clone());
                self.user_order.push(user_id.clone());

                self.system.notify(
                    [&session],
                    Event::Envelope(Envelope::UserConnect(UserConnect {
                        server_id: self.server_id.clone(),
                        user_id: user_id.clone(),
                        reason,
                        users: self.user_order.clone(),
                    })),
                );
                let others: Vec<Pid> = self
                    .member_sessions()
                    .into_iter()
                    .filter(|pid| *pid != session)
                    .collect();
                self.system.notify(
                    &others,
                    Event::Envelope(Envelope::UserConnect(UserConnect {
                        server_id: self.server_id.clone(),
                        user_id: user_id.clone(),
                        reason,
                        users: Vec::new(),
                    })),
                );

                debug!(
                    target: "rt.actor.server",
                    server_id = %self.server_id,
                    user_id = %user_id,
                    members = self.user_order.len(),
                    "User connected"
                );
            }
        }

        if reason == ConnectReason::JoinServer {
            for channel in self.channels.values() {
                let _ = self.system.connect(channel, reason, &session);
            }
            let mut pids = vec![ctx.pid().clone()];
            pids.extend(self.channels.values().cloned());
            self.system.notify([&session], Event::Subscribed { pids });
        }
    }

    fn handle_disconnect(&mut self, ctx: &Context, reason: DisconnectReason, sender: Option<Pid>) {
        let Some((session, user_id)) = session_sender(sender) else {
            warn!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                "Disconnect without a session sender"
            );
            return;
        };

        if self.connected_users.get(&user_id) != Some(&session) {
            warn!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                user_id = %user_id,
                session = %session,
                "Disconnect from a session that is not connected"
            );
            return;
        }

        self.connected_users.remove(&user_id);
        self.user_order.retain(|user| *user != user_id);

        let remaining = self.member_sessions();
        self.system.notify(
            &remaining,
            Event::Envelope(Envelope::UserDisconnect(UserDisconnect {
                server_id: self.server_id.clone(),
                user_id: user_id.clone(),
                reason,
            })),
        );

        if reason == DisconnectReason::LeaveServer {
            for channel in self.channels.values() {
                let _ = self.system.disconnect(channel, reason, &session);
            }
            let mut pids = vec![ctx.pid().clone()];
            pids.extend(self.channels.values().cloned());
            self.system.notify([&session], Event::Unsubscribed { pids });
        }

        debug!(
            target: "rt.actor.server",
            server_id = %self.server_id,
            user_id = %user_id,
            members = self.user_order.len(),
            "User disconnected"
        );
    }

    async fn handle_create_channel(
        &mut self,
        ctx: &Context,
        creator: UserId,
        channel: NewChannel,
        respond_to: Reply<ChannelInfo>,
    ) {
        let targeted = channel.is_targeted();
        let users = channel.users.clone();
        let roles = channel.roles.clone();

        let info = match self
            .system
            .service
            .create_channel(&creator, &self.server_id, channel)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                error!(
                    target: "rt.actor.server",
                    server_id = %self.server_id,
                    creator = %creator,
                    error = %e,
                    "Channel creation rejected"
                );
                let _ = respond_to.send(Err(e.into()));
                return;
            }
        };

        let pid = match self.spawn_channel(ctx, &info.id).await {
            Ok(pid) => pid,
            Err(e) => {
                error!(
                    target: "rt.actor.server",
                    server_id = %self.server_id,
                    channel_id = %info.id,
                    error = %e,
                    "Failed to start channel actor"
                );
                let _ = respond_to.send(Err(e));
                return;
            }
        };
        self.channels.insert(info.id.clone(), pid.clone());

        let targets = if targeted {
            let mut recipients: Vec<UserId> = users;
            if !roles.is_empty() {
                match self
                    .system
                    .service
                    .users_with_roles(&self.server_id, &roles)
                    .await
                {
                    Ok(role_members) => recipients.extend(role_members),
                    Err(e) => warn!(
                        target: "rt.actor.server",
                        server_id = %self.server_id,
                        error = %e,
                        "Failed to resolve role members, announcing to explicit users only"
                    ),
                }
            }
            if !creator.is_global() {
                recipients.push(creator);
            }
            let mut seen = HashSet::new();
            recipients.retain(|user| seen.insert(user.clone()));
            self.system.sessions_of(&recipients)
        } else {
            self.member_sessions()
        };

        let delivered = self.system.notify(
            &targets,
            Event::ChannelCreated {
                channel: info.clone(),
                pid,
            },
        );

        info!(
            target: "rt.actor.server",
            server_id = %self.server_id,
            channel_id = %info.id,
            notified = delivered,
            "Channel created"
        );
        let _ = respond_to.send(Ok(info));
    }

    async fn handle_remove_channel(
        &mut self,
        user: UserId,
        channel_id: ChannelId,
        respond_to: Reply<()>,
    ) {
        if let Err(e) = self
            .system
            .service
            .delete_channel(&user, &self.server_id, &channel_id)
            .await
        {
            error!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                channel_id = %channel_id,
                user_id = %user,
                error = %e,
                "Channel deletion rejected"
            );
            let _ = respond_to.send(Err(e.into()));
            return;
        }

        // A persisted channel may have no live actor, e.g. a killed DM.
        if let Some(pid) = self.channels.remove(&channel_id) {
            self.stop_channel(&pid);
            let members = self.member_sessions();
            self.system.notify(
                &members,
                Event::ChannelRemoved {
                    server_id: self.server_id.clone(),
                    channel_id: channel_id.clone(),
                    pid,
                },
            );
        } else {
            debug!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                channel_id = %channel_id,
                "Removed channel was not running"
            );
        }

        info!(
            target: "rt.actor.server",
            server_id = %self.server_id,
            channel_id = %channel_id,
            "Channel removed"
        );
        let _ = respond_to.send(Ok(()));
    }

    fn handle_kill_channel(&mut self, channel_id: ChannelId, users: &[UserId]) {
        let Some(pid) = self.channels.remove(&channel_id) else {
            debug!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                channel_id = %channel_id,
                "Kill for a channel that is not running"
            );
            return;
        };

        self.stop_channel(&pid);
        let targets = self.system.sessions_of(users);
        self.system.notify(
            &targets,
            Event::ChannelRemoved {
                server_id: self.server_id.clone(),
                channel_id,
                pid,
            },
        );
    }

    async fn handle_start_channel(
        &mut self,
        ctx: &Context,
        channel_id: ChannelId,
        users: &[UserId],
        respond_to: Reply<Pid>,
    ) {
        let live = self
            .channels
            .get(&channel_id)
            .cloned()
            .or_else(|| ctx.engine().lookup(&Address::channel(&self.server_id, &channel_id)));

        let pid = match live {
            Some(pid) => pid,
            None => match self.spawn_channel(ctx, &channel_id).await {
                Ok(pid) => pid,
                Err(e) => {
                    error!(
                        target: "rt.actor.server",
                        server_id = %self.server_id,
                        channel_id = %channel_id,
                        error = %e,
                        "Failed to start channel actor"
                    );
                    let _ = respond_to.send(Err(e));
                    return;
                }
            },
        };
        self.channels.insert(channel_id, pid.clone());

        let targets = self.system.sessions_of(users);
        self.system
            .notify(&targets, Event::ChannelStarted { pid: pid.clone() });
        let _ = respond_to.send(Ok(pid));
    }

    async fn handle_remove_server(&mut self, ctx: &Context, user: UserId, respond_to: Reply<()>) {
        if let Err(e) = self
            .system
            .service
            .delete_server(&user, &self.server_id)
            .await
        {
            error!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                user_id = %user,
                error = %e,
                "Server deletion rejected"
            );
            let _ = respond_to.send(Err(e.into()));
            return;
        }

        for pid in std::mem::take(&mut self.channels).into_values() {
            self.stop_channel(&pid);
        }
        if let Err(e) = ctx.engine().poison(ctx.pid()) {
            warn!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                error = %e,
                "Server already deregistered"
            );
        }

        info!(
            target: "rt.actor.server",
            server_id = %self.server_id,
            "Server removed"
        );
        let _ = respond_to.send(Ok(()));
    }

    fn stop_channel(&self, pid: &Pid) {
        if let Err(e) = self.system.spaces.poison(pid) {
            debug!(
                target: "rt.actor.server",
                server_id = %self.server_id,
                pid = %pid,
                error = %e,
                "Channel already stopped"
            );
        }
    }

    fn handle_role(&self, event: RoleEvent) {
        self.fan_out(Envelope::RoleUpdate(RoleUpdate {
            server_id: self.server_id.clone(),
            event,
        }));
    }

    fn fan_out(&self, envelope: Envelope) {
        let members = self.member_sessions();
        self.system.notify(&members, Event::Envelope(envelope));
    }

    fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            server_id: self.server_id.clone(),
            users: self.user_order.clone(),
            sessions: self.member_sessions(),
            channels: self
                .channels
                .iter()
                .map(|(id, pid)| (id.clone(), pid.clone()))
                .collect(),
        }
    }
}

/// Session PID and user id of a connect/disconnect sender.
fn session_sender(sender: Option<Pid>) -> Option<(Pid, UserId)> {
    let session = sender?;
    let user_id = session.address().user_id()?;
    Some((session, user_id))
}

#[async_trait]
impl Actor for ServerActor {
    type Message = ServerMessage;

    async fn started(&mut self, ctx: &Context) -> Result<(), RealtimeError> {
        let rows = self
            .system
            .service
            .list_channels_of_server(&self.server_id)
            .await?;

        for row in rows {
            let pid = self.spawn_channel(ctx, &row.id).await?;
            self.channels.insert(row.id, pid);
        }

        debug!(
            target: "rt.actor.server",
            server_id = %self.server_id,
            channels = self.channels.len(),
            "Server started"
        );
        Ok(())
    }

    async fn handle(&mut self, ctx: &Context, message: ServerMessage, sender: Option<Pid>) {
        let started = Instant::now();
        let label = message.label();

        match message {
            ServerMessage::Connect { reason } => self.handle_connect(ctx, reason, sender),
            ServerMessage::Disconnect { reason } => self.handle_disconnect(ctx, reason, sender),
            ServerMessage::CreateChannel {
                creator,
                channel,
                respond_to,
            } => {
                self.handle_create_channel(ctx, creator, channel, respond_to)
                    .await;
            }
            ServerMessage::RemoveChannel {
                user,
                channel_id,
                respond_to,
            } => self.handle_remove_channel(user, channel_id, respond_to).await,
            ServerMessage::KillChannel { channel_id, users } => {
                self.handle_kill_channel(channel_id, &users);
            }
            ServerMessage::StartChannel {
                channel_id,
                users,
                respond_to,
            } => {
                self.handle_start_channel(ctx, channel_id, &users, respond_to)
                    .await;
            }
            ServerMessage::NewUserInServer { user } => {
                self.fan_out(Envelope::NewUserInServer(NewUserInServer {
                    server_id: self.server_id.clone(),
                    user,
                }));
            }
            ServerMessage::UserInformationChanged { user } => {
                self.fan_out(Envelope::UserInformationChanged(UserInformationChanged { user }));
            }
            ServerMessage::Role(event) => self.handle_role(event),
            ServerMessage::RemoveServer { user, respond_to } => {
                self.handle_remove_server(ctx, user, respond_to).await;
            }
            ServerMessage::Inspect { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }

        rt_metrics::record_message_latency(label, started.elapsed());
    }

    async fn stopped(&mut self, _ctx: &Context) {
        info!(
            target: "rt.actor.server",
            server_id = %self.server_id,
            members = self.user_order.len(),
            "Server stopped"
        );
    }
}
