//! In-process cluster for driving actors without a transport.
//!
//! [`TestCluster`] wires an [`ActorSystem`] to a [`MockDomainService`] over a
//! seeded [`InMemoryStore`]. [`TestSession`] spawns a real `SessionActor`
//! and decodes whatever it would have written to the socket.
//!
//! # Example
//!
//! ```rust,ignore
//! let alice = TestUser::new("alice");
//! let cluster = TestCluster::start(&[TestServer::new("s1", &alice)]).await?;
//! let mut session = cluster.connect(&alice).await?;
//! let first = session.recv().await?;
//! ```

use crate::fixtures::TestServer;
use crate::TestUser;

use common::{ChannelId, ServerId, UserId};
use realtime::actors::{
    ActorSystem, ChannelMessage, ChannelSnapshot, OutboundFrame, ServerMessage, ServerSnapshot,
    SessionActor, SessionMessage, SessionSnapshot,
};
use realtime::api::RealtimeApi;
use realtime::engine::{Address, Pid};
use realtime::services::memory::InMemoryStore;
use realtime::services::mock::MockDomainService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use wire_protocol::{decode_envelope, Envelope};

/// How long [`TestSession::recv`] waits for a frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long [`TestSession::assert_quiet`] listens for unexpected frames.
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Actor system over a mock service, with every server bootstrapped.
pub struct TestCluster {
    pub store: Arc<InMemoryStore>,
    pub service: Arc<MockDomainService>,
    pub system: ActorSystem,
    pub api: RealtimeApi,
}

impl TestCluster {
    /// Install `servers` and bootstrap their actors (plus `global`).
    pub async fn start(servers: &[TestServer]) -> anyhow::Result<Self> {
        let store = Arc::new(InMemoryStore::new());
        for server in servers {
            server.install(&store).await?;
        }
        Self::start_with_store(store).await
    }

    /// Bootstrap over an already seeded store.
    pub async fn start_with_store(store: Arc<InMemoryStore>) -> anyhow::Result<Self> {
        let service = Arc::new(MockDomainService::new(Arc::clone(&store)));
        let system = ActorSystem::new(service.clone(), Duration::from_secs(1));
        system.bootstrap_spaces().await?;
        let api = RealtimeApi::new(system.clone());
        Ok(Self {
            store,
            service,
            system,
            api,
        })
    }

    /// Open a session for `user` with a roomy outbound queue.
    pub async fn connect(&self, user: &TestUser) -> anyhow::Result<TestSession> {
        self.connect_with_buffer(user, 256).await
    }

    /// Open a session whose outbound queue holds `capacity` frames.
    pub async fn connect_with_buffer(
        &self,
        user: &TestUser,
        capacity: usize,
    ) -> anyhow::Result<TestSession> {
        let (outbound, frames) = mpsc::channel(capacity);
        let pid = self
            .system
            .sessions
            .spawn(
                SessionActor::new(user.id.clone(), self.system.clone(), outbound),
                Address::user(&user.id),
            )
            .await?;
        Ok(TestSession {
            user_id: user.id.clone(),
            pid,
            system: self.system.clone(),
            frames,
        })
    }

    /// Connect every user, then discard the presence traffic the
    /// connections caused so each session starts quiet.
    pub async fn online<const N: usize>(
        &self,
        users: [&TestUser; N],
    ) -> anyhow::Result<[TestSession; N]> {
        let mut sessions = Vec::with_capacity(N);
        for user in users {
            sessions.push(self.connect(user).await?);
        }
        for session in &mut sessions {
            session.drain().await?;
        }
        sessions
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected {N} sessions"))
    }

    pub fn server_pid(&self, server_id: &str) -> anyhow::Result<Pid> {
        self.system
            .server_pid(&ServerId::from(server_id))
            .ok_or_else(|| anyhow::anyhow!("server {server_id} is not running"))
    }

    pub fn channel_pid(&self, server_id: &str, channel_id: &str) -> anyhow::Result<Pid> {
        self.system
            .spaces
            .lookup(&Address::channel(
                &ServerId::from(server_id),
                &ChannelId::from(channel_id),
            ))
            .ok_or_else(|| anyhow::anyhow!("channel {server_id}/{channel_id} is not running"))
    }

    /// Membership view of a server, taken after all queued messages.
    pub async fn inspect_server(&self, server_id: &str) -> anyhow::Result<ServerSnapshot> {
        let pid = self.server_pid(server_id)?;
        let (respond_to, snapshot) = oneshot::channel();
        self.system
            .spaces
            .send(&pid, ServerMessage::Inspect { respond_to })?;
        Ok(tokio::time::timeout(RECV_TIMEOUT, snapshot).await??)
    }

    /// Membership view of a channel, taken after all queued messages.
    pub async fn inspect_channel(
        &self,
        server_id: &str,
        channel_id: &str,
    ) -> anyhow::Result<ChannelSnapshot> {
        let pid = self.channel_pid(server_id, channel_id)?;
        let (respond_to, snapshot) = oneshot::channel();
        self.system
            .spaces
            .send(&pid, ChannelMessage::Inspect { respond_to })?;
        Ok(tokio::time::timeout(RECV_TIMEOUT, snapshot).await??)
    }

    /// Stop every actor.
    pub async fn shutdown(&self) {
        self.system.sessions.shutdown(Duration::from_secs(2)).await;
        self.system.spaces.shutdown(Duration::from_secs(2)).await;
    }
}

/// A live session whose transport is an in-memory queue.
pub struct TestSession {
    pub user_id: UserId,
    pub pid: Pid,
    system: ActorSystem,
    frames: mpsc::Receiver<OutboundFrame>,
}

impl TestSession {
    /// Next decoded envelope, skipping heartbeats.
    pub async fn recv(&mut self) -> anyhow::Result<Envelope> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.frames.recv())
                .await
                .map_err(|_| anyhow::anyhow!("{}: no frame within {RECV_TIMEOUT:?}", self.user_id))?
                .ok_or_else(|| anyhow::anyhow!("{}: outbound queue closed", self.user_id))?;
            if let OutboundFrame::Binary(bytes) = frame {
                let mut bytes = bytes;
                return Ok(decode_envelope(&mut bytes)?);
            }
        }
    }

    /// Skip envelopes until one satisfies `predicate`.
    pub async fn recv_until(
        &mut self,
        mut predicate: impl FnMut(&Envelope) -> bool,
    ) -> anyhow::Result<Envelope> {
        loop {
            let envelope = self.recv().await?;
            if predicate(&envelope) {
                return Ok(envelope);
            }
        }
    }

    /// Every envelope that arrives within [`QUIET_PERIOD`]. A frame that
    /// does not decode is an error.
    pub async fn drain(&mut self) -> anyhow::Result<Vec<Envelope>> {
        let mut envelopes = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout(QUIET_PERIOD, self.frames.recv()).await {
            if let OutboundFrame::Binary(mut bytes) = frame {
                let envelope = decode_envelope(&mut bytes).map_err(|e| {
                    anyhow::anyhow!("{}: undecodable frame: {e}", self.user_id)
                })?;
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    /// Fail if any envelope arrives within [`QUIET_PERIOD`].
    pub async fn assert_quiet(&mut self) {
        let unexpected = match self.drain().await {
            Ok(envelopes) => envelopes,
            Err(e) => panic!("{e}"),
        };
        assert!(
            unexpected.is_empty(),
            "{}: expected no frames, got {unexpected:?}",
            self.user_id
        );
    }

    /// Subscription view, taken after all queued events.
    pub async fn inspect(&self) -> anyhow::Result<SessionSnapshot> {
        let (respond_to, snapshot) = oneshot::channel();
        self.system
            .sessions
            .send(&self.pid, SessionMessage::Inspect { respond_to })?;
        Ok(tokio::time::timeout(RECV_TIMEOUT, snapshot).await??)
    }

    /// Poison the session and wait for its stop hook.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let receipt = self.system.sessions.poison(&self.pid)?;
        anyhow::ensure!(
            receipt.wait_timeout(RECV_TIMEOUT).await,
            "{}: session did not stop",
            self.user_id
        );
        Ok(())
    }

    /// Whether the transport side has been released.
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}
