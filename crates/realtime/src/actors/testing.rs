//! Session stand-in for space actor unit tests.

use super::messages::{Event, SessionMessage, SessionSnapshot};
use super::ActorSystem;
use crate::engine::{Actor, Address, Context, Pid};

use async_trait::async_trait;
use common::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wire_protocol::Envelope;

/// Forwards every event it receives to the test.
pub(crate) struct RecordingSession {
    user_id: UserId,
    events: mpsc::UnboundedSender<Arc<Event>>,
}

#[async_trait]
impl Actor for RecordingSession {
    type Message = SessionMessage;

    async fn handle(&mut self, _ctx: &Context, message: SessionMessage, _sender: Option<Pid>) {
        match message {
            SessionMessage::Event(event) => {
                let _ = self.events.send(event);
            }
            SessionMessage::Inspect { respond_to } => {
                let _ = respond_to.send(SessionSnapshot {
                    user_id: self.user_id.clone(),
                    servers: Vec::new(),
                    channels: Vec::new(),
                    dropped: 0,
                });
            }
        }
    }
}

pub(crate) struct Listener {
    pub pid: Pid,
    events: mpsc::UnboundedReceiver<Arc<Event>>,
}

impl Listener {
    pub async fn spawn(system: &ActorSystem, user: &str) -> Self {
        let user_id = UserId::from(user);
        let (tx, events) = mpsc::unbounded_channel();
        let pid = system
            .sessions
            .spawn(
                RecordingSession {
                    user_id: user_id.clone(),
                    events: tx,
                },
                Address::user(&user_id),
            )
            .await
            .unwrap_or_else(|e| unreachable!("listener spawn: {e}"));
        Self { pid, events }
    }

    pub async fn next(&mut self) -> Arc<Event> {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| unreachable!("no event for {}", self.pid))
    }

    pub async fn envelope(&mut self) -> Envelope {
        let event = self.next().await;
        match &*event {
            Event::Envelope(envelope) => envelope.clone(),
            other => unreachable!("expected envelope, got {other:?}"),
        }
    }

    /// Events that arrive within a short quiet period.
    pub async fn drain(&mut self) -> Vec<Arc<Event>> {
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), self.events.recv()).await
        {
            events.push(event);
        }
        events
    }
}
