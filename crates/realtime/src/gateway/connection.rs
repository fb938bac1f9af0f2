//! One WebSocket connection: session lifecycle, writer task, heartbeat.
//!
//! ```text
//! socket ──split──> stream ─> read loop (heartbeat deadline)
//!                   sink   <─ writer task <─ outbound queue <─ SessionActor
//! ```
//!
//! The session actor holds the only strong handle on the outbound queue.
//! When it stops (because this connection ended, or because a newer
//! connection for the same user replaced it) the queue closes, the writer
//! exits and the read loop follows.

use super::GatewayState;
use crate::actors::{OutboundFrame, SessionActor};
use crate::engine::{Address, DeliveryError, Pid, SpawnError};
use crate::errors::RealtimeError;
use crate::observability::metrics as rt_metrics;

use axum::extract::ws::{Message, WebSocket};
use common::UserId;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wire_protocol::{is_heartbeat, HEARTBEAT_TEXT};

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// No heartbeat within the deadline.
    HeartbeatTimeout,
    /// Close frame or end of stream.
    Closed,
    /// Reading from the socket failed.
    ReadError,
    /// The writer stopped: write failure, or the session was replaced.
    WriterStopped,
    /// The sessions engine is shutting down.
    Shutdown,
    /// No session could be started.
    SessionRejected,
}

impl ConnectionEnd {
    /// Bounded label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionEnd::HeartbeatTimeout => "heartbeat_timeout",
            ConnectionEnd::Closed => "closed",
            ConnectionEnd::ReadError => "read_error",
            ConnectionEnd::WriterStopped => "writer_stopped",
            ConnectionEnd::Shutdown => "shutdown",
            ConnectionEnd::SessionRejected => "session_rejected",
        }
    }
}

/// Serve an upgraded WebSocket until it ends.
pub async fn serve(socket: WebSocket, user_id: UserId, state: GatewayState) -> ConnectionEnd {
    let (sink, stream) = socket.split();
    run(sink, stream, user_id, state).await
}

/// Drive one connection over any message sink and stream.
pub async fn run<S, R, E>(mut sink: S, mut stream: R, user_id: UserId, state: GatewayState) -> ConnectionEnd
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (outbound, outbound_rx) = mpsc::channel(state.outbound_buffer);

    let session = match start_session(&user_id, &state, &outbound).await {
        Ok(pid) => pid,
        Err(e) => {
            error!(
                target: "rt.gateway",
                user_id = %user_id,
                error = %e,
                "Failed to start session"
            );
            let _ = sink.close().await;
            return ConnectionEnd::SessionRejected;
        }
    };
    let heartbeat = outbound.downgrade();
    drop(outbound);
    rt_metrics::set_sessions_active(state.system.sessions.len());

    info!(target: "rt.gateway", user_id = %user_id, session = %session, "Connection opened");

    let closed = CancellationToken::new();
    let writer = tokio::spawn(write_loop(sink, outbound_rx, closed.clone()));
    let shutdown = state.system.sessions.child_token();

    let deadline = sleep(state.heartbeat_deadline);
    tokio::pin!(deadline);

    let end = loop {
        tokio::select! {
            () = &mut deadline => {
                rt_metrics::record_heartbeat_timeout();
                break ConnectionEnd::HeartbeatTimeout;
            }
            () = closed.cancelled() => break ConnectionEnd::WriterStopped,
            () = shutdown.cancelled() => break ConnectionEnd::Shutdown,
            frame = stream.next() => match frame {
                None | Some(Ok(Message::Close(_))) => break ConnectionEnd::Closed,
                Some(Err(e)) => {
                    debug!(target: "rt.gateway", user_id = %user_id, error = %e, "Read failed");
                    break ConnectionEnd::ReadError;
                }
                Some(Ok(message)) => {
                    if let Some(reply) = heartbeat_of(&message) {
                        deadline.as_mut().reset(Instant::now() + state.heartbeat_deadline);
                        if reply {
                            if let Some(queue) = heartbeat.upgrade() {
                                let _ = queue.try_send(OutboundFrame::Heartbeat);
                            }
                        }
                    }
                }
            },
        }
    };

    stop_session(&user_id, &session, &state).await;
    closed.cancel();
    let _ = writer.await;
    rt_metrics::set_sessions_active(state.system.sessions.len());

    info!(
        target: "rt.gateway",
        user_id = %user_id,
        reason = end.as_str(),
        "Connection closed"
    );
    end
}

/// Whether `message` is a heartbeat, and if so whether it wants a reply.
///
/// Pongs keep the connection alive but are never answered.
fn heartbeat_of(message: &Message) -> Option<bool> {
    match message {
        Message::Text(text) if is_heartbeat(text.as_bytes()) => Some(true),
        Message::Binary(data) if is_heartbeat(data) => Some(true),
        Message::Ping(_) => Some(true),
        Message::Pong(_) => Some(false),
        _ => None,
    }
}

/// Spawn the user's session, replacing an older one if present.
async fn start_session(
    user_id: &UserId,
    state: &GatewayState,
    outbound: &mpsc::Sender<OutboundFrame>,
) -> Result<Pid, RealtimeError> {
    let address = Address::user(user_id);
    let spawn = || {
        state.system.sessions.spawn(
            SessionActor::new(user_id.clone(), state.system.clone(), outbound.clone()),
            address.clone(),
        )
    };

    match spawn().await {
        Ok(pid) => return Ok(pid),
        Err(SpawnError::AlreadyRegistered(_)) => {}
        Err(e) => return Err(e.into()),
    }

    // Newest connection wins: stop the previous session, then retry once.
    if let Some(previous) = state.system.sessions.lookup(&address) {
        debug!(
            target: "rt.gateway",
            user_id = %user_id,
            previous = %previous,
            "Replacing existing session"
        );
        if let Ok(receipt) = state.system.sessions.poison(&previous) {
            if !receipt.wait_timeout(state.stop_timeout).await {
                warn!(
                    target: "rt.gateway",
                    user_id = %user_id,
                    "Previous session did not stop in time"
                );
            }
        }
    }
    Ok(spawn().await?)
}

async fn stop_session(user_id: &UserId, session: &Pid, state: &GatewayState) {
    match state.system.sessions.poison(session) {
        Ok(receipt) => {
            if !receipt.wait_timeout(state.stop_timeout).await {
                warn!(
                    target: "rt.gateway",
                    user_id = %user_id,
                    "Session did not stop in time"
                );
            }
        }
        // Already replaced by a newer connection, or already stopped.
        Err(DeliveryError::Stale(_) | DeliveryError::NotFound(_)) => {}
        Err(e) => {
            warn!(
                target: "rt.gateway",
                user_id = %user_id,
                error = %e,
                "Failed to stop session"
            );
        }
    }
}

async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<OutboundFrame>, closed: CancellationToken)
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display + Send,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        let message = match frame {
            OutboundFrame::Binary(bytes) => Message::Binary(bytes.to_vec()),
            OutboundFrame::Heartbeat => Message::Text(HEARTBEAT_TEXT.to_string()),
        };
        if let Err(e) = sink.send(message).await {
            debug!(target: "rt.gateway", error = %e, "Write failed");
            break;
        }
    }
    closed.cancel();
    let _ = sink.close().await;
}
