//! Actor engine: registry, lifecycle and message delivery.
//!
//! Every actor owns exactly one unbounded FIFO mailbox drained by exactly
//! one task, so an actor's state is never touched concurrently and needs no
//! locks. Actors find each other through the [`Registry`](registry) by
//! structured [`Address`]; the resulting [`Pid`] names one incarnation.
//!
//! ```text
//! Engine (one per actor family: "spaces", "sessions")
//! ├── Registry: DashMap<Address, entry>
//! └── N actor tasks
//!     └── loop: cancelled? -> kill path
//!               mailbox    -> Message -> Actor::handle
//!                          -> Poison  -> Actor::stopped, receipt completes
//! ```
//!
//! # Stop paths
//!
//! - [`Engine::poison`]: graceful. Deregisters at once, so later sends fail
//!   with [`DeliveryError`]; messages already queued are still processed,
//!   then `stopped` runs and the [`StopReceipt`] completes.
//! - [`Engine::kill`]: forceful. Deregisters, cancels the in-flight handler
//!   and runs `stopped` best-effort under the stop timeout.

pub mod address;
pub mod mailbox;
mod registry;

pub use address::{ActorKind, Address, Pid};
pub use mailbox::{ActorMetrics, MailboxLevel, MailboxMonitor, MailboxThresholds};

use crate::errors::RealtimeError;
use crate::observability::metrics as rt_metrics;
use registry::{Registry, RegistryEntry};

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Default bound on a best-effort stop hook.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// An actor hosted by an [`Engine`].
#[async_trait]
pub trait Actor: Send + 'static {
    /// Closed set of messages this actor accepts.
    type Message: Send + 'static;

    /// Runs once after registration, before the first message.
    ///
    /// An error fails the spawn and deregisters the actor.
    async fn started(&mut self, _ctx: &Context) -> Result<(), RealtimeError> {
        Ok(())
    }

    /// Handle one message. `sender` is the PID the message is attributed to.
    async fn handle(&mut self, ctx: &Context, message: Self::Message, sender: Option<Pid>);

    /// Runs once when the actor stops.
    async fn stopped(&mut self, _ctx: &Context) {}
}

/// Actor-side view of itself and its engine.
#[derive(Clone, Debug)]
pub struct Context {
    pid: Pid,
    engine: Engine,
}

impl Context {
    /// This actor's PID.
    #[must_use]
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Engine hosting this actor.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// Failure to spawn an actor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpawnError {
    /// Another live actor holds the address.
    #[error("Address already registered: {0}")]
    AlreadyRegistered(String),

    /// The actor's start hook failed.
    #[error("Actor {address} failed to start: {reason}")]
    StartFailed { address: String, reason: String },

    /// The engine has been shut down.
    #[error("Engine {0} is shut down")]
    EngineStopped(String),
}

/// Failure to deliver a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Nothing lives at the PID's address.
    #[error("No actor at {0}")]
    NotFound(String),

    /// A newer incarnation replaced the PID.
    #[error("Stale PID {0}")]
    Stale(String),

    /// The actor does not accept this message type.
    #[error("Actor {0} does not accept this message type")]
    MessageType(String),

    /// The actor's mailbox is closed.
    #[error("Mailbox closed for {0}")]
    Closed(String),
}

impl DeliveryError {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            DeliveryError::NotFound(_) => "not_found",
            DeliveryError::Stale(_) => "stale",
            DeliveryError::MessageType(_) => "message_type",
            DeliveryError::Closed(_) => "closed",
        }
    }
}

/// Completes once a poisoned actor has run its stop hook.
#[derive(Debug)]
pub struct StopReceipt {
    pid: Pid,
    done: oneshot::Receiver<()>,
}

impl StopReceipt {
    /// PID being stopped.
    #[must_use]
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Wait until the actor has stopped.
    pub async fn wait(self) {
        // A dropped sender means the actor was killed or panicked: stopped either way.
        let _ = self.done.await;
    }

    /// Wait with a bound. Returns false on timeout.
    pub async fn wait_timeout(self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.done).await.is_ok()
    }
}

pub(crate) enum Mail<M> {
    Message { message: M, sender: Option<Pid> },
    Poison { done: oneshot::Sender<()> },
}

type PoisonFn = dyn Fn(oneshot::Sender<()>) -> bool + Send + Sync;

/// Handle to an actor engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    name: &'static str,
    registry: Registry,
    next_incarnation: AtomicU64,
    cancel_token: CancellationToken,
    tracker: TaskTracker,
    metrics: Arc<ActorMetrics>,
    stop_timeout: Duration,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.inner.name)
            .field("actors", &self.inner.registry.len())
            .finish()
    }
}

impl Engine {
    /// Create an engine with the default stop timeout.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self::with_stop_timeout(name, DEFAULT_STOP_TIMEOUT)
    }

    /// Create an engine with a custom bound on best-effort stop hooks.
    #[must_use]
    pub fn with_stop_timeout(name: &'static str, stop_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                name,
                registry: Registry::new(),
                next_incarnation: AtomicU64::new(0),
                cancel_token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                metrics: ActorMetrics::new(),
                stop_timeout,
            }),
        }
    }

    /// Engine name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Shared actor metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.inner.metrics
    }

    /// Number of registered actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether no actor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Token cancelled when the engine shuts down.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.inner.cancel_token.child_token()
    }

    /// Current PID at an address.
    #[must_use]
    pub fn lookup(&self, address: &Address) -> Option<Pid> {
        self.inner.registry.lookup(address)
    }

    /// Every live PID.
    #[must_use]
    pub fn pids(&self) -> Vec<Pid> {
        self.inner.registry.pids()
    }

    /// Spawn an actor at `address` and wait for its start hook.
    ///
    /// # Errors
    ///
    /// - [`SpawnError::AlreadyRegistered`] if a live actor holds the address
    /// - [`SpawnError::StartFailed`] if the start hook fails
    /// - [`SpawnError::EngineStopped`] after [`Engine::shutdown`]
    pub async fn spawn<A: Actor>(&self, actor: A, address: Address) -> Result<Pid, SpawnError> {
        if self.inner.cancel_token.is_cancelled() {
            return Err(SpawnError::EngineStopped(self.inner.name.to_string()));
        }

        let incarnation = self.inner.next_incarnation.fetch_add(1, Ordering::Relaxed) + 1;
        let pid = Pid::new(address, incarnation);
        let kind = pid.kind();

        let (sender, receiver) = mpsc::unbounded_channel::<Mail<A::Message>>();
        let poison_sender = sender.clone();
        let poison: Arc<PoisonFn> =
            Arc::new(move |done| poison_sender.send(Mail::Poison { done }).is_ok());
        let cancel_token = self.inner.cancel_token.child_token();
        let monitor = Arc::new(MailboxMonitor::new(kind, pid.to_string()));

        let entry = RegistryEntry {
            pid: pid.clone(),
            mailbox: Arc::new(sender),
            poison,
            monitor: Arc::clone(&monitor),
            cancel_token: cancel_token.clone(),
        };
        if self.inner.registry.register(entry).is_err() {
            debug!(
                target: "rt.engine",
                engine = self.inner.name,
                address = %pid.address(),
                "Spawn rejected, address already registered"
            );
            return Err(SpawnError::AlreadyRegistered(pid.address().to_string()));
        }
        self.inner.metrics.actor_started(kind);

        let (ready_tx, ready_rx) = oneshot::channel();
        let cell = ActorCell {
            actor,
            ctx: Context {
                pid: pid.clone(),
                engine: self.clone(),
            },
            receiver,
            cancel_token,
            monitor,
        };
        let task = tokio::spawn(cell.run(ready_tx));

        // Supervisor: detects panics and releases the address.
        let engine = self.clone();
        let supervised = pid.clone();
        self.inner.tracker.spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    engine.inner.metrics.record_panic(kind);
                    warn!(
                        target: "rt.engine",
                        engine = engine.inner.name,
                        pid = %supervised,
                        "Actor task panicked, deregistering"
                    );
                }
                engine.inner.registry.remove(&supervised);
            }
            engine.inner.metrics.actor_stopped(kind);
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(pid),
            Ok(Err(reason)) => Err(SpawnError::StartFailed {
                address: pid.address().to_string(),
                reason,
            }),
            Err(_) => Err(SpawnError::StartFailed {
                address: pid.address().to_string(),
                reason: "actor task ended during start".to_string(),
            }),
        }
    }

    /// Deliver a message with no sender attribution.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the PID is not live or does not accept `M`.
    pub fn send<M: Send + 'static>(&self, pid: &Pid, message: M) -> Result<(), DeliveryError> {
        self.deliver(pid, message, None)
    }

    /// Deliver a message attributed to `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the PID is not live or does not accept `M`.
    pub fn send_with_sender<M: Send + 'static>(
        &self,
        pid: &Pid,
        message: M,
        sender: Pid,
    ) -> Result<(), DeliveryError> {
        self.deliver(pid, message, Some(sender))
    }

    fn deliver<M: Send + 'static>(
        &self,
        pid: &Pid,
        message: M,
        sender: Option<Pid>,
    ) -> Result<(), DeliveryError> {
        let result = self.try_deliver(pid, message, sender);
        if let Err(e) = &result {
            rt_metrics::record_delivery_failure(e.label());
        }
        result
    }

    fn try_deliver<M: Send + 'static>(
        &self,
        pid: &Pid,
        message: M,
        sender: Option<Pid>,
    ) -> Result<(), DeliveryError> {
        let entry = self
            .inner
            .registry
            .resolve(pid)
            .map_err(|current| Self::missing(pid, current.is_some()))?;

        let mailbox = (*entry.mailbox)
            .downcast_ref::<mpsc::UnboundedSender<Mail<M>>>()
            .ok_or_else(|| DeliveryError::MessageType(pid.to_string()))?;

        entry.monitor.record_enqueue();
        if mailbox.send(Mail::Message { message, sender }).is_err() {
            entry.monitor.cancel_enqueue();
            return Err(DeliveryError::Closed(pid.to_string()));
        }
        Ok(())
    }

    /// Gracefully stop an actor.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the PID is not live.
    pub fn poison(&self, pid: &Pid) -> Result<StopReceipt, DeliveryError> {
        let entry = self
            .inner
            .registry
            .remove(pid)
            .ok_or_else(|| self.missing_now(pid))?;

        let (done_tx, done_rx) = oneshot::channel();
        entry.monitor.record_enqueue();
        if !(entry.poison)(done_tx) {
            entry.monitor.cancel_enqueue();
            return Err(DeliveryError::Closed(pid.to_string()));
        }

        debug!(
            target: "rt.engine",
            engine = self.inner.name,
            pid = %pid,
            queued = entry.monitor.current_depth(),
            "Actor poisoned"
        );

        Ok(StopReceipt {
            pid: pid.clone(),
            done: done_rx,
        })
    }

    /// Forcefully stop an actor.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the PID is not live.
    pub fn kill(&self, pid: &Pid) -> Result<(), DeliveryError> {
        let entry = self
            .inner
            .registry
            .remove(pid)
            .ok_or_else(|| self.missing_now(pid))?;
        entry.cancel_token.cancel();

        debug!(
            target: "rt.engine",
            engine = self.inner.name,
            pid = %pid,
            "Actor killed"
        );
        Ok(())
    }

    /// Kill every actor and wait for their tasks to finish.
    ///
    /// Returns false if tasks were still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(
            target: "rt.engine",
            engine = self.inner.name,
            actors = self.len(),
            "Engine shutting down"
        );
        self.inner.cancel_token.cancel();
        self.inner.tracker.close();
        let drained = tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                target: "rt.engine",
                engine = self.inner.name,
                remaining = self.len(),
                "Engine shutdown timed out"
            );
        }
        drained
    }

    fn missing_now(&self, pid: &Pid) -> DeliveryError {
        Self::missing(pid, self.inner.registry.lookup(pid.address()).is_some())
    }

    fn missing(pid: &Pid, replaced: bool) -> DeliveryError {
        if replaced {
            DeliveryError::Stale(pid.to_string())
        } else {
            DeliveryError::NotFound(pid.to_string())
        }
    }
}

enum Exit {
    Poisoned(oneshot::Sender<()>),
    Killed,
    Closed,
}

struct ActorCell<A: Actor> {
    actor: A,
    ctx: Context,
    receiver: mpsc::UnboundedReceiver<Mail<A::Message>>,
    cancel_token: CancellationToken,
    monitor: Arc<MailboxMonitor>,
}

impl<A: Actor> ActorCell<A> {
    #[instrument(
        skip_all,
        name = "rt.actor",
        fields(engine = self.ctx.engine.inner.name, pid = %self.ctx.pid)
    )]
    async fn run(self, ready: oneshot::Sender<Result<(), String>>) {
        let ActorCell {
            mut actor,
            ctx,
            mut receiver,
            cancel_token,
            monitor,
        } = self;
        let engine = Arc::clone(&ctx.engine.inner);

        let started = tokio::select! {
            () = cancel_token.cancelled() => Err("cancelled during start".to_string()),
            result = actor.started(&ctx) => result.map_err(|e| e.to_string()),
        };
        if let Err(reason) = started {
            warn!(
                target: "rt.engine",
                pid = %ctx.pid,
                reason = %reason,
                "Actor failed to start"
            );
            engine.registry.remove(&ctx.pid);
            let _ = ready.send(Err(reason));
            return;
        }
        let _ = ready.send(Ok(()));

        debug!(target: "rt.engine", pid = %ctx.pid, "Actor started");

        let exit = loop {
            tokio::select! {
                biased;

                () = cancel_token.cancelled() => break Exit::Killed,

                mail = receiver.recv() => match mail {
                    Some(Mail::Message { message, sender }) => {
                        monitor.record_dequeue();
                        let killed = tokio::select! {
                            biased;
                            () = cancel_token.cancelled() => true,
                            () = actor.handle(&ctx, message, sender) => false,
                        };
                        engine.metrics.record_message_processed();
                        if killed {
                            break Exit::Killed;
                        }
                    }
                    Some(Mail::Poison { done }) => {
                        monitor.record_dequeue();
                        break Exit::Poisoned(done);
                    }
                    None => break Exit::Closed,
                },
            }
        };

        engine.registry.remove(&ctx.pid);
        match exit {
            Exit::Poisoned(done) => {
                actor.stopped(&ctx).await;
                let _ = done.send(());
            }
            Exit::Killed | Exit::Closed => {
                if tokio::time::timeout(engine.stop_timeout, actor.stopped(&ctx))
                    .await
                    .is_err()
                {
                    warn!(
                        target: "rt.engine",
                        pid = %ctx.pid,
                        timeout_ms = engine.stop_timeout.as_millis(),
                        "Stop hook timed out"
                    );
                }
            }
        }

        info!(
            target: "rt.engine",
            pid = %ctx.pid,
            messages_processed = monitor.messages_processed(),
            "Actor stopped"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use common::{ServerId, UserId};
    use std::sync::Mutex;

    /// Records every message and whether the stop hook ran.
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
        handle_delay: Duration,
    }

    enum RecorderMessage {
        Note(String),
        Panic,
        Poll(oneshot::Sender<usize>),
    }

    impl Recorder {
        fn new(log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                log: Arc::clone(log),
                fail_start: false,
                handle_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Actor for Recorder {
        type Message = RecorderMessage;

        async fn started(&mut self, _ctx: &Context) -> Result<(), RealtimeError> {
            if self.fail_start {
                return Err(RealtimeError::Internal("no rows".to_string()));
            }
            self.log.lock().unwrap().push("started".to_string());
            Ok(())
        }

        async fn handle(&mut self, _ctx: &Context, message: RecorderMessage, sender: Option<Pid>) {
            match message {
                RecorderMessage::Note(note) => {
                    if !self.handle_delay.is_zero() {
                        tokio::time::sleep(self.handle_delay).await;
                    }
                    let from = sender.map_or_else(|| "-".to_string(), |pid| pid.to_string());
                    self.log.lock().unwrap().push(format!("{note} from {from}"));
                }
                RecorderMessage::Panic => panic!("boom"),
                RecorderMessage::Poll(reply) => {
                    let _ = reply.send(self.log.lock().unwrap().len());
                }
            }
        }

        async fn stopped(&mut self, _ctx: &Context) {
            self.log.lock().unwrap().push("stopped".to_string());
        }
    }

    fn server_address(id: &str) -> Address {
        Address::server(&ServerId::from(id))
    }

    #[tokio::test]
    async fn test_spawn_registers_and_processes_in_order() {
        let engine = Engine::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        let pid = engine
            .spawn(Recorder::new(&log), server_address("s1"))
            .await
            .unwrap();

        assert_eq!(engine.lookup(&server_address("s1")), Some(pid.clone()));

        for i in 0..5 {
            engine
                .send(&pid, RecorderMessage::Note(format!("m{i}")))
                .unwrap();
        }
        let receipt = engine.poison(&pid).unwrap();
        receipt.wait().await;

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["started", "m0 from -", "m1 from -", "m2 from -", "m3 from -", "m4 from -", "stopped"]
        );
    }

    #[tokio::test]
    async fn test_send_with_sender_attributes_sender() {
        let engine = Engine::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        let pid = engine
            .spawn(Recorder::new(&log), server_address("s1"))
            .await
            .unwrap();
        let other = engine
            .spawn(Recorder::new(&Arc::default()), Address::user(&UserId::from("u1")))
            .await
            .unwrap();

        engine
            .send_with_sender(&pid, RecorderMessage::Note("hello".to_string()), other.clone())
            .unwrap();
        engine.poison(&pid).unwrap().wait().await;

        assert!(log
            .lock()
            .unwrap()
            .contains(&format!("hello from {other}")));
    }

    #[tokio::test]
    async fn test_duplicate_address_is_rejected() {
        let engine = Engine::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        engine
            .spawn(Recorder::new(&log), server_address("s1"))
            .await
            .unwrap();

        let result = engine.spawn(Recorder::new(&log), server_address("s1")).await;
        assert_eq!(
            result,
            Err(SpawnError::AlreadyRegistered("server/s1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failed_start_deregisters() {
        let engine = Engine::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut actor = Recorder::new(&log);
        actor.fail_start = true;

        let result = engine.spawn(actor, server_address("s1")).await;
        assert!(matches!(result, Err(SpawnError::StartFailed { .. })));
        assert_eq!(engine.lookup(&server_address("s1")), None);

        // Address is free again
        assert!(engine
            .spawn(Recorder::new(&log), server_address("s1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_send_after_poison_is_delivery_failure() {
        let engine = Engine::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        let pid = engine
            .spawn(Recorder::new(&log), server_address("s1"))
            .await
            .unwrap();

        let receipt = engine.poison(&pid).unwrap();
        let result = engine.send(&pid, RecorderMessage::Note("late".to_string()));
        assert!(matches!(result, Err(DeliveryError::NotFound(_))));

        receipt.wait().await;
        assert!(!log.lock().unwrap().iter().any(|entry| entry.starts_with("late")));

        // Poisoning twice is a delivery failure, not a crash
        assert!(engine.poison(&pid).is_err());
    }

    #[tokio::test]
    async fn test_stale_pid_never_reaches_new_incarnation() {
        let engine = Engine::new("test");
        let first_log = Arc::new(Mutex::new(Vec::new()));
        let second_log = Arc::new(Mutex::new(Vec::new()));

        let first = engine
            .spawn(Recorder::new(&first_log), server_address("s1"))
            .await
            .unwrap();
        engine.poison(&first).unwrap().wait().await;

        let second = engine
            .spawn(Recorder::new(&second_log), server_address("s1"))
            .await
            .unwrap();
        assert_ne!(first, second);

        let result = engine.send(&first, RecorderMessage::Note("old".to_string()));
        assert!(matches!(result, Err(DeliveryError::Stale(_))));
        assert!(engine.poison(&first).is_err());
        assert_eq!(engine.lookup(&server_address("s1")), Some(second));
    }

    #[tokio::test]
    async fn test_wrong_message_type_is_rejected() {
        let engine = Engine::new("test");
        let pid = engine
            .spawn(Recorder::new(&Arc::default()), server_address("s1"))
            .await
            .unwrap();

        let result = engine.send(&pid, 42u32);
        assert!(matches!(result, Err(DeliveryError::MessageType(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_interrupts_handler_and_runs_stop_hook() {
        let engine = Engine::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut actor = Recorder::new(&log);
        actor.handle_delay = Duration::from_secs(60);
        let pid = engine.spawn(actor, server_address("s1")).await.unwrap();

        engine
            .send(&pid, RecorderMessage::Note("slow".to_string()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        engine.kill(&pid).unwrap();
        assert_eq!(engine.lookup(&server_address("s1")), None);

        assert!(engine.shutdown(Duration::from_secs(1)).await);
        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["started", "stopped"]);
    }

    #[tokio::test]
    async fn test_panicking_actor_is_deregistered() {
        let engine = Engine::new("test");
        let pid = engine
            .spawn(Recorder::new(&Arc::default()), server_address("s1"))
            .await
            .unwrap();

        engine.send(&pid, RecorderMessage::Panic).unwrap();

        for _ in 0..100 {
            if engine.lookup(&server_address("s1")).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.lookup(&server_address("s1")), None);
        assert_eq!(engine.metrics().panics(), 1);
    }

    #[tokio::test]
    async fn test_messages_are_processed_one_at_a_time() {
        let engine = Engine::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut actor = Recorder::new(&log);
        actor.handle_delay = Duration::from_millis(1);
        let pid = engine.spawn(actor, server_address("s1")).await.unwrap();

        let senders: Vec<_> = (0..4)
            .map(|t| {
                let engine = engine.clone();
                let pid = pid.clone();
                tokio::spawn(async move {
                    for i in 0..10 {
                        engine
                            .send(&pid, RecorderMessage::Note(format!("t{t}-{i}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap();
        }

        let (tx, rx) = oneshot::channel();
        engine.send(&pid, RecorderMessage::Poll(tx)).unwrap();
        // started + 40 notes
        assert_eq!(rx.await.unwrap(), 41);

        // Per-sender FIFO holds for every sender task
        let log = log.lock().unwrap().clone();
        for t in 0..4 {
            let order: Vec<usize> = log
                .iter()
                .filter_map(|entry| entry.strip_prefix(&format!("t{t}-")))
                .filter_map(|rest| rest.split(' ').next()?.parse().ok())
                .collect();
            assert_eq!(order, (0..10).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_spawn_after_shutdown_fails() {
        let engine = Engine::new("test");
        assert!(engine.shutdown(Duration::from_secs(1)).await);

        let result = engine
            .spawn(Recorder::new(&Arc::default()), server_address("s1"))
            .await;
        assert!(matches!(result, Err(SpawnError::EngineStopped(_))));
    }
}
