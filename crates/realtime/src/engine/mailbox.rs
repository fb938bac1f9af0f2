//! Mailbox depth tracking and per-engine actor counts.
//!
//! Mailboxes are unbounded, so depth is the only backpressure signal. Each
//! actor kind has two thresholds:
//!
//! | Actor Kind | Elevated above | Critical above |
//! |------------|----------------|----------------|
//! | Server     | 100            | 500            |
//! | Channel    | 100            | 500            |
//! | User       | 50             | 200            |
//!
//! Crossing a threshold upward is logged once per crossing, not once per
//! message.

use super::address::ActorKind;
use crate::observability::metrics as rt_metrics;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Depths at which a mailbox is considered elevated and critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxThresholds {
    pub elevated: usize,
    pub critical: usize,
}

const SPACE_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    elevated: 100,
    critical: 500,
};

const SESSION_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    elevated: 50,
    critical: 200,
};

impl ActorKind {
    /// Mailbox thresholds for this kind.
    #[must_use]
    pub const fn mailbox_thresholds(&self) -> MailboxThresholds {
        match self {
            ActorKind::Server | ActorKind::Channel => SPACE_THRESHOLDS,
            ActorKind::User => SESSION_THRESHOLDS,
        }
    }
}

/// Mailbox band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxLevel {
    Normal,
    Elevated,
    Critical,
}

impl MailboxThresholds {
    #[must_use]
    pub const fn level(&self, depth: usize) -> MailboxLevel {
        if depth > self.critical {
            MailboxLevel::Critical
        } else if depth > self.elevated {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Queue depth of one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    kind: ActorKind,
    pid: String,
    thresholds: MailboxThresholds,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(kind: ActorKind, pid: impl Into<String>) -> Self {
        Self {
            kind,
            pid: pid.into(),
            thresholds: kind.mailbox_thresholds(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// A message was queued.
    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);

        if depth == self.thresholds.critical + 1 {
            warn!(
                target: "rt.actor.mailbox",
                actor_type = self.kind.as_str(),
                pid = %self.pid,
                depth,
                "Mailbox depth critical"
            );
        } else if depth == self.thresholds.elevated + 1 {
            debug!(
                target: "rt.actor.mailbox",
                actor_type = self.kind.as_str(),
                pid = %self.pid,
                depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Undo an enqueue whose send failed.
    pub fn cancel_enqueue(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    /// A message was taken off the queue.
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        rt_metrics::set_actor_mailbox_depth(self.kind.as_str(), previous.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level(&self) -> MailboxLevel {
        self.thresholds.level(self.current_depth())
    }
}

/// Live actor counts and totals for one engine.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    servers: AtomicUsize,
    channels: AtomicUsize,
    sessions: AtomicUsize,
    panics: AtomicU64,
    messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn live(&self, kind: ActorKind) -> &AtomicUsize {
        match kind {
            ActorKind::Server => &self.servers,
            ActorKind::Channel => &self.channels,
            ActorKind::User => &self.sessions,
        }
    }

    pub fn actor_started(&self, kind: ActorKind) {
        let count = self.live(kind).fetch_add(1, Ordering::Relaxed) + 1;
        rt_metrics::set_actors_active(kind.as_str(), count);
    }

    pub fn actor_stopped(&self, kind: ActorKind) {
        let previous = self
            .live(kind)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        rt_metrics::set_actors_active(kind.as_str(), previous.saturating_sub(1));
    }

    /// An actor task panicked. Always a bug.
    pub fn record_panic(&self, kind: ActorKind) {
        let total = self.panics.fetch_add(1, Ordering::Relaxed) + 1;
        rt_metrics::record_actor_panic(kind.as_str());
        error!(
            target: "rt.engine",
            actor_type = kind.as_str(),
            total_panics = total,
            "Actor panicked"
        );
    }

    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Live actors of `kind`.
    #[must_use]
    pub fn active(&self, kind: ActorKind) -> usize {
        self.live(kind).load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }
}
