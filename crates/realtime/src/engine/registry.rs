//! Concurrent directory from actor address to live mailbox.
//!
//! The registry is the only structure shared between actors. It is a
//! sharded `DashMap`, so spawn, lookup and removal on unrelated addresses
//! never contend on a single lock.

use super::address::{Address, Pid};
use super::mailbox::MailboxMonitor;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// One live actor as seen by the registry.
#[derive(Clone)]
pub(crate) struct RegistryEntry {
    pub(crate) pid: Pid,
    /// Type-erased `mpsc::UnboundedSender<Mail<A::Message>>`.
    pub(crate) mailbox: Arc<dyn Any + Send + Sync>,
    /// Sends an in-band poison on the same mailbox; false once it is closed.
    pub(crate) poison: Arc<dyn Fn(oneshot::Sender<()>) -> bool + Send + Sync>,
    pub(crate) monitor: Arc<MailboxMonitor>,
    pub(crate) cancel_token: CancellationToken,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("pid", &self.pid)
            .field("depth", &self.monitor.current_depth())
            .finish_non_exhaustive()
    }
}

/// Address -> live actor map.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: DashMap<Address, RegistryEntry>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an actor. Returns the entry back if the address is taken.
    pub(crate) fn register(&self, entry: RegistryEntry) -> Result<(), RegistryEntry> {
        match self.entries.entry(entry.pid.address().clone()) {
            Entry::Occupied(_) => Err(entry),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// Current PID at an address.
    pub(crate) fn lookup(&self, address: &Address) -> Option<Pid> {
        self.entries.get(address).map(|entry| entry.pid.clone())
    }

    /// Entry at the PID's address, if it is still the same incarnation.
    ///
    /// `Err(None)` means nothing lives at the address; `Err(Some(pid))`
    /// means a newer incarnation replaced the requested one.
    pub(crate) fn resolve(&self, pid: &Pid) -> Result<RegistryEntry, Option<Pid>> {
        match self.entries.get(pid.address()) {
            Some(entry) if entry.pid == *pid => Ok(entry.clone()),
            Some(entry) => Err(Some(entry.pid.clone())),
            None => Err(None),
        }
    }

    /// Remove the entry only if it still belongs to `pid`.
    pub(crate) fn remove(&self, pid: &Pid) -> Option<RegistryEntry> {
        self.entries
            .remove_if(pid.address(), |_, entry| entry.pid == *pid)
            .map(|(_, entry)| entry)
    }

    /// Number of live actors.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of every live PID.
    pub(crate) fn pids(&self) -> Vec<Pid> {
        self.entries.iter().map(|entry| entry.pid.clone()).collect()
    }
}
