//! Agents: registered subscribers and their delivery callbacks.

use crate::filter::Filter;
use sensigate_core::{Error, Notification, PublicKey, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives matching notifications. Called on the emitting task, so it must
/// not block; hand work off to a channel or a spawned task.
pub trait AgentCallback: Send + Sync {
    fn deliver(&self, agent_id: &str, notification: &Notification) -> Result<()>;
}

/// Adapts a closure into an [`AgentCallback`].
pub struct FnCallback<F>(pub F);

impl<F> AgentCallback for FnCallback<F>
where
    F: Fn(&str, &Notification) -> Result<()> + Send + Sync,
{
    fn deliver(&self, agent_id: &str, notification: &Notification) -> Result<()> {
        (self.0)(agent_id, notification)
    }
}

/// Forwards notifications into an unbounded channel.
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AgentCallback for ChannelCallback {
    fn deliver(&self, _agent_id: &str, notification: &Notification) -> Result<()> {
        self.tx
            .send(notification.clone())
            .map_err(|_| Error::unavailable("agent channel closed"))
    }
}

pub struct Agent {
    id: String,
    filter: Filter,
    callback: Arc<dyn AgentCallback>,
    owner: Option<PublicKey>,
    delivered: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("sender", &self.filter.sender())
            .field("owner", &self.owner)
            .finish()
    }
}

impl Agent {
    pub(crate) fn new(id: String, filter: Filter, callback: Arc<dyn AgentCallback>, owner: Option<PublicKey>) -> Self {
        Self {
            id,
            filter,
            callback,
            owner,
            delivered: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn owner(&self) -> Option<&PublicKey> {
        self.owner.as_ref()
    }

    pub(crate) fn callback(&self) -> &dyn AgentCallback {
        self.callback.as_ref()
    }

    pub(crate) fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
