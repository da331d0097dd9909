//! Fan-out of notifications to registered agents.

use crate::agent::{Agent, AgentCallback};
use crate::filter::Filter;
use sensigate_core::{Notification, PatternName, PublicKey};
use sensigate_model::EventSink;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub struct NotificationEngine {
    namespace: Option<String>,
    agents: RwLock<Vec<Arc<Agent>>>,
    ids: PatternName,
}

impl Default for NotificationEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

impl NotificationEngine {
    /// `namespace` lets filters written against qualified paths match this
    /// gateway's own events.
    pub fn new(namespace: Option<String>) -> Self {
        Self {
            namespace,
            agents: RwLock::new(Vec::new()),
            ids: PatternName::new("$(agent)"),
        }
    }

    fn snapshot(&self) -> Vec<Arc<Agent>> {
        match self.agents.read() {
            Ok(agents) => agents.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_agents<R>(&self, f: impl FnOnce(&mut Vec<Arc<Agent>>) -> R) -> R {
        match self.agents.write() {
            Ok(mut agents) => f(&mut agents),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Register an agent and return its generated identifier.
    pub fn register(&self, filter: Filter, callback: Arc<dyn AgentCallback>, owner: Option<PublicKey>) -> String {
        let id = self.ids.build();
        debug!("agent {} registered on {}", id, filter.sender());
        let agent = Arc::new(Agent::new(id.clone(), filter, callback, owner));
        self.with_agents(|agents| agents.push(agent));
        id
    }

    /// Remove an agent. Unknown identifiers are ignored; returns whether one was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.with_agents(|agents| {
            let before = agents.len();
            agents.retain(|a| a.id() != id);
            agents.len() != before
        });
        if removed {
            debug!("agent {} unregistered", id);
        }
        removed
    }

    /// Remove agent `id` only if it was registered on behalf of `owner`.
    pub fn unregister_as(&self, id: &str, owner: &PublicKey) -> bool {
        let removed = self.with_agents(|agents| {
            match agents.iter().position(|a| a.id() == id && a.owner() == Some(owner)) {
                Some(index) => {
                    agents.remove(index);
                    true
                }
                None => false,
            }
        });
        if removed {
            debug!("agent {} unregistered by {}", id, owner);
        }
        removed
    }

    /// Remove every agent registered on behalf of `owner`.
    pub fn unregister_owned(&self, owner: &PublicKey) -> usize {
        let removed = self.with_agents(|agents| {
            let before = agents.len();
            agents.retain(|a| a.owner() != Some(owner));
            before - agents.len()
        });
        if removed > 0 {
            info!("Removed {} agent(s) owned by {}", removed, owner);
        }
        removed
    }

    pub fn agent(&self, id: &str) -> Option<Arc<Agent>> {
        self.snapshot().into_iter().find(|a| a.id() == id)
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.snapshot()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `notification` to every matching agent, in registration order.
    /// A failing or panicking callback is recorded and skipped.
    pub fn deliver(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for agent in self.snapshot() {
            if !agent.filter().matches(notification, self.namespace.as_deref()) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| agent.callback().deliver(agent.id(), notification)));
            match outcome {
                Ok(Ok(())) => {
                    agent.record_delivery();
                    delivered += 1;
                }
                Ok(Err(e)) => {
                    agent.record_failure();
                    warn!("agent {} failed on {}: {}", agent.id(), notification.uri(), e);
                }
                Err(_) => {
                    agent.record_failure();
                    warn!("agent {} panicked on {}", agent.id(), notification.uri());
                }
            }
        }
        delivered
    }
}

impl EventSink for NotificationEngine {
    fn publish(&self, notification: Notification) {
        self.deliver(&notification);
    }
}
