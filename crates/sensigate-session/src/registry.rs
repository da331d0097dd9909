//! Live sessions by token.

use crate::session::Session;
use dashmap::DashMap;
use sensigate_core::SessionToken;
use std::sync::Arc;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionToken, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.token().clone(), session);
    }

    pub fn get(&self, token: &SessionToken) -> Option<Arc<Session>> {
        self.sessions.get(token).map(|s| s.clone())
    }

    pub fn remove(&self, token: &SessionToken) -> Option<Arc<Session>> {
        self.sessions.remove(token).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn list(&self) -> Vec<SessionToken> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of the sessions matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&Session) -> bool) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Close every session matching `predicate`; returns how many were closed.
    pub async fn close_where(&self, predicate: impl Fn(&Session) -> bool + Send) -> usize {
        let targets = self.find(predicate);
        for session in &targets {
            session.close().await;
        }
        targets.len()
    }
}
