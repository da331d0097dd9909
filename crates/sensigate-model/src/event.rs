//! Where the model sends its notifications.

pub use sensigate_core::{MessageCategory, MessageKind, Notification};

/// Receives every notification the model emits. Implementations must not
/// block: they are called on the writer's task, after the write committed.
pub trait EventSink: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _notification: Notification) {}
}

/// Keeps every notification; used by tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: std::sync::Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<MessageKind> {
        self.notifications().into_iter().map(|n| n.kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, notification: Notification) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(notification);
        }
    }
}
