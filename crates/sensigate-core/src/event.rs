//! Change, lifecycle and remote-link notifications.
//!
//! Notifications are produced by the resource model and the remote bridge and
//! consumed by the notification engine. They also travel across peer links
//! inside `dispatch` messages, so they live here rather than in the model.

use crate::path::ResourcePath;
use crate::types::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broad category of a notification, used by filters to restrict delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageCategory {
    Lifecycle,
    Update,
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    ProviderAppearing,
    ProviderDisappearing,
    ServiceAppearing,
    ServiceDisappearing,
    ResourceAppearing,
    ResourceDisappearing,
    AttributeValueUpdated,
    MetadataValueUpdated,
    Actuated,
    Connected,
    Disconnected,
}

impl MessageKind {
    pub fn category(&self) -> MessageCategory {
        match self {
            Self::ProviderAppearing
            | Self::ProviderDisappearing
            | Self::ServiceAppearing
            | Self::ServiceDisappearing
            | Self::ResourceAppearing
            | Self::ResourceDisappearing => MessageCategory::Lifecycle,
            Self::AttributeValueUpdated | Self::MetadataValueUpdated | Self::Actuated => {
                MessageCategory::Update
            }
            Self::Connected | Self::Disconnected => MessageCategory::Remote,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// One event emitted by the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: MessageKind,
    /// Path of the element the event is about (no attribute segment).
    pub path: ResourcePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub has_changed: bool,
    pub timestamp: i64,
}

impl Notification {
    pub fn new(kind: MessageKind, path: ResourcePath) -> Self {
        Self {
            kind,
            path: path.element(),
            attribute: path.attribute,
            metadata: None,
            value: Value::Null,
            has_changed: false,
            timestamp: now_millis(),
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn changed(mut self, has_changed: bool) -> Self {
        self.has_changed = has_changed;
        self
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// `/p/s/r/a` for attribute events, the element path otherwise.
    pub fn uri(&self) -> String {
        match &self.attribute {
            Some(attribute) => format!("{}/{}", self.path, attribute),
            None => self.path.to_string(),
        }
    }
}
