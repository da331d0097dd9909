//! Subscription filters.
//!
//! A filter selects notifications by sender (the notification uri, matched
//! exactly or as a regex), by category, and by constraints over the
//! notification value. `complement` inverts the sender and condition outcome
//! but never the category check.
//!
//! JSON form, as carried by `registerAgent` relays:
//!
//!   { "sender": "/p1/s1/.*", "pattern": true, "complement": false,
//!     "types": ["UPDATE"], "conditions": [{"operator": ">", "operand": 20}],
//!     "policy": "onChange" }

use regex::Regex;
use sensigate_core::{split_namespace, Error, MessageCategory, MessageKind, Notification, Result};
use sensigate_model::Constraint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Whether value updates that did not change the value are delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryPolicy {
    #[default]
    OnChange,
    Always,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct FilterSpec {
    sender: String,
    #[serde(default)]
    pattern: bool,
    #[serde(default)]
    complement: bool,
    #[serde(default)]
    types: Vec<MessageCategory>,
    #[serde(default)]
    conditions: Vec<Constraint>,
    #[serde(default)]
    policy: DeliveryPolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "FilterSpec", into = "FilterSpec")]
pub struct Filter {
    sender: String,
    regex: Option<Regex>,
    complement: bool,
    types: Vec<MessageCategory>,
    conditions: Vec<Constraint>,
    policy: DeliveryPolicy,
}

impl TryFrom<FilterSpec> for Filter {
    type Error = Error;

    fn try_from(spec: FilterSpec) -> Result<Self> {
        let regex = if spec.pattern {
            Some(
                Regex::new(&format!("^(?:{})$", spec.sender))
                    .map_err(|e| Error::InvalidValue(format!("invalid sender pattern '{}': {}", spec.sender, e)))?,
            )
        } else {
            None
        };
        Ok(Self {
            sender: spec.sender,
            regex,
            complement: spec.complement,
            types: spec.types,
            conditions: spec.conditions,
            policy: spec.policy,
        })
    }
}

impl From<Filter> for FilterSpec {
    fn from(f: Filter) -> Self {
        Self {
            pattern: f.regex.is_some(),
            sender: f.sender,
            complement: f.complement,
            types: f.types,
            conditions: f.conditions,
            policy: f.policy,
        }
    }
}

impl Filter {
    /// Match notifications whose uri equals `sender`.
    pub fn exact(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            regex: None,
            complement: false,
            types: Vec::new(),
            conditions: Vec::new(),
            policy: DeliveryPolicy::OnChange,
        }
    }

    /// Match notifications whose uri matches the regex `sender` in full.
    pub fn pattern(sender: impl Into<String>) -> Result<Self> {
        Self::try_from(FilterSpec {
            sender: sender.into(),
            pattern: true,
            complement: false,
            types: Vec::new(),
            conditions: Vec::new(),
            policy: DeliveryPolicy::OnChange,
        })
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| Error::InvalidValue(format!("invalid filter: {}", e)))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn complement(mut self) -> Self {
        self.complement = !self.complement;
        self
    }

    /// Restrict to the given categories. Empty means every category.
    pub fn types(mut self, types: impl IntoIterator<Item = MessageCategory>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    pub fn condition(mut self, condition: Constraint) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// `namespace` is the gateway's own namespace: a sender written in
    /// qualified form (`/gw:p1/...`) also matches this gateway's local events.
    pub fn matches(&self, notification: &Notification, namespace: Option<&str>) -> bool {
        if !self.types.is_empty() && !self.types.contains(&notification.kind.category()) {
            return false;
        }
        if !self.admits(notification) {
            return false;
        }
        if !self.matches_sender(notification, namespace) {
            return self.complement;
        }
        if !self.matches_conditions(notification) {
            return self.complement;
        }
        !self.complement
    }

    fn matches_uri(&self, uri: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(uri),
            None => self.sender == uri,
        }
    }

    fn matches_sender(&self, notification: &Notification, namespace: Option<&str>) -> bool {
        let uri = notification.uri();
        if self.matches_uri(&uri) {
            return true;
        }
        match namespace {
            Some(ns) if split_namespace(&notification.path.provider).0.is_none() => {
                let mut path = notification.path.clone();
                path.provider = format!("{}:{}", ns, path.provider);
                let resolved = match &notification.attribute {
                    Some(attribute) => format!("{}/{}", path, attribute),
                    None => path.to_string(),
                };
                self.matches_uri(&resolved)
            }
            _ => false,
        }
    }

    /// Delivery policy gate. Not subject to the complement.
    fn admits(&self, notification: &Notification) -> bool {
        let value_update = matches!(
            notification.kind,
            MessageKind::AttributeValueUpdated | MessageKind::MetadataValueUpdated
        );
        !(value_update && self.policy == DeliveryPolicy::OnChange && !notification.has_changed)
    }

    fn matches_conditions(&self, notification: &Notification) -> bool {
        if notification.value.is_null() {
            return true;
        }
        self.conditions.iter().all(|c| match c.complies(&notification.value, notification.has_changed) {
            Ok(holds) => holds,
            Err(e) => {
                debug!("condition {} not evaluable on {}: {}", c, notification.uri(), e);
                false
            }
        })
    }
}
