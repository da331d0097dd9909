//! Attributes: named, typed values owned by a resource.
//!
//! Every write runs the same pipeline under the attribute's own lock:
//! modifiability, type check, constraints in registration order, then the
//! value and its `timestamp` metadata are committed together.

use crate::constraint::Constraint;
use crate::metadata::{self, Metadata};
use crate::value::{values_equal, DataType, Modifiable, Writer};
use sensigate_core::{now_millis, Error, Result};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Outcome of a committed write.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange {
    pub previous: Value,
    pub value: Value,
    pub timestamp: i64,
    pub has_changed: bool,
}

impl ValueChange {
    pub fn to_json(&self) -> Value {
        json!({
            "old": self.previous,
            "new": self.value,
            "timestamp": self.timestamp,
            "changed": self.has_changed,
        })
    }
}

#[derive(Debug)]
struct AttributeState {
    value: Value,
    metadata: Vec<Metadata>,
    constraints: Vec<Constraint>,
}

impl AttributeState {
    fn meta(&self, name: &str) -> Option<&Metadata> {
        self.metadata.iter().find(|m| m.name == name)
    }

    fn meta_mut(&mut self, name: &str) -> Option<&mut Metadata> {
        self.metadata.iter_mut().find(|m| m.name == name)
    }

    fn flag(&self, name: &str) -> bool {
        self.meta(name).and_then(|m| m.value.as_bool()).unwrap_or(false)
    }

    fn timestamp(&self) -> i64 {
        self.meta(metadata::TIMESTAMP).and_then(|m| m.value.as_i64()).unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct Attribute {
    name: String,
    data_type: DataType,
    modifiable: Modifiable,
    state: RwLock<AttributeState>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: DataType, modifiable: Modifiable) -> Self {
        Self::with_value(name, data_type, modifiable, Value::Null, false)
    }

    /// Build an attribute with its initial value. The value is not checked
    /// against constraints; it is the construction-time value.
    pub fn with_value(
        name: impl Into<String>,
        data_type: DataType,
        modifiable: Modifiable,
        value: Value,
        hidden: bool,
    ) -> Self {
        let timestamp = if value.is_null() { 0 } else { now_millis() };
        Self {
            name: name.into(),
            data_type,
            modifiable,
            state: RwLock::new(AttributeState {
                value,
                metadata: Metadata::built_ins(modifiable, hidden, timestamp),
                constraints: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn modifiable(&self) -> Modifiable {
        self.modifiable
    }

    pub async fn value(&self) -> Value {
        self.state.read().await.value.clone()
    }

    pub async fn timestamp(&self) -> i64 {
        self.state.read().await.timestamp()
    }

    pub async fn is_hidden(&self) -> bool {
        self.state.read().await.flag(metadata::HIDDEN)
    }

    pub async fn metadata(&self, name: &str) -> Option<Metadata> {
        let state = self.state.read().await;
        if name == metadata::CONSTRAINTS {
            return state.meta(name).cloned().map(|mut m| {
                m.value = Value::Array(state.constraints.iter().map(Constraint::to_json).collect());
                m
            });
        }
        state.meta(name).cloned()
    }

    pub async fn constraints(&self) -> Vec<Constraint> {
        self.state.read().await.constraints.clone()
    }

    /// Append a constraint. Existing values are not re-validated.
    pub async fn add_constraint(&self, constraint: Constraint) {
        let mut state = self.state.write().await;
        state.constraints.push(constraint);
        if state.meta(metadata::CONSTRAINTS).is_none() {
            state.metadata.push(Metadata::new(
                metadata::CONSTRAINTS,
                DataType::Array,
                Modifiable::Fixed,
                Value::Null,
            ));
        }
    }

    pub async fn add_metadata(&self, mut entry: Metadata) -> Result<()> {
        let mut state = self.state.write().await;
        if state.meta(&entry.name).is_some() {
            return Err(Error::name_conflict("metadata", format!("{}/{}", self.name, entry.name)));
        }
        if entry.name == metadata::CONSTRAINTS {
            state.constraints = Constraint::list_from_json(&entry.value)?;
            entry.modifiable = Modifiable::Fixed;
        }
        state.metadata.push(entry);
        Ok(())
    }

    pub async fn remove_metadata(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let index = state
            .metadata
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| Error::not_found(format!("metadata {}/{}", self.name, name)))?;
        if state.metadata[index].is_built_in() {
            return Err(Error::NotModifiable(format!("built-in metadata {}", name)));
        }
        if state.metadata[index].modifiable == Modifiable::Fixed {
            return Err(Error::NotModifiable(format!("metadata {}/{} is FIXED", self.name, name)));
        }
        state.metadata.remove(index);
        if name == metadata::CONSTRAINTS {
            state.constraints.clear();
        }
        Ok(())
    }

    /// Write the attribute value.
    pub async fn set_value(&self, value: Value, timestamp: Option<i64>, writer: Writer) -> Result<ValueChange> {
        let mut state = self.state.write().await;

        if !self.modifiable.permits(writer) {
            return Err(Error::NotModifiable(format!("{} is {}", self.name, self.modifiable)));
        }
        if writer == Writer::External && state.flag(metadata::LOCKED) {
            return Err(Error::NotModifiable(format!("{} is locked", self.name)));
        }
        self.data_type.check(&value)?;

        let has_changed = !values_equal(&state.value, &value);
        for constraint in &state.constraints {
            match constraint.complies(&value, has_changed) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(Error::ConstraintViolation(format!(
                        "{} rejected by {}",
                        self.name, constraint
                    )))
                }
                Err(e) => {
                    warn!("Constraint {} not evaluable on {}: {}", constraint, self.name, e);
                    return Err(e);
                }
            }
        }

        let timestamp = timestamp.unwrap_or_else(now_millis);
        let previous = std::mem::replace(&mut state.value, value.clone());
        if let Some(ts) = state.meta_mut(metadata::TIMESTAMP) {
            ts.value = Value::from(timestamp);
        }
        debug!("{} := {} (changed: {})", self.name, value, has_changed);
        Ok(ValueChange { previous, value, timestamp, has_changed })
    }

    /// Write one metadata entry. Unknown names are created by internal
    /// writers and rejected for external ones. The constraint list is
    /// created FIXED and cannot be replaced afterwards.
    pub async fn set_metadata(&self, name: &str, value: Value, writer: Writer) -> Result<ValueChange> {
        let mut state = self.state.write().await;
        let constraints = if name == metadata::CONSTRAINTS {
            Some(Constraint::list_from_json(&value)?)
        } else {
            None
        };

        let timestamp = now_millis();
        let previous = match state.meta_mut(name) {
            Some(entry) => {
                if !entry.modifiable.permits(writer) {
                    return Err(Error::NotModifiable(format!("metadata {}/{} is {}", self.name, name, entry.modifiable)));
                }
                entry.data_type.check(&value)?;
                std::mem::replace(&mut entry.value, value.clone())
            }
            None if writer == Writer::Internal => {
                let modifiable = if constraints.is_some() { Modifiable::Fixed } else { Modifiable::Modifiable };
                state.metadata.push(Metadata::new(name, DataType::of(&value), modifiable, value.clone()));
                Value::Null
            }
            None => return Err(Error::not_found(format!("metadata {}/{}", self.name, name))),
        };
        if let Some(list) = constraints {
            state.constraints = list;
        }
        let has_changed = !values_equal(&previous, &value);
        Ok(ValueChange { previous, value, timestamp, has_changed })
    }

    /// Attribute description as exposed to callers.
    pub async fn describe(&self) -> Value {
        let state = self.state.read().await;
        let metadata: Vec<Value> = state
            .metadata
            .iter()
            .map(|m| {
                let value = if m.name == metadata::CONSTRAINTS {
                    Value::Array(state.constraints.iter().map(Constraint::to_json).collect())
                } else {
                    m.value.clone()
                };
                json!({ "name": m.name, "type": m.data_type, "value": value })
            })
            .collect();
        json!({
            "name": self.name,
            "type": self.data_type,
            "value": state.value,
            "timestamp": state.timestamp(),
            "metadata": metadata,
        })
    }
}
