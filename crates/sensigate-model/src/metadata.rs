//! Metadata entries attached to attributes.

use crate::value::{DataType, Modifiable};
use serde::Serialize;
use serde_json::Value;

pub const MODIFIABLE: &str = "modifiable";
pub const HIDDEN: &str = "hidden";
pub const TIMESTAMP: &str = "timestamp";
pub const LOCKED: &str = "locked";
pub const UNIT: &str = "unit";
pub const NICKNAME: &str = "nickname";
pub const CONSTRAINTS: &str = "constraints";

/// Names of the metadata every attribute carries and that cannot be removed.
pub const BUILT_IN: [&str; 4] = [MODIFIABLE, HIDDEN, TIMESTAMP, LOCKED];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metadata {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub modifiable: Modifiable,
    pub value: Value,
}

impl Metadata {
    pub fn new(name: impl Into<String>, data_type: DataType, modifiable: Modifiable, value: Value) -> Self {
        Self { name: name.into(), data_type, modifiable, value }
    }

    /// A caller-writable string entry such as `unit` or `nickname`.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, DataType::String, Modifiable::Modifiable, Value::String(value.into()))
    }

    pub fn is_built_in(&self) -> bool {
        BUILT_IN.contains(&self.name.as_str())
    }

    pub(crate) fn built_ins(modifiable: Modifiable, hidden: bool, timestamp: i64) -> Vec<Metadata> {
        vec![
            Metadata::new(MODIFIABLE, DataType::String, Modifiable::Fixed, Value::String(modifiable.to_string())),
            Metadata::new(HIDDEN, DataType::Boolean, Modifiable::Fixed, Value::Bool(hidden)),
            Metadata::new(TIMESTAMP, DataType::Integer, Modifiable::Updatable, Value::from(timestamp)),
            Metadata::new(LOCKED, DataType::Boolean, Modifiable::Updatable, Value::Bool(false)),
        ]
    }
}
