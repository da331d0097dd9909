//! Value types, modifiability and writer identity.

use sensigate_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of an attribute or metadata value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Boolean => "boolean",
            DataType::Object => "object",
            DataType::Array => "array",
            DataType::Any => "any",
        }
    }

    /// The narrowest type describing `value`. `null` maps to `any`.
    pub fn of(value: &Value) -> DataType {
        match value {
            Value::Null => DataType::Any,
            Value::Bool(_) => DataType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => DataType::Integer,
            Value::Number(_) => DataType::Float,
            Value::String(_) => DataType::String,
            Value::Array(_) => DataType::Array,
            Value::Object(_) => DataType::Object,
        }
    }

    /// Whether `value` may be stored under this type. `null` always clears.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, DataType::of(value)) {
            (DataType::Any, _) | (_, DataType::Any) => true,
            (DataType::Float, DataType::Integer) => true,
            (expected, actual) => *expected == actual,
        }
    }

    pub fn check(&self, value: &Value) -> Result<()> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(Error::ConstraintViolation(format!(
                "type mismatch: expected {}, got {}",
                self,
                DataType::of(value)
            )))
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DataType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "string" => Ok(DataType::String),
            "integer" | "int" | "long" => Ok(DataType::Integer),
            "float" | "double" => Ok(DataType::Float),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "object" => Ok(DataType::Object),
            "array" => Ok(DataType::Array),
            "any" => Ok(DataType::Any),
            _ => Err(Error::InvalidValue(format!("unknown data type: {}", s))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modifiable {
    /// Set once at construction.
    Fixed,
    /// Written only by the gateway itself or its southbound integrations.
    #[default]
    Updatable,
    /// Writable by callers through access methods.
    Modifiable,
}

impl Modifiable {
    pub fn permits(&self, writer: Writer) -> bool {
        match self {
            Modifiable::Fixed => false,
            Modifiable::Updatable => writer == Writer::Internal,
            Modifiable::Modifiable => true,
        }
    }
}

impl std::fmt::Display for Modifiable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modifiable::Fixed => f.write_str("FIXED"),
            Modifiable::Updatable => f.write_str("UPDATABLE"),
            Modifiable::Modifiable => f.write_str("MODIFIABLE"),
        }
    }
}

/// Who is writing a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Writer {
    /// The gateway or a southbound integration.
    Internal,
    /// A caller going through the access-method layer.
    External,
}

/// Equality that treats `1` and `1.0` as the same value.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
