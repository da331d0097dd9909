//! Value constraints.
//!
//! JSON form: `{"operator": ">=", "operand": 0, "complement": false}`.
//! Constraints are checked in registration order before a value is committed,
//! and reused by subscription filters against notification values.

use crate::value::values_equal;
use regex::Regex;
use sensigate_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<")]
    Lower,
    #[serde(rename = "<=")]
    LowerEqual,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "[]")]
    Range,
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "length")]
    Length,
    /// Filter-only: holds when the notified value differs from the previous one.
    #[serde(rename = "changed")]
    Changed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ConstraintSpec {
    operator: Operator,
    #[serde(default)]
    operand: Value,
    #[serde(default)]
    complement: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "ConstraintSpec", into = "ConstraintSpec")]
pub struct Constraint {
    operator: Operator,
    operand: Value,
    complement: bool,
    pattern: Option<Regex>,
}

impl TryFrom<ConstraintSpec> for Constraint {
    type Error = Error;

    fn try_from(spec: ConstraintSpec) -> Result<Self> {
        let ConstraintSpec { operator, operand, complement } = spec;
        let pattern = match operator {
            Operator::Regex => {
                let source = operand
                    .as_str()
                    .ok_or_else(|| Error::InvalidValue("regex operand must be a string".into()))?;
                Some(
                    Regex::new(&format!("^(?:{})$", source))
                        .map_err(|e| Error::InvalidValue(format!("invalid regex '{}': {}", source, e)))?,
                )
            }
            Operator::In if !operand.is_array() => {
                return Err(Error::InvalidValue("'in' operand must be an array".into()))
            }
            Operator::Range => {
                let bounds = operand.as_array().map(|a| a.len()).unwrap_or(0);
                if bounds != 2 {
                    return Err(Error::InvalidValue("'[]' operand must be [low, high]".into()));
                }
                None
            }
            Operator::Length if !operand.is_u64() => {
                return Err(Error::InvalidValue("'length' operand must be a non-negative integer".into()))
            }
            Operator::Greater | Operator::GreaterEqual | Operator::Lower | Operator::LowerEqual
                if !(operand.is_number() || operand.is_string()) =>
            {
                return Err(Error::InvalidValue(format!(
                    "{:?} operand must be a number or a string",
                    operator
                )))
            }
            _ => None,
        };
        Ok(Self { operator, operand, complement, pattern })
    }
}

impl From<Constraint> for ConstraintSpec {
    fn from(c: Constraint) -> Self {
        Self { operator: c.operator, operand: c.operand, complement: c.complement }
    }
}

impl Constraint {
    pub fn new(operator: Operator, operand: Value) -> Result<Self> {
        Self::try_from(ConstraintSpec { operator, operand, complement: false })
    }

    pub fn changed() -> Self {
        Self { operator: Operator::Changed, operand: Value::Null, complement: false, pattern: None }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidValue(format!("invalid constraint {}: {}", value, e)))
    }

    /// Parse a constraint list (a JSON array, or a single constraint object).
    pub fn list_from_json(value: &Value) -> Result<Vec<Self>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items.iter().map(Self::from_json).collect(),
            single => Ok(vec![Self::from_json(single)?]),
        }
    }

    pub fn complement(mut self) -> Self {
        self.complement = !self.complement;
        self
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "operator": self.operator,
            "operand": self.operand,
            "complement": self.complement,
        })
    }

    /// Evaluate against a candidate value. Errors mean the constraint cannot
    /// be evaluated for this value; callers fail closed.
    pub fn complies(&self, value: &Value, has_changed: bool) -> Result<bool> {
        let holds = match self.operator {
            Operator::Equal => values_equal(value, &self.operand),
            Operator::Greater => self.compare(value)?.is_gt(),
            Operator::GreaterEqual => self.compare(value)?.is_ge(),
            Operator::Lower => self.compare(value)?.is_lt(),
            Operator::LowerEqual => self.compare(value)?.is_le(),
            Operator::In => self
                .operand
                .as_array()
                .map(|set| set.iter().any(|v| values_equal(v, value)))
                .unwrap_or(false),
            Operator::Range => match self.operand.as_array().map(|a| a.as_slice()) {
                Some([low, high]) => {
                    compare(value, low)?.is_ge() && compare(value, high)?.is_le()
                }
                _ => false,
            },
            Operator::Regex => match (&self.pattern, value.as_str()) {
                (Some(re), Some(s)) => re.is_match(s),
                (_, None) => return Err(self.mismatch(value)),
                (None, _) => false,
            },
            Operator::Length => {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => return Err(self.mismatch(value)),
                };
                Some(len as u64) == self.operand.as_u64()
            }
            Operator::Changed => has_changed,
        };
        Ok(holds != self.complement)
    }

    fn compare(&self, value: &Value) -> Result<std::cmp::Ordering> {
        compare(value, &self.operand)
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::ConstraintViolation(format!("cannot apply {:?} to {}", self.operator, value))
    }
}

fn compare(value: &Value, operand: &Value) -> Result<std::cmp::Ordering> {
    match (value, operand) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
                .ok_or_else(|| Error::ConstraintViolation("incomparable numbers".into()))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(Error::ConstraintViolation(format!(
            "cannot compare {} with {}",
            value, operand
        ))),
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Constraint {
        Constraint::from_json(&v).unwrap()
    }

    #[test]
    fn numeric_comparisons() {
        let c = parse(json!({"operator": ">=", "operand": 10}));
        assert!(c.complies(&json!(10), false).unwrap());
        assert!(c.complies(&json!(10.5), false).unwrap());
        assert!(!c.complies(&json!(9), false).unwrap());
    }

    #[test]
    fn complement_inverts() {
        let c = parse(json!({"operator": "in", "operand": ["on", "off"], "complement": true}));
        assert!(!c.complies(&json!("on"), false).unwrap());
        assert!(c.complies(&json!("dim"), false).unwrap());
    }

    #[test]
    fn range_is_inclusive() {
        let c = parse(json!({"operator": "[]", "operand": [0, 100]}));
        assert!(c.complies(&json!(0), false).unwrap());
        assert!(c.complies(&json!(100), false).unwrap());
        assert!(!c.complies(&json!(101), false).unwrap());
    }

    #[test]
    fn regex_matches_whole_value() {
        let c = parse(json!({"operator": "regex", "operand": "[a-z]+"}));
        assert!(c.complies(&json!("abc"), false).unwrap());
        assert!(!c.complies(&json!("abc1"), false).unwrap());
        assert!(c.complies(&json!(5), false).is_err());
    }

    #[test]
    fn length_of_strings_and_arrays() {
        let c = parse(json!({"operator": "length", "operand": 3}));
        assert!(c.complies(&json!("abc"), false).unwrap());
        assert!(c.complies(&json!([1, 2, 3]), false).unwrap());
        assert!(!c.complies(&json!("ab"), false).unwrap());
    }

    #[test]
    fn changed_reads_flag() {
        let c = Constraint::changed();
        assert!(c.complies(&json!(1), true).unwrap());
        assert!(!c.complies(&json!(1), false).unwrap());
    }

    #[test]
    fn incomparable_value_is_an_error() {
        let c = parse(json!({"operator": "<", "operand": 5}));
        assert!(c.complies(&json!("five"), false).is_err());
    }

    #[test]
    fn invalid_definitions_rejected() {
        assert!(Constraint::from_json(&json!({"operator": "regex", "operand": "("})).is_err());
        assert!(Constraint::from_json(&json!({"operator": "[]", "operand": [1]})).is_err());
        assert!(Constraint::from_json(&json!({"operator": "~", "operand": 1})).is_err());
    }

    #[test]
    fn list_accepts_single_object() {
        let list = Constraint::list_from_json(&json!({"operator": "==", "operand": 1})).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].to_json()["operator"], "==");
    }
}
