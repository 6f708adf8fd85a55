//! Scalar values and their coercion rules.
//!
//! Every step resolves to a [`Value`]. Values are loosely typed: a text value
//! that trims to a finite float is "numeric" and compares numerically, anything
//! else compares as trimmed text.

use std::cmp::Ordering;
use std::fmt;

/// A resolved scalar.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Value {
    /// Construct a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// The numeric reading of this value, if its textual form is numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Number(_) | Value::Empty | Value::Bool(_) => None,
            Value::Text(s) => parse_numeric(s),
        }
    }

    /// Whether the value reads as a number.
    pub fn is_numeric(&self) -> bool {
        self.as_number().is_some()
    }

    /// Arithmetic coercion: non-numeric values count as `0`.
    pub fn to_number(&self) -> f64 {
        self.as_number().unwrap_or(0.0)
    }

    /// Logical coercion: `false`, `0`, and empty text are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Empty => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => {
                let t = s.trim();
                !(t.is_empty() || t == "0" || t.eq_ignore_ascii_case("false"))
            }
        }
    }

    /// Loose equality: numeric when both sides are numeric, trimmed text otherwise.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => self.to_string().trim() == other.to_string().trim(),
        }
    }

    /// Loose ordering with the same numeric/text split as [`loose_eq`](Self::loose_eq).
    pub fn loose_cmp(&self, other: &Value) -> Ordering {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => self.to_string().trim().cmp(other.to_string().trim()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Empty,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or_default(),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Parse trimmed text as a finite float.
pub(crate) fn parse_numeric(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok().filter(|n| n.is_finite())
}
