//! Decoded cell values.

use serde::Serialize;

use crate::driver::TypeTag;

/// One decoded cell.
///
/// Exactly one variant is active per cell, and the variant is fully
/// determined by the column's type tag plus the row's null flag.
/// Integers widen to `i64`, floats to `f64`. Money and date/time
/// columns are not decoded; they come back as [`Value::Unsupported`]
/// carrying the tag that was left alone.
///
/// Serializes untagged, so a row turns into plain JSON: `Null` becomes
/// `null`, numbers become numbers, `Binary`/`Image` become byte arrays
/// and `Unsupported` becomes the tag's name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
    Image(Vec<u8>),
    Unsupported(TypeTag),
}

impl Value {
    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer payload, if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The float payload; integers widen.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The text payload, if this is `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// The raw bytes of a `Binary` or decoded `Image`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(v) | Value::Image(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}
