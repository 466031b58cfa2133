//! Typed attribute values.
//!
//! The directory itself only stores byte strings. A [`Value`] is what callers put into or read
//! out of the nice view of an [`Entry`](crate::Entry); the [`TypeCodec`](crate::TypeCodec) turns
//! it into wire bytes and back.

use crate::dn::Dn;
use rust_decimal::Decimal;
use std::str::FromStr;

/// In-memory attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean, encoded as `TRUE` / `FALSE`.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Arbitrary precision decimal.
    Decimal(Decimal),
    /// Unicode text.
    Text(String),
    /// Distinguished name.
    Dn(Dn),
    /// Opaque bytes (certificates, binary blobs).
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Fixed-size tuple of values.
    Tuple(Vec<Value>),
    /// Key/value mapping, in insertion order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Short name of the value kind, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Dn(_) => "dn",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Map(_) => "map",
        }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrows the text of a [`Value::Text`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Interprets the value as a boolean.
    ///
    /// Text values decoded from the wire are accepted when they read `TRUE` or `FALSE`
    /// (case-insensitive).
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Text(text) if text.eq_ignore_ascii_case("true") => Some(true),
            Self::Text(text) if text.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Interprets the value as a signed integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interprets the value as a decimal.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(value) => Some(*value),
            Self::Int(value) => Some(Decimal::from(*value)),
            Self::Text(text) => Decimal::from_str(text.trim()).ok(),
            _ => None,
        }
    }

    /// Borrows the DN of a [`Value::Dn`].
    #[must_use]
    pub fn as_dn(&self) -> Option<&Dn> {
        match self {
            Self::Dn(dn) => Some(dn),
            _ => None,
        }
    }

    /// Borrows the bytes of a [`Value::Bytes`].
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Textual rendering of a scalar, as it would appear on the wire.
    ///
    /// Returns `None` for null, containers and bytes that are not UTF-8.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Bool(true) => Some("TRUE".to_string()),
            Self::Bool(false) => Some("FALSE".to_string()),
            Self::Int(value) => Some(value.to_string()),
            Self::Float(value) => Some(value.to_string()),
            Self::Decimal(value) => Some(value.to_string()),
            Self::Text(text) => Some(text.clone()),
            Self::Dn(dn) => Some(dn.to_string()),
            Self::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
            Self::Null | Self::List(_) | Self::Tuple(_) | Self::Map(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<Dn> for Value {
    fn from(value: Dn) -> Self {
        Self::Dn(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
