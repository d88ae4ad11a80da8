//! Field values carried by documents.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::{document::DocumentHandle, reference::ReferenceMany};

/// A single field value of a [`Document`](crate::document::Document).
///
/// Scalar variants compare by value. [`Value::Reference`] compares by instance identity and
/// [`Value::Collection`] by the order and identity of its loaded members.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    /// A single reference to another document (also used for the parent).
    Reference(DocumentHandle),
    /// An ordered, lazily loaded collection of references or children.
    Collection(ReferenceMany),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value is a plain scalar (no reference semantics).
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Reference(_) | Value::Collection(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&DocumentHandle> {
        match self {
            Value::Reference(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&ReferenceMany> {
        match self {
            Value::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut ReferenceMany> {
        match self {
            Value::Collection(collection) => Some(collection),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            // NaN == NaN here, so an untouched NaN never reads as a change
            (Value::Double(a), Value::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a.ptr_eq(b),
            (Value::Collection(a), Value::Collection(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Boolean(v) => write!(f, "Boolean({v})"),
            Value::Long(v) => write!(f, "Long({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Date(v) => write!(f, "Date({v})"),
            Value::Binary(v) => write!(f, "Binary({} bytes)", v.len()),
            Value::Reference(handle) => write!(f, "Reference({handle:?})"),
            Value::Collection(collection) => write!(f, "Collection({collection:?})"),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Long(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<DocumentHandle> for Value {
    fn from(v: DocumentHandle) -> Self {
        Value::Reference(v)
    }
}

impl From<&DocumentHandle> for Value {
    fn from(v: &DocumentHandle) -> Self {
        Value::Reference(v.clone())
    }
}

impl From<ReferenceMany> for Value {
    fn from(v: ReferenceMany) -> Self {
        Value::Collection(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
