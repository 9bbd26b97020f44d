//! Key fields and key values.
//!
//! A [`KeyField`] names the field (or ordered tuple of fields) that an
//! identity or association is keyed on. A [`Key`] is the matching value
//! tuple. Keys are totally ordered and hashable so they can live in the
//! staged sets and binding tables of the identity map, including keys built
//! from floating point or JSON values.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single field or an ordered tuple of fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyField {
    /// One field, e.g. `id`.
    Single(String),
    /// An ordered tuple of fields, e.g. `[id, type]`.
    Composite(Vec<String>),
}

impl KeyField {
    /// A single-field key.
    pub fn single(name: impl Into<String>) -> Self {
        KeyField::Single(name.into())
    }

    /// A composite key over the given fields, in order.
    pub fn composite<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyField::Composite(names.into_iter().map(Into::into).collect())
    }

    /// The fields making up this key, in order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            KeyField::Single(name) => vec![name.as_str()],
            KeyField::Composite(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Whether this key spans more than one field.
    pub fn is_composite(&self) -> bool {
        matches!(self, KeyField::Composite(_))
    }

    /// Build a key from one element of an array-valued field.
    ///
    /// For a composite key field the element must itself be an array tuple.
    /// Returns `None` if the element does not match the key's arity.
    pub fn key_from_element(&self, element: &Value) -> Option<Key> {
        match (self, element) {
            (KeyField::Composite(names), Value::Array(parts)) if parts.len() == names.len() => {
                Some(Key(parts.clone()))
            }
            (KeyField::Composite(_), _) => None,
            (KeyField::Single(_), value) => Some(Key(vec![value.clone()])),
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyField::Single(name) => write!(f, "{name}"),
            KeyField::Composite(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

impl From<&str> for KeyField {
    fn from(name: &str) -> Self {
        KeyField::Single(name.to_string())
    }
}

impl From<String> for KeyField {
    fn from(name: String) -> Self {
        KeyField::Single(name)
    }
}

impl<const N: usize> From<[&str; N]> for KeyField {
    fn from(names: [&str; N]) -> Self {
        if N == 1 {
            KeyField::Single(names[0].to_string())
        } else {
            KeyField::composite(names)
        }
    }
}

/// A key value: one value per field of the corresponding [`KeyField`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key(Vec<Value>);

impl Key {
    /// A single-value key.
    pub fn single(value: impl Into<Value>) -> Self {
        Key(vec![value.into()])
    }

    /// A composite key from values in field order.
    pub fn composite(values: Vec<Value>) -> Self {
        Key(values)
    }

    /// The component values.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Number of components.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// A key is complete when it has at least one component and none is NULL.
    ///
    /// Only complete keys are ever staged or bound.
    pub fn is_complete(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|v| !v.is_null())
    }

    /// Whether this key contains the given key as an array element.
    ///
    /// Used for array-valued association fields: a single key matches a
    /// scalar element, a composite key matches an array-tuple element.
    pub fn contained_in(&self, array: &[Value]) -> bool {
        array.iter().any(|element| match (self.0.as_slice(), element) {
            ([single], value) if !matches!(value, Value::Array(_)) => {
                cmp_values(single, value) == Ordering::Equal
            }
            (parts, Value::Array(items)) if parts.len() > 1 => {
                cmp_slices(parts, items) == Ordering::Equal
            }
            _ => false,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single}"),
            parts => write!(f, "{}", Value::Array(parts.to_vec())),
        }
    }
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Key(vec![value])
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::single(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::single(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::single(v)
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::single(v)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_slices(&self.0, &other.0)
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            hash_single_value(v, state);
        }
    }
}

fn cmp_slices(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match cmp_values(x, y) {
            Ordering::Equal => {}
            non_eq => return non_eq,
        }
    }
    a.len().cmp(&b.len())
}

/// Total order over values: by type tag first, then by value.
///
/// Doubles use `total_cmp`, JSON documents compare by their serialized text.
fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::BigInt(x), Value::BigInt(y)) | (Value::Timestamp(x), Value::Timestamp(y)) => {
            x.cmp(y)
        }
        (Value::Double(x), Value::Double(y)) => x.total_cmp(y),
        (Value::Decimal(x), Value::Decimal(y)) | (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Uuid(x), Value::Uuid(y)) => x.cmp(y),
        (Value::Json(x), Value::Json(y)) => x.to_string().cmp(&y.to_string()),
        (Value::Array(x), Value::Array(y)) => cmp_slices(x, y),
        _ => a.tag().cmp(&b.tag()),
    }
}

/// Hash a single Value into the hasher, consistently with `cmp_values`.
fn hash_single_value(v: &Value, hasher: &mut impl Hasher) {
    v.tag().hash(hasher);
    match v {
        Value::Null => {}
        Value::Bool(b) => b.hash(hasher),
        Value::BigInt(i) | Value::Timestamp(i) => i.hash(hasher),
        Value::Double(f) => f.to_bits().hash(hasher),
        Value::Decimal(s) | Value::Text(s) => s.hash(hasher),
        Value::Bytes(b) => b.hash(hasher),
        Value::Uuid(u) => u.hash(hasher),
        Value::Json(j) => j.to_string().hash(hasher),
        Value::Array(arr) => {
            arr.len().hash(hasher);
            for item in arr {
                hash_single_value(item, hasher);
            }
        }
    }
}
