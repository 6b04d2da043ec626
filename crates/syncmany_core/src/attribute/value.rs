//! Value types flowing through virtual attributes and join-table rows.

use rusqlite::types::Value;
use std::collections::BTreeMap;

/// Primary key of a related record, as stored in a join table.
pub type RelatedId = i64;

/// Resolved extra columns stamped onto each join-table row.
pub type PivotMap = BTreeMap<String, PivotValue>;

/// Scalar stored in one pivot column.
#[derive(Debug, Clone, PartialEq)]
pub enum PivotValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl PivotValue {
    /// Converts a JSON scalar into a pivot value.
    ///
    /// Returns `None` for arrays, objects and numbers that fit neither `i64`
    /// nor `f64`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(flag) => Some(Self::Integer(i64::from(*flag))),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(Self::Integer)
                .or_else(|| number.as_f64().map(Self::Real)),
            serde_json::Value::String(text) => Some(Self::Text(text.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

impl From<&PivotValue> for Value {
    fn from(value: &PivotValue) -> Self {
        match value {
            PivotValue::Null => Value::Null,
            PivotValue::Integer(v) => Value::Integer(*v),
            PivotValue::Real(v) => Value::Real(*v),
            PivotValue::Text(v) => Value::Text(v.clone()),
        }
    }
}

impl From<i64> for PivotValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for PivotValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for PivotValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for PivotValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PivotValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<PivotValue>> From<Option<T>> for PivotValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Raw value assigned to a virtual attribute before normalization.
///
/// Assignment accepts a scalar, a list, or nothing; all three collapse into
/// an ordered id list via [`AttributeValue::into_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Null,
    One(RelatedId),
    Many(Vec<RelatedId>),
}

impl AttributeValue {
    /// Wraps the value into an ordered list: `Null` is empty, a scalar
    /// becomes a single-element list, a list is kept as given.
    pub fn into_ids(self) -> Vec<RelatedId> {
        match self {
            Self::Null => Vec::new(),
            Self::One(id) => vec![id],
            Self::Many(ids) => ids,
        }
    }

    /// Parses a JSON assignment: `null`, an integer, or an array of integers.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Number(number) => number.as_i64().map(Self::One),
            serde_json::Value::Array(items) => items
                .iter()
                .map(serde_json::Value::as_i64)
                .collect::<Option<Vec<_>>>()
                .map(Self::Many),
            _ => None,
        }
    }
}

impl From<RelatedId> for AttributeValue {
    fn from(value: RelatedId) -> Self {
        Self::One(value)
    }
}

impl From<Vec<RelatedId>> for AttributeValue {
    fn from(value: Vec<RelatedId>) -> Self {
        Self::Many(value)
    }
}

impl From<&[RelatedId]> for AttributeValue {
    fn from(value: &[RelatedId]) -> Self {
        Self::Many(value.to_vec())
    }
}

impl<const N: usize> From<[RelatedId; N]> for AttributeValue {
    fn from(value: [RelatedId; N]) -> Self {
        Self::Many(value.to_vec())
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
