//! Lightweight runtime values for constants and the reference engine.
//!
//! The optimizer core never evaluates data; these exist so expression
//! constants have a typed representation and so the local engine can check
//! that rewritten plans produce identical output.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::DataType;

/// A row: positional values.
pub type Tuple = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    CharArray(String),
    ByteArray(Vec<u8>),
    Map(BTreeMap<String, Value>),
    Tuple(Tuple),
    Bag(Vec<Tuple>),
}

impl Value {
    /// `None` for `Null`, which has no type of its own.
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Value::Null => return None,
            Value::Boolean(_) => DataType::Boolean,
            Value::Int(_) => DataType::Int,
            Value::Long(_) => DataType::Long,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::CharArray(_) => DataType::CharArray,
            Value::ByteArray(_) => DataType::ByteArray,
            Value::Map(_) => DataType::Map,
            Value::Tuple(_) => DataType::Tuple,
            Value::Bag(_) => DataType::Bag,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_) => 2,
            Value::ByteArray(_) => 3,
            Value::CharArray(_) => 4,
            Value::Map(_) => 5,
            Value::Tuple(_) => 6,
            Value::Bag(_) => 7,
        }
    }

    /// Total order used by sort and distinct: nulls first, numbers compared by
    /// value across widths, other kinds grouped by type.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::CharArray(a), Value::CharArray(b)) => a.cmp(b),
            (Value::ByteArray(a), Value::ByteArray(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => cmp_tuples(a, b),
            (Value::Bag(a), Value::Bag(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| cmp_tuples(x, y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Value::Map(a), Value::Map(b)) => a
                .iter()
                .zip(b)
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| va.total_cmp(vb)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a.total_cmp(&b),
                    _ => self.type_rank().cmp(&other.type_rank()),
                },
            },
        }
    }
}

pub fn cmp_tuples(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::CharArray(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::CharArray(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_widths() {
        assert_eq!(Value::Int(3).total_cmp(&Value::Long(3)), Ordering::Equal);
        assert_eq!(Value::Int(2).total_cmp(&Value::Double(2.5)), Ordering::Less);
        assert_eq!(Value::Null.total_cmp(&Value::Int(0)), Ordering::Less);
    }

    #[test]
    fn tuples_compare_lexicographically() {
        let a = vec![Value::from(1), Value::from("b")];
        let b = vec![Value::from(1), Value::from("c")];
        assert_eq!(cmp_tuples(&a, &b), Ordering::Less);
        assert_eq!(cmp_tuples(&a, &a[..1]), Ordering::Greater);
    }

    #[test]
    fn null_has_no_type() {
        assert_eq!(Value::Null.data_type(), None);
        assert_eq!(Value::from("x").data_type(), Some(DataType::CharArray));
    }
}
