//! Plain JSON encoding of records: one array per record, one record per line.

use std::collections::BTreeMap;

use flowplan_core::types::{Tuple, Value};
use serde_json::{Map, Number, Value as Json};

use crate::engine::ExecError;

pub fn value_to_json(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Long(l) => Json::from(*l),
        Value::Float(f) => Number::from_f64(f64::from(*f)).map_or(Json::Null, Json::Number),
        Value::Double(d) => Number::from_f64(*d).map_or(Json::Null, Json::Number),
        Value::CharArray(s) => Json::String(s.clone()),
        Value::ByteArray(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::Map(m) => Json::Object(
            m.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Tuple(t) => record_to_json(t),
        Value::Bag(b) => Json::Array(b.iter().map(|t| record_to_json(t)).collect()),
    }
}

pub fn record_to_json(record: &[Value]) -> Json {
    Json::Array(record.iter().map(value_to_json).collect())
}

/// Numbers become `int` when they fit, then `long`, then `double`; objects
/// become maps and arrays tuples.
pub fn value_from_json(j: &Json) -> Value {
    match j {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => i32::try_from(i).map_or(Value::Long(i), Value::Int),
            None => n.as_f64().map_or(Value::Null, Value::Double),
        },
        Json::String(s) => Value::CharArray(s.clone()),
        Json::Array(items) => Value::Tuple(items.iter().map(value_from_json).collect()),
        Json::Object(m) => Value::Map(
            m.iter()
                .map(|(k, v)| (k.clone(), value_from_json(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

pub fn to_json_lines(records: &[Tuple]) -> Result<String, ExecError> {
    let mut out = String::new();
    for r in records {
        out.push_str(&serde_json::to_string(&record_to_json(r))?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse JSON lines; each non-blank line must be an array.
pub fn from_json_lines(text: &str) -> Result<Vec<Tuple>, ExecError> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| match serde_json::from_str::<Json>(line)? {
            Json::Array(items) => Ok(items.iter().map(value_from_json).collect()),
            _ => Err(ExecError::Invalid(format!(
                "record {} is not a JSON array",
                i + 1
            ))),
        })
        .collect()
}
