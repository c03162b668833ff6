//! Conversion between snippet values and JSON.

use serde_json::{Map, Number, Value as Json};

use crate::error::{ExcKind, Exception, Result};
use crate::value::{Dict, MAX_NESTING, Value, float_repr};

/// Convert a value to JSON, the only form that leaves the sandbox.
///
/// Tuples become arrays. Dictionary keys may be strings, numbers, booleans
/// or `None` and are stringified the way Python's `json.dumps` does.
pub fn to_json(value: &Value) -> Result<Json> {
    convert(value, 0)
}

fn convert(value: &Value, depth: usize) -> Result<Json> {
    if depth > MAX_NESTING {
        return Err(serialization("circular reference detected"));
    }
    Ok(match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Json::Number(Number::from_f64(*f).ok_or_else(|| {
            serialization(format!(
                "out of range float values are not JSON compliant: {}",
                float_repr(*f)
            ))
        })?),
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(|v| convert(v, depth + 1))
                .collect::<Result<_>>()?,
        ),
        Value::Tuple(items) => Json::Array(
            items
                .iter()
                .map(|v| convert(v, depth + 1))
                .collect::<Result<_>>()?,
        ),
        Value::Dict(dict) => {
            let mut map = Map::new();
            for (k, v) in dict.borrow().iter() {
                map.insert(key_string(k)?, convert(v, depth + 1)?);
            }
            Json::Object(map)
        }
        other => {
            return Err(serialization(format!(
                "object of type {} is not JSON serializable",
                other.type_name()
            )));
        }
    })
}

fn key_string(key: &Value) -> Result<String> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) if f.is_finite() => Ok(float_repr(*f)),
        Value::Bool(b) => Ok(b.to_string()),
        Value::None => Ok("null".into()),
        other => Err(serialization(format!(
            "keys must be str, int, float, bool or None, not {}",
            other.type_name()
        ))),
    }
}

fn serialization(message: impl Into<String>) -> Exception {
    Exception::new(ExcKind::StateSerializationError, message)
}

/// Build a snippet value from JSON.
pub fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s.as_str()),
        Json::Array(items) => Value::list(items.iter().map(from_json).collect()),
        Json::Object(map) => {
            let mut dict = Dict::new();
            for (k, v) in map {
                // String keys always hash.
                let _ = dict.insert(Value::str(k.as_str()), from_json(v));
            }
            Value::dict(dict)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_nested_structures() {
        let value = from_json(&json!({"vessels": [{"length": 45.0}, {"length": 120}], "ok": true}));
        assert_eq!(
            to_json(&value).unwrap(),
            json!({"vessels": [{"length": 45.0}, {"length": 120}], "ok": true})
        );
    }

    #[test]
    fn tuples_become_arrays() {
        let value = Value::tuple(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(to_json(&value).unwrap(), json!([1, "a"]));
    }

    #[test]
    fn non_string_keys_are_stringified() {
        let mut d = Dict::new();
        d.insert(Value::Int(1), Value::None).unwrap();
        d.insert(Value::Bool(true), Value::None).unwrap();
        d.insert(Value::None, Value::Int(0)).unwrap();
        // `True` collides with `1`.
        assert_eq!(to_json(&Value::dict(d)).unwrap(), json!({"1": null, "null": 0}));
    }

    #[test]
    fn rejects_functions_and_nan() {
        let err = to_json(&Value::Builtin(crate::value::Builtin::Len)).unwrap_err();
        assert_eq!(err.kind, ExcKind::StateSerializationError);
        let err = to_json(&Value::Float(f64::NAN)).unwrap_err();
        assert!(err.message.contains("nan"));
    }

    #[test]
    fn rejects_cycles() {
        let list = Value::list(vec![]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        let err = to_json(&list).unwrap_err();
        assert_eq!(err.kind, ExcKind::StateSerializationError);
        // Break the cycle so the test does not leak.
        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }
}
