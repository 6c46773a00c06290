//! Classification of dynamic values.
use crate::value::Value;

pub fn is_callable(value: &Value) -> bool {
    matches!(value, Value::Function(_))
}

/// Object-like: not null, not an array, not a function, not a primitive.
pub fn is_plain_object(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Deferred(_) | Value::Error(_))
}

/// An object-like value exposing a callable `then`.
pub fn is_thenable(value: &Value) -> bool {
    if !is_plain_object(value) {
        return false;
    }
    match value {
        Value::Deferred(_) => true,
        other => other.get("then").is_some_and(is_callable),
    }
}
