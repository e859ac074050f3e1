//! Record builders from JSON literals.

use weave_codec::Value;
use weave_core::Record;

/// Converts a JSON value into a [`Value`].
///
/// Integral numbers become [`Value::Integer`], all others [`Value::Float`].
pub fn value_from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(value_from_json).collect())
        }
        serde_json::Value::Object(map) => {
            Value::object(map.into_iter().map(|(k, v)| (k, value_from_json(v))))
        }
    }
}

/// Builds a record from a JSON object. An `id` member becomes the record id.
///
/// # Panics
///
/// Panics if `json` is not an object or its `id` is not an integer.
pub fn record_from_json(json: serde_json::Value) -> Record {
    Record::from_value(value_from_json(json), "id").expect("JSON record must be an object")
}

/// Builds a [`Record`] from a JSON object literal.
///
/// ```rust,ignore
/// let ada = record!({"id": 1, "name": "Ada", "tags": ["math"]});
/// ```
#[macro_export]
macro_rules! record {
    ($($json:tt)+) => {
        $crate::record_from_json($crate::serde_json::json!($($json)+))
    };
}
