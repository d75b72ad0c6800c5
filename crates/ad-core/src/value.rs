//! Attribute values and keyword payloads
//!
//! Values are opaque to the simulated runtime, so they are carried as
//! `serde_json::Value`. Falsiness follows the Python host the automations
//! are written against.

use serde_json::{Map, Value};

use crate::ATTR_STATE;

/// Attribute mapping of a single entity (attribute name -> value)
pub type Attributes = Map<String, Value>;

/// Keyword payload passed back verbatim to callbacks
pub type Kwargs = Map<String, Value>;

/// The mapping an entity has before anything was written to it
pub fn default_attributes() -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(ATTR_STATE.to_string(), Value::Null);
    attributes
}

/// Python truthiness of a value
///
/// `null`, `false`, zero, and empty strings, arrays and objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// `value or default`: keep a truthy value, otherwise fall back
pub fn or_default(value: Value, default: &Value) -> Value {
    if is_truthy(&value) {
        value
    } else {
        default.clone()
    }
}
