//! Bounded previews of CDP remote objects.
//!
//! A console call's arguments arrive as `RemoteObject`s. Values are kept
//! literally when the protocol sends them by value; otherwise a shallow
//! preview is built. Generic objects that carry only an `objectId` can be
//! expanded with one bounded `Runtime.getProperties` round-trip, which is
//! the caller's job; this module only flags the opportunity.

use serde_json::{Map, Value};

/// Hard ceiling on the serialized preview text carried by one event.
pub const PREVIEW_TEXT_CAP: usize = 4096;

/// Cap on properties taken from a `Runtime.getProperties` expansion.
pub const MAX_OWN_PROPERTIES: usize = 50;

/// Outcome of previewing one remote object.
#[derive(Debug, Clone, PartialEq)]
pub enum Preview {
    /// Ready to store as-is.
    Value(Value),
    /// Generic object with an `objectId` and no inline preview; the
    /// caller may expand it with a bounded `Runtime.getProperties`.
    Fetch(String),
}

/// Build a preview from a CDP `RemoteObject` JSON value.
pub fn preview_remote(obj: &Value) -> Preview {
    if let Some(value) = obj.get("value") {
        return Preview::Value(value.clone());
    }
    if let Some(unserializable) = obj.get("unserializableValue").and_then(Value::as_str) {
        return Preview::Value(Value::String(unserializable.to_owned()));
    }
    if let Some(props) = obj
        .get("preview")
        .and_then(|p| p.get("properties"))
        .and_then(Value::as_array)
    {
        let mut map = Map::new();
        for prop in props {
            let Some(name) = prop.get("name").and_then(Value::as_str) else {
                continue;
            };
            let value = prop
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or_default();
            map.insert(name.to_owned(), Value::String(value.to_owned()));
        }
        return Preview::Value(Value::Object(map));
    }
    if obj.get("type").and_then(Value::as_str) == Some("object")
        && let Some(object_id) = obj.get("objectId").and_then(Value::as_str)
    {
        return Preview::Fetch(object_id.to_owned());
    }
    Preview::Value(Value::String(describe(obj)))
}

/// String coercion of a remote object, used to build the event text.
pub fn coerce_text(obj: &Value) -> String {
    match obj.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => {
            if let Some(unserializable) = obj.get("unserializableValue").and_then(Value::as_str) {
                unserializable.to_owned()
            } else {
                describe(obj)
            }
        }
    }
}

/// Fallback rendering: description, then subtype, then type.
fn describe(obj: &Value) -> String {
    obj.get("description")
        .and_then(Value::as_str)
        .or_else(|| obj.get("subtype").and_then(Value::as_str))
        .or_else(|| obj.get("type").and_then(Value::as_str))
        .unwrap_or("undefined")
        .to_owned()
}

/// Enforce `PREVIEW_TEXT_CAP` over the args of one event: once the
/// accumulated string content exceeds the cap, remaining strings are
/// truncated with a `…` marker and deeper values dropped.
pub fn bound_args(args: Vec<Value>) -> Vec<Value> {
    let mut budget = PREVIEW_TEXT_CAP;
    args.into_iter().map(|v| bound_value(v, &mut budget)).collect()
}

fn bound_value(value: Value, budget: &mut usize) -> Value {
    match value {
        Value::String(s) => {
            if s.len() <= *budget {
                *budget -= s.len();
                Value::String(s)
            } else {
                let keep = *budget;
                *budget = 0;
                let mut truncated: String = s.chars().take(keep).collect();
                truncated.push('…');
                Value::String(truncated)
            }
        }
        Value::Array(items) => {
            if *budget == 0 {
                return Value::Array(Vec::new());
            }
            Value::Array(items.into_iter().map(|v| bound_value(v, budget)).collect())
        }
        Value::Object(map) => {
            if *budget == 0 {
                return Value::Object(Map::new());
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, bound_value(v, budget)))
                    .collect(),
            )
        }
        other => other,
    }
}
