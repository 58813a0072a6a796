//! Normalization of remote call results.
//!
//! The remote side wraps results inconsistently: sometimes a JSON-encoded
//! string around `{"result": ...}`, sometimes a bare encoded value, sometimes
//! a `{method, result}` object, sometimes a primitive. One rule is applied to
//! every successful result:
//!
//! - a string is decoded as JSON; a decoded object with a `result` field is
//!   unwrapped, any other decoded value is returned as-is, and a string that
//!   does not decode is returned unchanged;
//! - an object with both `method` and `result` fields yields `result`;
//! - anything else passes through.

use serde_json::Value;

/// Normalize a raw result value into what the caller receives.
pub fn parse_call_result(raw: Value) -> Value {
    match raw {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(mut map)) => match map.remove("result") {
                Some(inner) => inner,
                None => Value::Object(map),
            },
            Ok(decoded) => decoded,
            Err(_) => Value::String(text),
        },
        Value::Object(mut map) if map.contains_key("method") && map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}
