//! JSON wire format for the batch endpoint.
//!
//! Two message kinds share one endpoint:
//!
//! ```text
//! init:   {"key": K, "init": true}
//!      -> {"ok": .., "data": {"intervalMs": ..}} | {"intervalMs": ..}
//!
//! batch:  {"key": K, "completedKeys": [..], "statusRequestKeys": [..],
//!          "calls": [{"requestKey", "method", "params"}]}
//!      -> {"ok": .., "data": {..}} | {"intervalMs", "results", "created", "cleanupCount"}
//! ```
//!
//! Responses arrive either wrapped in an `{ok, data}` envelope or with the
//! payload fields at the top level. [`Envelope`] names both branches
//! explicitly; anything matching neither is rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;

/// Initialization message sent by `set_key`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitRequest {
    /// Channel key being validated.
    pub key: String,
    /// Always `true`.
    pub init: bool,
}

impl InitRequest {
    /// Build the init message for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            init: true,
        }
    }
}

/// One logical call inside a batch message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCall {
    /// Client-generated key identifying the call.
    pub request_key: String,
    /// Remote method name.
    pub method: String,
    /// Method parameters.
    pub params: Value,
}

/// Batch message carrying new calls, status polls, and cleanup acks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Channel key.
    pub key: String,
    /// Keys whose results were delivered; the server may forget them.
    pub completed_keys: Vec<String>,
    /// Keys of active calls the client is waiting on.
    pub status_request_keys: Vec<String>,
    /// Calls submitted since the previous round.
    pub calls: Vec<WireCall>,
}

/// Status reported for a finished call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResult {
    /// Key of the call.
    pub request_key: String,
    /// `"done"` when the call finished; other values are ignored.
    pub status: String,
    /// Raw result payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Whether the remote method failed. Any truthy JSON value counts.
    #[serde(default, deserialize_with = "truthy")]
    pub is_error: bool,
    /// Error detail supplied by the server; a string or a structured object.
    #[serde(default)]
    pub error: Option<Value>,
    /// Alternative spelling of `error` used by some endpoints.
    #[serde(default)]
    pub message: Option<Value>,
}

impl WireResult {
    /// Whether the server considers the call finished.
    pub fn is_done(&self) -> bool {
        self.status == "done"
    }

    /// Message to reject the call with when `is_error` is set.
    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .and_then(describe_error)
            .or_else(|| self.message.as_ref().and_then(describe_error))
            .or_else(|| match &self.result {
                Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "execution failed".to_string())
    }
}

/// Render a server error detail as text.
///
/// Objects contribute their string `message` (or `error_description`) when
/// present and are otherwise rendered as compact JSON.
fn describe_error(detail: &Value) -> Option<String> {
    match detail {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .or_else(|| map.get("error_description"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| detail.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

fn truthy<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => false,
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

/// Creation acknowledgment for a call sent in the previous round.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCreated {
    /// Key of the call.
    pub request_key: String,
    /// `"pending"` when the server accepted the call.
    pub status: String,
}

impl WireCreated {
    /// Whether the server accepted the call.
    pub fn is_accepted(&self) -> bool {
        self.status == "pending"
    }
}

/// Normalized content of a batch or init response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPayload {
    /// Suggested poll interval in raw milliseconds (not yet clamped).
    pub interval_ms: Option<f64>,
    /// Finished-call reports, in server order.
    pub results: Vec<WireResult>,
    /// Creation acknowledgments, in server order.
    pub created: Vec<WireCreated>,
    /// Number of completed keys the server pruned.
    pub cleanup_count: Option<u64>,
}

/// The two accepted response shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `{ok, data}`: only a literal `ok: false` is a hard failure.
    Wrapped {
        /// Server success flag; `false` only for a literal `false`.
        ok: bool,
        /// Payload object.
        data: Value,
    },
    /// Payload fields directly at the top level.
    Direct(Map<String, Value>),
}

const DIRECT_FIELDS: [&str; 4] = ["intervalMs", "results", "created", "cleanupCount"];

impl Envelope {
    /// Classify a decoded response body.
    pub fn classify(body: Value) -> Result<Self, TransportError> {
        let Value::Object(mut map) = body else {
            return Err(TransportError::UnrecognizedResponse);
        };

        if map.contains_key("ok") && map.contains_key("data") {
            let ok = map.get("ok") != Some(&Value::Bool(false));
            let data = map.remove("data").unwrap_or(Value::Null);
            return Ok(Envelope::Wrapped { ok, data });
        }

        if DIRECT_FIELDS.iter().any(|field| map.contains_key(*field)) {
            return Ok(Envelope::Direct(map));
        }

        Err(TransportError::UnrecognizedResponse)
    }

    /// Extract the payload, failing on `ok: false`.
    pub fn into_payload(self) -> Result<BatchPayload, TransportError> {
        match self {
            Envelope::Wrapped { ok: false, data } => Err(TransportError::Rejected {
                message: rejection_message(&data),
            }),
            Envelope::Wrapped { ok: true, data } => match data {
                Value::Object(map) => payload_from_map(map),
                Value::Null => Ok(BatchPayload::default()),
                _ => Err(TransportError::UnrecognizedResponse),
            },
            Envelope::Direct(map) => payload_from_map(map),
        }
    }
}

/// Parse a batch response body.
pub fn parse_batch_response(body: Value) -> Result<BatchPayload, TransportError> {
    Envelope::classify(body)?.into_payload()
}

/// Parse an init response body.
///
/// Init responses are often bare acknowledgments, so only an explicit
/// `ok: false` fails; `intervalMs` is read from `data` or the top level.
pub fn parse_init_response(body: &Value) -> Result<Option<f64>, TransportError> {
    if body.get("ok").and_then(Value::as_bool) == Some(false) {
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        return Err(TransportError::Rejected {
            message: rejection_message(&data),
        });
    }
    let interval = body
        .get("data")
        .and_then(|data| data.get("intervalMs"))
        .or_else(|| body.get("intervalMs"))
        .and_then(Value::as_f64);
    Ok(interval)
}

fn payload_from_map(mut map: Map<String, Value>) -> Result<BatchPayload, TransportError> {
    let interval_ms = map.get("intervalMs").and_then(Value::as_f64);
    let cleanup_count = map.get("cleanupCount").and_then(Value::as_u64);
    let results = take_list::<WireResult>(&mut map, "results")?;
    let created = take_list::<WireCreated>(&mut map, "created")?;
    Ok(BatchPayload {
        interval_ms,
        results,
        created,
        cleanup_count,
    })
}

/// Decode a list field item by item.
///
/// A field that is not a list makes the whole response unrecognized; a
/// single malformed item is logged and skipped so its siblings still apply.
fn take_list<T: serde::de::DeserializeOwned>(
    map: &mut Map<String, Value>,
    field: &str,
) -> Result<Vec<T>, TransportError> {
    let items = match map.remove(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            tracing::warn!("'{}' in batch response is not a list: {}", field, other);
            return Err(TransportError::UnrecognizedResponse);
        }
    };

    let mut decoded = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(value) => decoded.push(value),
            Err(e) => tracing::warn!("skipping malformed '{}' item {}: {}", field, item, e),
        }
    }
    Ok(decoded)
}

fn rejection_message(data: &Value) -> String {
    data.get("message")
        .or_else(|| data.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("server reported failure")
        .to_string()
}
