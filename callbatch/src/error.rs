//! Error types for the batch client.
//!
//! Errors travel on two channels only:
//! - connection-level failures are recorded on the client and returned
//!   from `set_key` ([`ClientError`], [`TransportError`]);
//! - per-call failures settle that call's future ([`CallError`]).

use serde_json::Value;
use thiserror::Error;

/// Failures of one HTTP exchange with the batch endpoint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The request did not complete before its timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success HTTP status.
    #[error("server responded with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Decoded response body, `Value::Null` when empty.
        data: Value,
    },

    /// The request could not be delivered.
    #[error("network error: {message}")]
    Network {
        /// Details about the network failure.
        message: String,
    },

    /// The response envelope carried `ok: false`.
    #[error("server rejected the request: {message}")]
    Rejected {
        /// Server-supplied message, or a generic one.
        message: String,
    },

    /// The response matched neither the wrapped nor the direct envelope.
    #[error("unrecognized response format")]
    UnrecognizedResponse,

    /// The request body could not be encoded.
    #[error("failed to encode request: {message}")]
    Encode {
        /// Details about the encoding failure.
        message: String,
    },
}

impl TransportError {
    /// HTTP status of the failure, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this failure terminates the connection instead of being retried.
    ///
    /// Only 404 (unknown key) and 500 are critical.
    pub fn is_critical(&self) -> bool {
        matches!(self.status(), Some(404) | Some(500))
    }

    /// The `message` field of the response body, when present.
    pub fn server_message(&self) -> Option<String> {
        match self {
            TransportError::Status { data, .. } => data
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Encode {
            message: err.to_string(),
        }
    }
}

/// Failure delivered to the caller of a single submitted call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The channel was reset (key change or critical failure) before the
    /// call produced a result.
    #[error("connection reset")]
    ConnectionReset,

    /// The server refused to create the call.
    #[error("enqueue failed (status: {status})")]
    EnqueueFailed {
        /// Status the server reported for the call.
        status: String,
    },

    /// The server acknowledged the round but said nothing about this call.
    #[error("enqueue failed: call was not acknowledged by the server")]
    Unacknowledged,

    /// The remote method ran and reported an error.
    #[error("{message}")]
    Execution {
        /// Server-provided message, or "execution failed".
        message: String,
    },

    /// The fallback path failed.
    #[error("fallback call failed: {message}")]
    Fallback {
        /// Details from the fallback implementation.
        message: String,
    },
}

impl CallError {
    /// Convenience constructor for fallback implementations.
    pub fn fallback(message: impl Into<String>) -> Self {
        CallError::Fallback {
            message: message.into(),
        }
    }
}

/// Errors returned by `set_key`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The server does not know the key; prompt for a new one.
    #[error("key not found: {message}")]
    KeyNotFound {
        /// Server-supplied message.
        message: String,
    },

    /// Initialization failed for another reason; the key stays set.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Stable machine-readable code for UI branching.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::KeyNotFound { .. } => "KEY_NOT_FOUND",
            ClientError::Transport(_) => "TRANSPORT",
        }
    }
}
