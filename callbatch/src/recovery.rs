//! Failure handling for batch rounds.
//!
//! A failed round never loses a call: the snapshot goes back into the
//! ledger first. Then the failure is classified:
//!
//! | Failure                                   | Class     | Action                                 |
//! |-------------------------------------------|-----------|----------------------------------------|
//! | status 404                                | critical  | broken, key dropped, full reset        |
//! | status 500                                | critical  | broken, full reset                     |
//! | timeout, other status, malformed response | transient | retry after `min(max_retry, poll rate)`|

use std::time::Duration;

use crate::config::ClientConfig;
use crate::connection::ConnectionState;
use crate::error::TransportError;
use crate::ledger::{RequestLedger, RoundSnapshot};

/// Severity of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry automatically.
    Transient,
    /// Terminate the connection.
    Critical,
}

impl FailureClass {
    /// Classify a transport failure.
    pub fn of(error: &TransportError) -> Self {
        if error.is_critical() {
            FailureClass::Critical
        } else {
            FailureClass::Transient
        }
    }
}

/// What the scheduler must do after a failed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Try again after the delay; the ledger is intact.
    Retry(Duration),
    /// Reject everything and stop polling until a new key is set.
    Reset,
}

/// Roll back the round, record the error, and decide how to recover.
pub fn recover(
    config: &ClientConfig,
    connection: &mut ConnectionState,
    ledger: &mut RequestLedger,
    last_error: &mut Option<String>,
    snapshot: RoundSnapshot,
    error: &TransportError,
) -> Recovery {
    ledger.restore(snapshot);
    *last_error = Some(error.to_string());

    match FailureClass::of(error) {
        FailureClass::Critical => {
            let not_found = error.status() == Some(404);
            connection.mark_broken(not_found);
            if not_found {
                if let Some(message) = error.server_message() {
                    *last_error = Some(message);
                }
            }
            tracing::warn!("batch round failed critically: {}", error);
            Recovery::Reset
        }
        FailureClass::Transient => {
            let delay = config.retry_delay(connection.poll_rate());
            tracing::warn!("batch round failed, retrying in {:?}: {}", delay, error);
            Recovery::Retry(delay)
        }
    }
}
