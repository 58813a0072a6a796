//! Applying a successful batch response to the ledger.

use crate::connection::ConnectionState;
use crate::error::CallError;
use crate::ledger::{RequestLedger, RoundSnapshot};
use crate::result::parse_call_result;
use crate::wire::BatchPayload;

/// What a reconciliation did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Calls resolved with a result.
    pub resolved: usize,
    /// Calls rejected with a remote execution error.
    pub failed: usize,
    /// Calls promoted from the snapshot into `active`.
    pub promoted: usize,
    /// Calls the server refused to create.
    pub refused: usize,
    /// Snapshot calls the server did not mention at all.
    pub unacknowledged: usize,
    /// Results for keys that were not active.
    pub ignored: usize,
}

/// Apply `payload` to the ledger.
///
/// Results are matched against `active`; creation acknowledgments are
/// matched against the round's snapshot, since the live `pending` may have
/// received newer calls in the meantime. Every request in the snapshot
/// leaves this function either active or settled.
pub fn reconcile(
    connection: &mut ConnectionState,
    ledger: &mut RequestLedger,
    payload: BatchPayload,
    mut snapshot: RoundSnapshot,
) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();

    if let Some(raw) = payload.interval_ms {
        connection.adopt_interval(raw);
    }

    for result in payload.results {
        if !result.is_done() {
            continue;
        }
        let Some(request) = ledger.complete(&result.request_key) else {
            tracing::debug!("ignoring result for inactive key {}", result.request_key);
            summary.ignored += 1;
            continue;
        };
        if result.is_error {
            let message = result.error_message();
            tracing::debug!("call {} failed remotely: {}", request.key, message);
            request.reject(CallError::Execution { message });
            summary.failed += 1;
        } else {
            let value = parse_call_result(result.result.unwrap_or_default());
            request.resolve(value);
            summary.resolved += 1;
        }
    }

    for created in payload.created {
        let Some(request) = snapshot.pending.remove(created.request_key.as_str()) else {
            tracing::debug!(
                "ignoring creation ack for unknown key {}",
                created.request_key
            );
            continue;
        };
        if created.is_accepted() {
            ledger.activate(request);
            summary.promoted += 1;
        } else {
            tracing::debug!(
                "server refused call {} with status {}",
                request.key,
                created.status
            );
            request.reject(CallError::EnqueueFailed {
                status: created.status,
            });
            summary.refused += 1;
        }
    }

    if !snapshot.pending.is_empty() {
        tracing::warn!(
            "{} calls were not acknowledged by the server",
            snapshot.pending.len()
        );
        summary.unacknowledged = snapshot.reject_all(CallError::Unacknowledged);
    }

    if let Some(count) = payload.cleanup_count {
        tracing::debug!("server pruned {} completed calls", count);
    }

    summary
}
