//! Request ledger: the three queues a call moves through.
//!
//! ```text
//!   submit ──► pending ──(created: pending)──► active ──(result: done)──► completed
//!                 │                                                         │
//!                 └──(created: other / missing)──► rejected                 └─► dropped after
//!                                                                              one more round
//! ```
//!
//! A key lives in at most one of `pending` and `active`. `completed` holds
//! bare keys only; the call has already been settled and the key is kept
//! just long enough to tell the server it may forget its copy.
//!
//! Each [`CallRequest`] owns a [`CallPromise`]; the submitter holds the
//! matching [`CallFuture`]. Fulfilling the promise consumes it, so a call
//! settles at most once. Dropping it unfulfilled settles the future with
//! [`CallError::ConnectionReset`].

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::CallError;
use crate::wire::WireCall;

/// Outcome of one call.
pub type CallResult = Result<Value, CallError>;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a submitted call.
///
/// Rendered as `{sequence:016x}-{nonce:08x}`. The sequence is process-wide
/// and strictly increasing, so lexical order is submission order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    /// The key as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RequestKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Generates request keys for one client.
#[derive(Debug, Clone)]
pub struct RequestKeyGenerator {
    nonce: u32,
}

impl RequestKeyGenerator {
    /// Create a generator with a per-client nonce.
    pub fn new(nonce: u32) -> Self {
        Self { nonce }
    }

    /// Next key; never repeats within the process.
    pub fn next_key(&self) -> RequestKey {
        let sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        RequestKey(format!("{:016x}-{:08x}", sequence, self.nonce))
    }
}

/// A remote method invocation as submitted by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Remote method name.
    pub method: String,
    /// Parameters; an array or an object. `null` is sent as `[]`.
    pub params: Value,
}

impl MethodCall {
    /// Create a call.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Null => Value::Array(Vec::new()),
            other => other,
        };
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Sending half of a call's completion handle.
#[derive(Debug)]
pub struct CallPromise {
    sender: oneshot::Sender<CallResult>,
}

impl CallPromise {
    /// Create a linked promise/future pair.
    pub fn pair() -> (CallPromise, CallFuture) {
        let (sender, receiver) = oneshot::channel();
        (
            CallPromise { sender },
            CallFuture {
                inner: CallFutureInner::Queued(receiver),
            },
        )
    }

    /// Settle the call with a result.
    pub fn resolve(self, value: Value) {
        self.settle(Ok(value));
    }

    /// Settle the call with an error.
    pub fn reject(self, error: CallError) {
        self.settle(Err(error));
    }

    fn settle(self, outcome: CallResult) {
        // The caller may have dropped its future; that is not an error.
        if self.sender.send(outcome).is_err() {
            tracing::trace!("call settled after its future was dropped");
        }
    }
}

enum CallFutureInner {
    Queued(oneshot::Receiver<CallResult>),
    Fallback(Pin<Box<dyn Future<Output = CallResult>>>),
}

/// Receiving half of a call's completion handle.
///
/// Dropping it abandons interest in the result; the call itself still runs
/// to completion against the ledger.
#[must_use = "a CallFuture does nothing unless awaited"]
pub struct CallFuture {
    inner: CallFutureInner,
}

impl CallFuture {
    /// Wrap a fallback future so both paths share one return type.
    pub fn from_fallback<F>(future: F) -> Self
    where
        F: Future<Output = CallResult> + 'static,
    {
        Self {
            inner: CallFutureInner::Fallback(Box::pin(future)),
        }
    }

    /// Whether the call went through the fallback path.
    pub fn is_fallback(&self) -> bool {
        matches!(self.inner, CallFutureInner::Fallback(_))
    }
}

impl fmt::Debug for CallFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFuture")
            .field("fallback", &self.is_fallback())
            .finish()
    }
}

impl Future for CallFuture {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            CallFutureInner::Queued(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|outcome| outcome.unwrap_or(Err(CallError::ConnectionReset))),
            CallFutureInner::Fallback(future) => future.as_mut().poll(cx),
        }
    }
}

/// A call owned by the ledger until it settles.
#[derive(Debug)]
pub struct CallRequest {
    /// Key identifying the call.
    pub key: RequestKey,
    /// What to invoke remotely.
    pub call: MethodCall,
    /// Provider time at submission.
    pub created_at: Duration,
    promise: CallPromise,
}

impl CallRequest {
    /// Create a request and the future its submitter awaits.
    pub fn new(key: RequestKey, call: MethodCall, created_at: Duration) -> (Self, CallFuture) {
        let (promise, future) = CallPromise::pair();
        (
            Self {
                key,
                call,
                created_at,
                promise,
            },
            future,
        )
    }

    /// Settle with a result, consuming the request.
    pub fn resolve(self, value: Value) {
        self.promise.resolve(value);
    }

    /// Settle with an error, consuming the request.
    pub fn reject(self, error: CallError) {
        self.promise.reject(error);
    }

    fn to_wire(&self) -> WireCall {
        WireCall {
            request_key: self.key.to_string(),
            method: self.call.method.clone(),
            params: self.call.params.clone(),
        }
    }
}

/// Queue sizes, for observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueSizes {
    /// Calls not yet acknowledged by the server.
    pub pending: usize,
    /// Calls the server is executing.
    pub active: usize,
    /// Settled keys awaiting server-side cleanup.
    pub completed: usize,
}

/// What one batch round took out of the ledger.
///
/// Needed both to map `created` acknowledgments back to requests and to
/// restore the ledger when the round fails.
#[derive(Debug, Default)]
pub struct RoundSnapshot {
    /// Requests sent as new calls.
    pub pending: BTreeMap<RequestKey, CallRequest>,
    /// Keys sent as completed.
    pub completed: BTreeSet<RequestKey>,
}

impl RoundSnapshot {
    /// Wire representation of the snapshot's calls, in submission order.
    pub fn wire_calls(&self) -> Vec<WireCall> {
        self.pending.values().map(CallRequest::to_wire).collect()
    }

    /// Wire representation of the snapshot's completed keys.
    pub fn completed_keys(&self) -> Vec<String> {
        self.completed.iter().map(ToString::to_string).collect()
    }

    /// Reject every request in the snapshot.
    pub fn reject_all(self, error: CallError) -> usize {
        let count = self.pending.len();
        for (_, request) in self.pending {
            request.reject(error.clone());
        }
        count
    }
}

/// The pending, active, and completed queues.
#[derive(Debug, Default)]
pub struct RequestLedger {
    pending: BTreeMap<RequestKey, CallRequest>,
    active: BTreeMap<RequestKey, CallRequest>,
    completed: BTreeSet<RequestKey>,
}

impl RequestLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly submitted request to `pending`.
    pub fn enqueue(&mut self, request: CallRequest) {
        debug_assert!(!self.active.contains_key(&request.key));
        self.pending.insert(request.key.clone(), request);
    }

    /// Whether all three queues are empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty() && self.completed.is_empty()
    }

    /// Current queue sizes.
    pub fn sizes(&self) -> QueueSizes {
        QueueSizes {
            pending: self.pending.len(),
            active: self.active.len(),
            completed: self.completed.len(),
        }
    }

    /// Keys of active calls, for status polling.
    pub fn active_keys(&self) -> Vec<String> {
        self.active.keys().map(ToString::to_string).collect()
    }

    /// Move `pending` and `completed` out for a round.
    ///
    /// The live containers are left empty, so calls submitted while the
    /// round is in flight land in a fresh `pending`.
    pub fn take_round(&mut self) -> RoundSnapshot {
        RoundSnapshot {
            pending: std::mem::take(&mut self.pending),
            completed: std::mem::take(&mut self.completed),
        }
    }

    /// Put a failed round's snapshot back, merging with newer submissions.
    pub fn restore(&mut self, snapshot: RoundSnapshot) {
        self.pending.extend(snapshot.pending);
        self.completed.extend(snapshot.completed);
    }

    /// Promote a created call into `active`.
    pub fn activate(&mut self, request: CallRequest) {
        self.active.insert(request.key.clone(), request);
    }

    /// Remove a finished call from `active` and remember its key for cleanup.
    ///
    /// Returns `None` for keys that are not active (stray or repeated results).
    pub fn complete(&mut self, key: &str) -> Option<CallRequest> {
        let request = self.active.remove(key)?;
        self.completed.insert(request.key.clone());
        Some(request)
    }

    /// Remove every live request and clear all queues.
    pub fn drain(&mut self) -> Vec<CallRequest> {
        self.completed.clear();
        let pending = std::mem::take(&mut self.pending);
        let active = std::mem::take(&mut self.active);
        pending.into_values().chain(active.into_values()).collect()
    }
}
