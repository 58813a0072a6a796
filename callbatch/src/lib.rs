//! # callbatch
//!
//! Batched remote-call client: many independent callers, one polling
//! channel to a remote batch endpoint.
//!
//! Each call moves through three stages:
//!
//! ```text
//! submitted (pending) ──► acknowledged (active) ──► completed
//! ```
//!
//! Every round sends new calls, polls the status of active ones, and
//! acknowledges completed ones so the server can forget them. Transient
//! transport failures roll the round back and retry; critical ones (404,
//! 500) reset the channel. The server can steer the poll interval, which is
//! kept within 500 ms – 10 s.
//!
//! ## Crate layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ BatchClient (client)      set_key · submit_or_fallback · state│
//! ├──────────────────────────┬───────────────────────────────────┤
//! │ scheduler                │ notifier                          │
//! │  single-flight worker    │  listeners + watch channel        │
//! ├──────────┬───────────────┼──────────────┬────────────────────┤
//! │ ledger   │ reconciler    │ recovery     │ connection         │
//! ├──────────┴───────────────┴──────────────┴────────────────────┤
//! │ transport (HttpTransport seam, BatchTransport) · wire · result│
//! ├──────────────────────────────────────────────────────────────┤
//! │ providers: Time, Task, Random                                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use callbatch::{BatchClient, ClientConfig, HyperTransport, MethodCall, TokioProviders};
//! use serde_json::json;
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let client = BatchClient::new(
//!         TokioProviders::new(),
//!         HyperTransport::new(),
//!         ClientConfig::new("http://127.0.0.1:8080/batch"),
//!     );
//!     client.set_key(Some("channel-key")).await?;
//!
//!     let deal = client
//!         .submit_or_fallback(MethodCall::new("crm.deal.get", json!({"id": 5})), || async {
//!             Err(callbatch::CallError::fallback("no direct path"))
//!         })
//!         .await?;
//! }).await;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod client;
mod scheduler;

/// Configuration for endpoint, cadence, and timeouts.
pub mod config;

/// Channel key and poll-rate state.
pub mod connection;

/// Error types.
pub mod error;

/// HTTP/1.1 transport built on hyper.
pub mod hyper_transport;

/// Request queues and per-call completion handles.
pub mod ledger;

/// Observable client state.
pub mod notifier;

/// Time, task, and random providers.
pub mod providers;

/// Applying batch responses.
pub mod reconciler;

/// Failure classification and rollback.
pub mod recovery;

/// Result normalization.
pub mod result;

/// HTTP seam and protocol layer.
pub mod transport;

/// JSON wire format.
pub mod wire;

pub use client::BatchClient;
pub use config::{ClientConfig, MAX_POLL_RATE_MS, MIN_POLL_RATE_MS};
pub use error::{CallError, ClientError, TransportError};
pub use hyper_transport::HyperTransport;
pub use ledger::{CallFuture, CallResult, MethodCall, QueueSizes, RequestKey};
pub use notifier::{ClientState, Subscription};
pub use providers::{
    Providers, RandomProvider, TaskProvider, TimeError, TimeProvider, TokioProviders,
    TokioRandomProvider, TokioTaskProvider, TokioTimeProvider,
};
pub use transport::{HttpResponse, HttpTransport, PostOptions};
