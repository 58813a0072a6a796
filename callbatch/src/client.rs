//! The batch client: public surface over the shared ledger.
//!
//! A [`BatchClient`] is an explicit context object. The host builds one,
//! clones it into whoever needs to issue calls, and drives it on a
//! single-threaded runtime inside a `LocalSet`. Clones share one ledger.
//!
//! # Cancellation
//!
//! There is no per-call cancellation. Dropping a [`CallFuture`] only stops
//! observing the result; the call still runs and settles against the
//! ledger. The only global cancellation is [`BatchClient::set_key`] (with
//! any value, including the current key) or a critical failure, both of
//! which reject every outstanding call with [`CallError::ConnectionReset`].

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use tokio::sync::{watch, Notify};

use crate::config::ClientConfig;
use crate::connection::{normalize_key, ConnectionState};
use crate::error::{CallError, ClientError};
use crate::ledger::{CallFuture, CallRequest, CallResult, MethodCall, RequestKeyGenerator, RequestLedger};
use crate::notifier::{ClientState, StateNotifier, Subscription};
use crate::providers::{Providers, RandomProvider, TimeProvider};
use crate::transport::{BatchTransport, HttpTransport};

/// Mutable state behind the client, touched only between await points.
pub(crate) struct Runtime {
    pub(crate) connection: ConnectionState,
    pub(crate) ledger: RequestLedger,
    /// A batch round is in flight.
    pub(crate) processing: bool,
    pub(crate) last_error: Option<String>,
    /// The key's initialization round-trip has not finished yet; calls
    /// queue up but no round is sent.
    pub(crate) initializing: bool,
    /// Bumped by every reset; work started under an older epoch is stale.
    pub(crate) epoch: u64,
    /// Wake handle of the live batch worker, if one is running.
    pub(crate) worker: Option<Rc<Notify>>,
}

impl Runtime {
    fn new(config: &ClientConfig) -> Self {
        Self {
            connection: ConnectionState::new(config),
            ledger: RequestLedger::new(),
            processing: false,
            last_error: None,
            initializing: false,
            epoch: 0,
            worker: None,
        }
    }

    /// A round has something to do and somewhere to send it.
    pub(crate) fn can_process(&self) -> bool {
        !self.initializing && self.connection.is_connected() && !self.ledger.is_empty()
    }

    fn state(&self) -> ClientState {
        ClientState {
            connected: self.connection.is_connected(),
            processing: self.processing,
            error: self.last_error.clone(),
            poll_rate: self.connection.poll_rate(),
            queue_sizes: self.ledger.sizes(),
        }
    }
}

/// State shared between client handles and the batch worker.
pub(crate) struct Shared<P: Providers, T: HttpTransport> {
    pub(crate) providers: P,
    pub(crate) config: ClientConfig,
    pub(crate) transport: BatchTransport<T, P::Time>,
    pub(crate) keys: RequestKeyGenerator,
    pub(crate) runtime: RefCell<Runtime>,
    pub(crate) notifier: StateNotifier,
}

impl<P: Providers, T: HttpTransport> Shared<P, T> {
    pub(crate) fn epoch(&self) -> u64 {
        self.runtime.borrow().epoch
    }

    /// Publish a fresh snapshot. Must not be called while `runtime` is borrowed.
    pub(crate) fn publish_state(&self) {
        let state = self.runtime.borrow().state();
        self.notifier.publish(state);
    }

    /// Reject every live call, clear all queues, and retire the worker.
    ///
    /// Returns the new epoch.
    pub(crate) fn reset(&self) -> u64 {
        let (requests, worker, epoch) = {
            let mut runtime = self.runtime.borrow_mut();
            runtime.epoch += 1;
            runtime.processing = false;
            (runtime.ledger.drain(), runtime.worker.take(), runtime.epoch)
        };

        if let Some(wake) = worker {
            wake.notify_waiters();
        }
        if !requests.is_empty() {
            tracing::info!("connection reset, rejecting {} outstanding calls", requests.len());
        }
        for request in requests {
            request.reject(CallError::ConnectionReset);
        }

        self.publish_state();
        epoch
    }
}

/// Batched remote-call client.
///
/// Generic over the provider bundle `P` and the HTTP capability `T`.
pub struct BatchClient<P: Providers, T: HttpTransport> {
    shared: Rc<Shared<P, T>>,
}

impl<P: Providers, T: HttpTransport> Clone for BatchClient<P, T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: Providers, T: HttpTransport> BatchClient<P, T> {
    /// Create a client without a key; calls use the fallback path until
    /// [`set_key`](Self::set_key) succeeds.
    pub fn new(providers: P, http: T, config: ClientConfig) -> Self {
        let keys = RequestKeyGenerator::new(providers.random().random());
        let transport = BatchTransport::new(http, providers.time().clone(), config.endpoint.clone());
        let runtime = Runtime::new(&config);
        let notifier = StateNotifier::new(runtime.state());

        Self {
            shared: Rc::new(Shared {
                providers,
                config,
                transport,
                keys,
                runtime: RefCell::new(runtime),
                notifier,
            }),
        }
    }

    /// Install a channel key, or clear it with `None`.
    ///
    /// The key is trimmed; an empty key means "no channel". Every
    /// outstanding call is rejected with [`CallError::ConnectionReset`]
    /// first. A non-empty key is then validated with one initialization
    /// round-trip, whose interval hint is adopted.
    ///
    /// While that round-trip runs the client already reports itself
    /// connected: submissions are queued, but no batch round is sent until
    /// the key is confirmed. If the server rejects the key, the queued calls
    /// are rejected with [`CallError::ConnectionReset`].
    ///
    /// # Errors
    ///
    /// - [`ClientError::KeyNotFound`] if the server does not know the key.
    ///   The connection is marked broken and the key dropped.
    /// - [`ClientError::Transport`] for any other failure. The key stays
    ///   set and the connection is not marked broken.
    pub async fn set_key(&self, key: Option<&str>) -> Result<(), ClientError> {
        let key = normalize_key(key);
        {
            let mut runtime = self.shared.runtime.borrow_mut();
            runtime.connection.set_key(key.clone());
            runtime.last_error = None;
            runtime.initializing = key.is_some();
        }
        tracing::info!("channel key {}", if key.is_some() { "set" } else { "cleared" });
        let epoch = self.shared.reset();

        let Some(key) = key else {
            return Ok(());
        };

        let outcome = self
            .shared
            .transport
            .init(&key, self.shared.config.init_timeout)
            .await;
        let current = self.shared.epoch() == epoch;
        if current {
            self.shared.runtime.borrow_mut().initializing = false;
        } else {
            tracing::debug!("initialization of superseded key finished; state left untouched");
        }

        match outcome {
            Ok(interval) => {
                if current {
                    if let Some(raw) = interval {
                        self.shared.runtime.borrow_mut().connection.adopt_interval(raw);
                    }
                    self.shared.publish_state();
                    self.shared.process_if_needed();
                }
                Ok(())
            }
            Err(error) if error.status() == Some(404) => {
                let message = error
                    .server_message()
                    .unwrap_or_else(|| "key not found".to_string());
                if current {
                    tracing::warn!("channel key rejected by server: {}", message);
                    self.shared.runtime.borrow_mut().connection.mark_broken(true);
                    self.shared.reset();
                    self.shared.runtime.borrow_mut().last_error = Some(message.clone());
                    self.shared.publish_state();
                }
                Err(ClientError::KeyNotFound { message })
            }
            Err(error) => {
                if current {
                    tracing::warn!("channel initialization failed: {}", error);
                    self.shared.runtime.borrow_mut().last_error = Some(error.to_string());
                    self.shared.publish_state();
                    self.shared.process_if_needed();
                }
                Err(ClientError::Transport(error))
            }
        }
    }

    /// Submit a call through the batch channel, or run `fallback` when
    /// there is no usable channel.
    ///
    /// Enqueueing happens immediately; the returned future settles exactly
    /// once with the call's result or error.
    pub fn submit_or_fallback<F, Fut>(&self, call: MethodCall, fallback: F) -> CallFuture
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult> + 'static,
    {
        if !self.is_connected() {
            tracing::trace!("no usable channel, calling {} through fallback", call.method);
            return CallFuture::from_fallback(fallback());
        }

        let now = self.shared.providers.time().now();
        let (request, future) = CallRequest::new(self.shared.keys.next_key(), call, now);
        tracing::debug!("queued call {} ({})", request.key, request.call.method);
        self.shared.runtime.borrow_mut().ledger.enqueue(request);

        self.shared.publish_state();
        self.shared.process_if_needed();
        future
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ClientState {
        self.shared.runtime.borrow().state()
    }

    /// Register a listener invoked with a snapshot after every mutation.
    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ClientState) + 'static,
    {
        self.shared.notifier.on_state_change(listener)
    }

    /// Watch channel carrying the latest state.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.shared.notifier.subscribe()
    }

    /// A key is set and the connection is not broken.
    pub fn is_connected(&self) -> bool {
        self.shared.runtime.borrow().connection.is_connected()
    }

    /// Most recent connection-level error.
    pub fn last_error(&self) -> Option<String> {
        self.shared.runtime.borrow().last_error.clone()
    }

    /// Current channel key, for the host to persist.
    pub fn channel_key(&self) -> Option<String> {
        self.shared
            .runtime
            .borrow()
            .connection
            .key()
            .map(str::to_string)
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}
