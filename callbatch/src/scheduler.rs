//! Batch scheduling: one worker task per connection epoch.
//!
//! The worker runs a round, then either stops (queues drained, connection
//! unusable, or reset) or sleeps before the next round:
//!
//! ```text
//!            ┌────────────── wake (new submission) ──────────────┐
//!            ▼                                                    │
//! spawn ─► round ─► drained? ── yes ──► exit                      │
//!            │                                                    │
//!            ├─ success, work left ──► sleep(poll rate) ──────────┤
//!            ├─ transient failure  ──► sleep(min(cap, poll rate))─┘
//!            └─ critical failure   ──► reset ──► exit
//! ```
//!
//! Single flight: `processing` is set for the duration of a round and
//! [`Shared::process_if_needed`] does nothing while it is set. A reset
//! bumps the epoch; a round that returns under a newer epoch rejects its
//! snapshot instead of touching the new ledger.

use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::client::Shared;
use crate::error::CallError;
use crate::providers::{Providers, TaskProvider, TimeProvider};
use crate::reconciler::reconcile;
use crate::recovery::{recover, Recovery};
use crate::transport::HttpTransport;
use crate::wire::BatchRequest;

/// What the worker does after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundOutcome {
    /// Nothing to do; the worker exits.
    Idle,
    /// Run again after the delay.
    Rearm(Duration),
    /// The epoch ended; the worker exits without touching shared state.
    Stop,
}

impl<P: Providers, T: HttpTransport> Shared<P, T> {
    /// Start a round if there is work and none is in flight.
    ///
    /// Spawns the worker if none is running, or wakes it from its delay.
    pub(crate) fn process_if_needed(self: &Rc<Self>) {
        let mut runtime = self.runtime.borrow_mut();
        if runtime.processing || !runtime.can_process() {
            return;
        }
        if let Some(wake) = &runtime.worker {
            wake.notify_waiters();
            return;
        }

        let wake = Rc::new(Notify::new());
        runtime.worker = Some(wake.clone());
        let epoch = runtime.epoch;
        drop(runtime);

        tracing::debug!("starting batch worker for epoch {}", epoch);
        let shared = self.clone();
        self.providers
            .task()
            .spawn_task("batch_worker", async move {
                shared.run_worker(wake, epoch).await;
            });
    }

    async fn run_worker(self: Rc<Self>, wake: Rc<Notify>, epoch: u64) {
        loop {
            let delay = match self.process_batch(epoch).await {
                RoundOutcome::Rearm(delay) => delay,
                RoundOutcome::Idle => break,
                RoundOutcome::Stop => return,
            };

            tokio::select! {
                _ = self.providers.time().sleep(delay) => {}
                _ = wake.notified() => {
                    tracing::trace!("batch worker woken before its delay elapsed");
                }
            }

            if self.epoch() != epoch {
                return;
            }
        }

        let mut runtime = self.runtime.borrow_mut();
        if runtime.epoch == epoch {
            runtime.worker = None;
        }
    }

    /// Run one batch round.
    async fn process_batch(self: &Rc<Self>, epoch: u64) -> RoundOutcome {
        let (request, snapshot, timeout) = {
            let mut runtime = self.runtime.borrow_mut();
            if runtime.epoch != epoch || !runtime.can_process() {
                return RoundOutcome::Idle;
            }
            let Some(key) = runtime.connection.key().map(str::to_string) else {
                return RoundOutcome::Idle;
            };

            runtime.processing = true;
            let snapshot = runtime.ledger.take_round();
            let request = BatchRequest {
                key,
                completed_keys: snapshot.completed_keys(),
                status_request_keys: runtime.ledger.active_keys(),
                calls: snapshot.wire_calls(),
            };
            let timeout = self.config.batch_timeout(runtime.connection.poll_rate());
            (request, snapshot, timeout)
        };
        self.publish_state();

        let response = self.transport.send_batch(&request, timeout).await;

        if self.epoch() != epoch {
            let rejected = snapshot.reject_all(CallError::ConnectionReset);
            tracing::debug!(
                "discarding response of a round from epoch {}, {} calls reset",
                epoch,
                rejected
            );
            return RoundOutcome::Stop;
        }

        let outcome = match response {
            Ok(payload) => {
                let mut guard = self.runtime.borrow_mut();
                let runtime = &mut *guard;
                let summary = reconcile(
                    &mut runtime.connection,
                    &mut runtime.ledger,
                    payload,
                    snapshot,
                );
                runtime.processing = false;
                runtime.last_error = None;
                tracing::debug!(?summary, "batch round reconciled");

                if runtime.ledger.is_empty() {
                    RoundOutcome::Idle
                } else {
                    RoundOutcome::Rearm(runtime.connection.poll_rate())
                }
            }
            Err(error) => {
                let recovery = {
                    let mut guard = self.runtime.borrow_mut();
                    let runtime = &mut *guard;
                    runtime.processing = false;
                    recover(
                        &self.config,
                        &mut runtime.connection,
                        &mut runtime.ledger,
                        &mut runtime.last_error,
                        snapshot,
                        &error,
                    )
                };
                match recovery {
                    Recovery::Retry(delay) => RoundOutcome::Rearm(delay),
                    Recovery::Reset => {
                        self.reset();
                        return RoundOutcome::Stop;
                    }
                }
            }
        };

        self.publish_state();
        outcome
    }
}
