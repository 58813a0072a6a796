//! Observable client state for UI and other observers.
//!
//! Observers always receive an owned [`ClientState`] snapshot, never a
//! reference into the live ledger.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::ledger::QueueSizes;

/// Snapshot of the client published after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    /// A key is set and the connection is not broken.
    pub connected: bool,
    /// A batch round is in flight.
    pub processing: bool,
    /// Most recent connection-level error.
    pub error: Option<String>,
    /// Current poll interval.
    #[serde(rename = "pollRateMs", serialize_with = "serialize_millis")]
    pub poll_rate: Duration,
    /// Sizes of the pending, active, and completed queues.
    pub queue_sizes: QueueSizes,
}

fn serialize_millis<S: serde::Serializer>(rate: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(rate.as_millis() as u64)
}

type Listener = Rc<dyn Fn(&ClientState)>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Fans state snapshots out to listeners and a watch channel.
pub struct StateNotifier {
    listeners: Rc<RefCell<Listeners>>,
    watch_tx: watch::Sender<ClientState>,
}

impl StateNotifier {
    /// Create a notifier seeded with the initial state.
    pub fn new(initial: ClientState) -> Self {
        let (watch_tx, _) = watch::channel(initial);
        Self {
            listeners: Rc::new(RefCell::new(Listeners::default())),
            watch_tx,
        }
    }

    /// Register a synchronous listener.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ClientState) + 'static,
    {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Rc::new(listener)));
        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    /// Receiver that always holds the latest state.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.watch_tx.subscribe()
    }

    /// Publish a snapshot to every observer.
    ///
    /// Listeners may subscribe, unsubscribe, or read client state from
    /// inside the callback.
    pub fn publish(&self, state: ClientState) {
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&state);
        }
        self.watch_tx.send_replace(state);
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }
}

/// Handle that keeps a state listener registered.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<RefCell<Listeners>>,
}

impl Subscription {
    /// Unregister the listener now.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .borrow_mut()
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}
