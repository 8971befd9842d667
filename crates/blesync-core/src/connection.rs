//! Connection states and per-state observers

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::debug;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Link state of a peripheral, as last reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Observers
// ----------------------------------------------------------------------------

/// Callback run when the peripheral enters a given state
pub type ObserverCallback = Arc<dyn Fn() + Send + Sync>;

/// Cancellation handle returned by observer registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverHandle(u64);

#[derive(Default)]
struct Observers {
    next_handle: u64,
    by_state: HashMap<ConnectionState, Vec<(ObserverHandle, ObserverCallback)>>,
}

/// Registered connection observers, keyed by the state they fire on
///
/// Registration, cancellation and dispatch all take the same lock, so they may be
/// called concurrently from any thread.
#[derive(Default)]
pub struct ObserverTable {
    inner: Mutex<Observers>,
}

impl ObserverTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn observers(&self) -> MutexGuard<'_, Observers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, state: ConnectionState, callback: ObserverCallback) -> ObserverHandle {
        let mut observers = self.observers();
        let handle = ObserverHandle(observers.next_handle);
        observers.next_handle += 1;
        observers
            .by_state
            .entry(state)
            .or_default()
            .push((handle, callback));
        handle
    }

    /// Remove the observer; returns whether it was registered
    pub fn cancel(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers();
        for callbacks in observers.by_state.values_mut() {
            if let Some(position) = callbacks.iter().position(|(h, _)| *h == handle) {
                callbacks.remove(position);
                return true;
            }
        }
        false
    }

    pub fn is_registered(&self, handle: ObserverHandle) -> bool {
        self.observers()
            .by_state
            .values()
            .any(|callbacks| callbacks.iter().any(|(h, _)| *h == handle))
    }

    pub fn len(&self) -> usize {
        self.observers().by_state.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue every observer of `state` on `runtime`, in registration order
    ///
    /// Each queued call re-checks its handle before running, so an observer cancelled
    /// after being queued but before being polled is skipped.
    pub fn dispatch(self: &Arc<Self>, state: ConnectionState, runtime: &Handle) {
        let queued: Vec<(ObserverHandle, ObserverCallback)> = self
            .observers()
            .by_state
            .get(&state)
            .map(|callbacks| callbacks.to_vec())
            .unwrap_or_default();

        debug!(%state, observers = queued.len(), "Dispatching connection observers");

        for (handle, callback) in queued {
            let table = Arc::clone(self);
            runtime.spawn(async move {
                if table.is_registered(handle) {
                    callback();
                }
            });
        }
    }
}
