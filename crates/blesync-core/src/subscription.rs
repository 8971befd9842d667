//! Notification callbacks and the debounced-disable timer

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::types::Notification;

/// Subscriber callback for pushed attribute values
pub type NotifyCallback = Arc<dyn Fn(Notification) + Send + Sync>;

#[derive(Default)]
struct Subscription {
    callback: Option<NotifyCallback>,
    /// Bumped by every `set_notification` call for this attribute
    generation: u64,
    /// Disable timer that has not started its descriptor write yet
    pending_disable: Option<JoinHandle<()>>,
}

/// Per-attribute subscription state
///
/// A deferred disable captures the generation current when it was armed and only
/// proceeds if no later call has bumped it.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: Mutex<HashMap<Uuid, Subscription>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, Subscription>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install or clear the callback for `uuid`, cancel any pending disable, and
    /// return the new generation
    pub fn update(&self, uuid: Uuid, callback: Option<NotifyCallback>) -> u64 {
        let mut entries = self.entries();
        let entry = entries.entry(uuid).or_default();
        entry.callback = callback;
        entry.generation += 1;
        if let Some(timer) = entry.pending_disable.take() {
            timer.abort();
        }
        entry.generation
    }

    pub fn callback(&self, uuid: &Uuid) -> Option<NotifyCallback> {
        self.entries().get(uuid).and_then(|e| e.callback.clone())
    }

    /// Store the timer for a deferred disable armed at `generation`
    ///
    /// If the generation already moved on, the timer is stale and is aborted.
    pub fn arm_disable(&self, uuid: Uuid, generation: u64, timer: JoinHandle<()>) {
        let mut entries = self.entries();
        match entries.get_mut(&uuid) {
            Some(entry) if entry.generation == generation => {
                if let Some(previous) = entry.pending_disable.replace(timer) {
                    previous.abort();
                }
            }
            _ => timer.abort(),
        }
    }

    /// Claim the deferred disable armed at `generation`
    ///
    /// Returns false if a later call pre-empted it. Once claimed the timer is no
    /// longer abortable, so an in-flight descriptor write is never cut short.
    pub fn begin_disable(&self, uuid: &Uuid, generation: u64) -> bool {
        let mut entries = self.entries();
        match entries.get_mut(uuid) {
            Some(entry) if entry.generation == generation => {
                entry.pending_disable = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the entry after a disable completed, unless it was re-used meanwhile
    pub fn retire(&self, uuid: &Uuid, generation: u64) {
        let mut entries = self.entries();
        let unused = entries
            .get(uuid)
            .map(|e| e.generation == generation && e.callback.is_none())
            .unwrap_or(false);
        if unused {
            entries.remove(uuid);
        }
    }

    pub fn has_pending_disable(&self, uuid: &Uuid) -> bool {
        self.entries()
            .get(uuid)
            .map(|e| e.pending_disable.is_some())
            .unwrap_or(false)
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.entries().contains_key(uuid)
    }

    /// Abort every pending disable and forget all callbacks
    pub fn clear(&self) {
        for (_, entry) in self.entries().drain() {
            if let Some(timer) = entry.pending_disable {
                timer.abort();
            }
        }
    }
}
