use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct CancelHandle {
    generation: u64,
    token: CancellationToken,
}

/// Per-user permit pool plus the cancel handle of the latest admitted request.
struct AdmissionSlot {
    permits: Arc<Semaphore>,
    cancel: Mutex<Option<CancelHandle>>,
    next_generation: AtomicU64,
}

impl AdmissionSlot {
    fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            cancel: Mutex::new(None),
            next_generation: AtomicU64::new(0),
        }
    }
}

/// Bounds how many requests each user may have in flight.
///
/// Slots are created on first use and kept for the life of the process.
/// Each slot carries its own lock, so users never contend with each other.
pub struct AdmissionController {
    capacity: usize,
    slots: DashMap<i64, Arc<AdmissionSlot>>,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: DashMap::new(),
        }
    }

    fn slot(&self, user_id: i64) -> Arc<AdmissionSlot> {
        let entry = self
            .slots
            .entry(user_id)
            .or_insert_with(|| Arc::new(AdmissionSlot::new(self.capacity)));
        Arc::clone(entry.value())
    }

    /// Admit one request for `user_id`, or `None` when the user is at capacity.
    ///
    /// Never waits. The slot is released when the returned permit drops.
    pub fn try_acquire(&self, user_id: i64) -> Option<AdmissionPermit> {
        let slot = self.slot(user_id);
        let permit = Arc::clone(&slot.permits).try_acquire_owned().ok()?;
        Some(AdmissionPermit {
            user_id,
            slot,
            generation: None,
            _permit: permit,
        })
    }

    /// Cancel the user's registered in-flight request. Returns whether one was found.
    pub fn cancel(&self, user_id: i64) -> bool {
        let Some(slot) = self.slots.get(&user_id).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let handle = match slot.cancel.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => return false,
        };
        match handle {
            Some(handle) => {
                debug!(user_id, "cancelling in-flight request");
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Requests currently admitted for `user_id`.
    pub fn in_flight(&self, user_id: i64) -> usize {
        self.slots
            .get(&user_id)
            .map(|s| self.capacity - s.permits.available_permits())
            .unwrap_or(0)
    }
}

/// Proof of admission for one request. Dropping it releases the slot.
pub struct AdmissionPermit {
    user_id: i64,
    slot: Arc<AdmissionSlot>,
    generation: Option<u64>,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Register `token` as the user's cancel handle, replacing any earlier one.
    pub fn set_cancel(&mut self, token: CancellationToken) {
        let generation = self.slot.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.slot.cancel.lock() {
            *guard = Some(CancelHandle { generation, token });
            self.generation = Some(generation);
        }
    }

    /// Create a fresh token and register it via [`Self::set_cancel`].
    pub fn cancellation_token(&mut self) -> CancellationToken {
        let token = CancellationToken::new();
        self.set_cancel(token.clone());
        token
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let Some(generation) = self.generation else {
            return;
        };
        if let Ok(mut guard) = self.slot.cancel.lock() {
            // A newer request may have registered its own handle meanwhile.
            if guard.as_ref().is_some_and(|h| h.generation == generation) {
                *guard = None;
            }
        }
    }
}
