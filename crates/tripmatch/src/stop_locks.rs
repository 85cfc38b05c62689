use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-stop-id critical section for storage writes.
///
/// Two trips retiring at the same time often share stops; upserts for the
/// same stop id must not interleave. Holding the id here orders them while
/// leaving writes for unrelated stops concurrent.
#[derive(Clone, Default)]
pub struct StopLocks {
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl StopLocks {
    /// Takes the critical section for `stop_id`, waiting out any holder.
    pub async fn hold(&self, stop_id: &str) -> StopHold {
        let slot = self
            .slots
            .entry(stop_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = slot.lock_owned().await;
        StopHold { stop_id: stop_id.to_string(), slots: Arc::clone(&self.slots), guard }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// Releases the critical section on drop.
pub struct StopHold {
    stop_id: String,
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
    #[allow(dead_code)]
    guard: OwnedMutexGuard<()>,
}

impl Drop for StopHold {
    fn drop(&mut self) {
        // Two owners are the map's clone and our guard's: nobody is waiting,
        // so the slot can go. The predicate runs under the shard lock, which
        // keeps a concurrent hold() from slipping in between check and remove.
        self.slots
            .remove_if(&self.stop_id, |_, slot| Arc::strong_count(slot) == 2);
    }
}
