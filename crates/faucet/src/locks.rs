//! Per-key async locks, created on first use and dropped when idle.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<()>>;

/// A table of independent locks keyed by string.
///
/// Entries exist only while someone holds or waits for the lock, so the table
/// does not grow with every address ever seen.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<DashMap<String, Slot>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`. Waiters are served in arrival order.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        // Cloned under the shard lock so a concurrent release sees this waiter.
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = slot.clone().lock_owned().await;

        KeyGuard {
            slots: Arc::clone(&self.slots),
            key: key.to_string(),
            slot,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive access to one key of a [`KeyedLocks`] table.
pub struct KeyGuard {
    slots: Arc<DashMap<String, Slot>>,
    key: String,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Two references left means only the table and this guard know the
        // slot: nobody is waiting, so the entry can go.
        self.slots
            .remove_if(&self.key, |_, slot| Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2);
    }
}
