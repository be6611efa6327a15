//! Per-Key Admission Locks
//!
//! Serializes fetches of the same key without blocking fetches of other keys.
//! Lock slots are created on demand and dropped once nobody holds or waits on
//! them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

type Slot = Arc<Mutex<()>>;

#[derive(Debug)]
pub(crate) struct KeyLocks<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K> KeyLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks until the caller holds exclusive admission for `key`.
    pub fn acquire(&self, key: &K) -> KeyLockGuard<'_, K> {
        let slot = self
            .slots
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // The slot map lock is released before waiting on the slot.
        let guard = slot.lock_arc();

        KeyLockGuard {
            owner: self,
            key: key.clone(),
            slot,
            guard: Some(guard),
        }
    }

    fn release(&self, key: &K, slot: &Slot) {
        let mut slots = self.slots.lock();
        // Only the map and the releasing guard still reference the slot.
        if Arc::strong_count(slot) == 2 {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Exclusive admission for one key; released on drop.
pub(crate) struct KeyLockGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    owner: &'a KeyLocks<K>,
    key: K,
    slot: Slot,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K> Drop for KeyLockGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release(&self.key, &self.slot);
    }
}
