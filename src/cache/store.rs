//! Cache Storage Module
//!
//! Thread-safe keyed storage combining a coarse map lock, per-key fetch
//! admission, lazy and timer-driven expiry, and cancellable expiry events.
//!
//! Locking rules:
//! - the map lock is only held for short structural work and is never held
//!   while user code (factories, handlers, release callbacks) runs;
//! - a fetch holds the admission lock of its key while the factory runs;
//! - an entry whose expiry is being decided is marked under the map lock,
//!   and reads see its current value until the decision is committed;
//! - lock order is map lock, then timer slot, and the timer is only ever
//!   started after the map lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cache::builder::{KeyValidator, PolicyFactory, ReleaseFn};
use crate::cache::events::EventHandlers;
use crate::cache::key_lock::KeyLocks;
use crate::cache::{
    CacheEntry, CacheKey, CacheStats, CacheStorageBuilder, CacheValue, Disposal, EntryOptions,
    ExpirationPolicy, ExpiredEntry, ExpiringEntry, ExpiryDecision,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{ExpirationTimer, Sweep};

// == Cache Storage ==
/// Thread-safe cache storage with expiration policies.
///
/// Dropping the storage stops its expiration timer and clears every entry,
/// releasing values when disposal is configured. Share it between threads
/// with `Arc<CacheStorage<K, V>>`.
///
/// Expiry handlers may call back into the storage, including for the key
/// being expired: while its `Expiring` handlers run, the entry reads as
/// present and is not dispatched again. A factory must not fetch its own key,
/// it would wait on itself.
pub struct CacheStorage<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    state: Mutex<State<K, V>>,
    key_locks: KeyLocks<K>,
    events: EventHandlers<K, V>,
    timer: Mutex<Option<ExpirationTimer>>,
    settings: Settings<K, V>,
    next_generation: AtomicU64,
}

struct State<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    stats: CacheStats,
}

struct Settings<K, V> {
    timer_interval: Duration,
    dispose_values_on_removal: bool,
    default_expiration: Option<PolicyFactory<K>>,
    key_validator: Option<KeyValidator<K>>,
    release: Option<ReleaseFn<K, V>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    /// Presence check: no touch, no statistics
    Peek,
    /// Value read: touches the entry and records a hit or miss
    Read,
}

enum Expiry<V> {
    /// The entry was evicted
    Evicted,
    /// A handler vetoed the eviction; carries the value observed
    Cancelled(V),
    /// The entry changed or disappeared since it was found expired
    Stale,
}

impl<K, V> CacheStorage<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    // == Constructors ==
    /// Creates an empty storage with default settings.
    pub fn new() -> Self {
        Self::from_builder(CacheStorageBuilder::new())
    }

    /// Starts configuring a storage.
    pub fn builder() -> CacheStorageBuilder<K, V> {
        CacheStorageBuilder::new()
    }

    /// Creates an empty storage from serializable settings.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        CacheStorageBuilder::from_config(config).build()
    }

    pub(crate) fn from_builder(builder: CacheStorageBuilder<K, V>) -> Self {
        let settings = Settings {
            timer_interval: builder.timer_interval,
            dispose_values_on_removal: builder.dispose_values_on_removal,
            default_expiration: builder.default_expiration,
            key_validator: builder.key_validator,
            release: builder.release,
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    stats: CacheStats::new(),
                }),
                key_locks: KeyLocks::new(),
                events: EventHandlers::new(),
                timer: Mutex::new(None),
                settings,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    // == Contains ==
    /// Returns true if a live entry is stored under `key`.
    ///
    /// An expired entry that the timer has not swept yet goes through the
    /// expiry sequence here and counts as present only if a handler cancels.
    pub fn contains(&self, key: &K) -> Result<bool> {
        self.inner.validate(key)?;
        Ok(self.inner.lookup(key, Access::Peek).is_some())
    }

    // == Get ==
    /// Returns a clone of the value stored under `key`, refreshing a sliding
    /// policy. Absent and expired entries yield `None`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.validate(key)?;
        Ok(self.inner.lookup(key, Access::Read))
    }

    // == Add ==
    /// Stores `value` under `key`, replacing any existing entry, with the
    /// default expiration policy.
    pub fn add(&self, key: K, value: V) -> Result<()> {
        self.add_with(key, value, EntryOptions::new().override_existing(true))
    }

    /// Stores `value` under `key`.
    ///
    /// With `override_existing` unset, a live entry already stored under the
    /// key is left untouched.
    pub fn add_with(&self, key: K, value: V, options: EntryOptions) -> Result<()> {
        self.inner.validate(&key)?;
        self.inner
            .insert(key, value, options.expiration, options.override_existing);
        Ok(())
    }

    // == Get From Cache Or Fetch ==
    /// Returns the value stored under `key`, or stores and returns the result
    /// of `factory`.
    ///
    /// Concurrent callers for the same key run the factory at most once; the
    /// others wait and receive the stored value. Callers for other keys are
    /// not blocked. A factory error is returned as is and nothing is stored.
    pub fn get_from_cache_or_fetch<F, E>(&self, key: K, factory: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
        E: From<CacheError>,
    {
        self.get_from_cache_or_fetch_with(key, EntryOptions::new(), factory)
    }

    /// Like [`get_from_cache_or_fetch`](Self::get_from_cache_or_fetch); with
    /// `override_existing` set the factory always runs and replaces the entry.
    pub fn get_from_cache_or_fetch_with<F, E>(
        &self,
        key: K,
        options: EntryOptions,
        factory: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
        E: From<CacheError>,
    {
        self.inner.validate(&key)?;
        let _admission = self.inner.key_locks.acquire(&key);

        if !options.override_existing {
            if let Some(value) = self.inner.lookup(&key, Access::Read) {
                return Ok(value);
            }
        }

        let value = factory()?;
        trace!(?key, "Fetched value for cache entry");
        self.inner.insert(key, value.clone(), options.expiration, true);
        Ok(value)
    }

    /// Infallible form of [`get_from_cache_or_fetch`](Self::get_from_cache_or_fetch).
    pub fn get_or_insert_with<F>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce() -> V,
    {
        self.get_from_cache_or_fetch(key, || Ok(factory()))
    }

    // == Remove ==
    /// Removes the entry stored under `key`. Returns false if there was none.
    ///
    /// No expiry events are raised. The value is released when disposal is
    /// configured.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.inner.validate(key)?;

        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.entries.remove(key);
            if removed.is_some() {
                let len = state.entries.len();
                state.stats.record_removals(1);
                state.stats.set_total_entries(len);
            }
            removed
        };

        match removed {
            Some(entry) => {
                trace!(?key, "Removed cache entry");
                if self.inner.settings.dispose_values_on_removal {
                    self.inner.release(key, entry.value);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // == Clear ==
    /// Removes every entry without raising expiry events, releasing values
    /// when disposal is configured.
    pub fn clear(&self) {
        self.inner.clear();
    }

    // == Events ==
    /// Registers a handler consulted before an entry is evicted on expiry.
    /// Returning [`ExpiryDecision::Cancel`] keeps the entry.
    pub fn on_expiring<F>(&self, handler: F)
    where
        F: Fn(&ExpiringEntry<'_, K, V>) -> ExpiryDecision + Send + Sync + 'static,
    {
        self.inner.events.add_expiring(Arc::new(handler));
    }

    /// Registers a handler notified after an entry is evicted on expiry. It
    /// receives the current disposal decision and returns the one to apply.
    pub fn on_expired<F>(&self, handler: F)
    where
        F: Fn(&ExpiredEntry<'_, K, V>, Disposal) -> Disposal + Send + Sync + 'static,
    {
        self.inner.events.add_expired(Arc::new(handler));
    }

    // == Sweep ==
    /// Runs one expiry sweep now. Returns the number of evicted entries.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    // == Introspection ==
    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the keys of live entries.
    pub fn keys(&self) -> Vec<K> {
        let now = Instant::now();
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.expiry_pending || !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Snapshot of the hit, miss and eviction counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.entries.len());
        stats
    }

    /// Returns true while the expiration timer is active.
    pub fn is_timer_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(ExpirationTimer::is_running)
    }
}

impl<K, V> Default for CacheStorage<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for CacheStorage<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn drop(&mut self) {
        let timer = self.inner.timer.lock().take();
        drop(timer);
        self.inner.clear();
    }
}

impl<K, V> Inner<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn validate(&self, key: &K) -> Result<()> {
        match &self.settings.key_validator {
            Some(validator) if !validator(key) => {
                Err(CacheError::InvalidKey(format!("{:?}", key)))
            }
            _ => Ok(()),
        }
    }

    // == Lookup ==
    /// Reads the entry under `key`, running the expiry sequence for an
    /// expired one.
    fn lookup(&self, key: &K, access: Access) -> Option<V> {
        loop {
            let now = Instant::now();
            let generation = {
                let mut state = self.state.lock();
                let State { entries, stats } = &mut *state;
                match entries.get_mut(key) {
                    None => {
                        if access == Access::Read {
                            stats.record_miss();
                        }
                        return None;
                    }
                    Some(entry) if !entry.is_expired(now) => {
                        if access == Access::Read {
                            entry.touch(now);
                            stats.record_hit();
                        }
                        return Some(entry.value.clone());
                    }
                    // Expiry already being decided, possibly by the caller's
                    // own handler further up the stack.
                    Some(entry) if entry.expiry_pending => {
                        if access == Access::Read {
                            stats.record_hit();
                        }
                        return Some(entry.value.clone());
                    }
                    Some(entry) => entry.generation,
                }
            };

            match self.expire(key, generation) {
                Expiry::Evicted => {
                    if access == Access::Read {
                        self.state.lock().stats.record_miss();
                    }
                    return None;
                }
                Expiry::Cancelled(value) => {
                    if access == Access::Read {
                        self.state.lock().stats.record_hit();
                    }
                    return Some(value);
                }
                Expiry::Stale => continue,
            }
        }
    }

    // == Insert ==
    fn insert(
        self: &Arc<Self>,
        key: K,
        value: V,
        policy: Option<ExpirationPolicy>,
        override_existing: bool,
    ) {
        let policy = policy.or_else(|| {
            self.settings
                .default_expiration
                .as_ref()
                .and_then(|factory| factory(&key))
        });
        let now = Instant::now();

        let (replaced, can_expire) = {
            let mut state = self.state.lock();
            if !override_existing
                && state
                    .entries
                    .get(&key)
                    .is_some_and(|entry| entry.expiry_pending || !entry.is_expired(now))
            {
                trace!(?key, "Cache entry exists, insert skipped");
                return;
            }

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let entry = CacheEntry::new(value, policy, now).with_generation(generation);
            let can_expire = entry.can_expire();
            let replaced = state.entries.insert(key.clone(), entry);
            let len = state.entries.len();
            state.stats.set_total_entries(len);
            (replaced, can_expire)
        };

        trace!(?key, "Stored cache entry");
        if can_expire {
            self.ensure_timer();
        }
        if let Some(old) = replaced {
            if self.settings.dispose_values_on_removal {
                self.release(&key, old.value);
            }
        }
    }

    /// Starts the expiration timer unless it is already running.
    ///
    /// Must be called after the entry is stored and without the map lock: an
    /// idle tick retires the timer under the map lock, so it either sees the
    /// new entry or has already emptied the slot this call refills.
    fn ensure_timer(self: &Arc<Self>) {
        let mut slot = self.timer.lock();
        if slot.as_ref().is_some_and(ExpirationTimer::is_running) {
            return;
        }

        match ExpirationTimer::start(Arc::downgrade(self), self.settings.timer_interval) {
            Ok(timer) => *slot = Some(timer),
            Err(err) => warn!(
                "Failed to start expiration timer, expiry falls back to reads: {}",
                err
            ),
        }
    }

    // == Expire ==
    /// Runs the expiry sequence for the entry under `key` if it is still the
    /// insertion identified by `generation` and still expired.
    ///
    /// `Expiring` handlers run without any lock held, with the entry marked
    /// so that no other read or sweep dispatches it meanwhile. The eviction
    /// is then committed only if the entry is unchanged and still expired, so
    /// a concurrent replace wins over a stale eviction.
    fn expire(&self, key: &K, generation: u64) -> Expiry<V> {
        let (value, policy) = {
            let mut state = self.state.lock();
            match state.entries.get_mut(key) {
                Some(entry)
                    if entry.generation == generation
                        && !entry.expiry_pending
                        && entry.is_expired(Instant::now()) =>
                {
                    let Some(policy) = entry.expiration_policy.clone() else {
                        return Expiry::Stale;
                    };
                    entry.expiry_pending = true;
                    (entry.value.clone(), policy)
                }
                _ => return Expiry::Stale,
            }
        };
        let mut pending = PendingExpiry {
            inner: self,
            key,
            generation,
            armed: true,
        };

        let decision = self.events.raise_expiring(&ExpiringEntry {
            key,
            value: &value,
            expiration_policy: &policy,
        });
        if decision == ExpiryDecision::Cancel {
            let mut state = self.state.lock();
            pending.settle(&mut state.entries);
            state.stats.record_cancelled_expiration();
            drop(state);
            debug!(?key, "Cache entry expiration cancelled");
            return Expiry::Cancelled(value);
        }

        let evicted = {
            let mut state = self.state.lock();
            pending.settle(&mut state.entries);
            let unchanged = state.entries.get(key).is_some_and(|entry| {
                entry.generation == generation && entry.is_expired(Instant::now())
            });
            if !unchanged {
                return Expiry::Stale;
            }
            let Some(entry) = state.entries.remove(key) else {
                return Expiry::Stale;
            };
            let len = state.entries.len();
            state.stats.record_expiration();
            state.stats.set_total_entries(len);
            entry.value
        };

        debug!(?key, "Cache entry expired");
        let disposal = self.events.raise_expired(
            &ExpiredEntry {
                key,
                value: &evicted,
            },
            Disposal::from(self.settings.dispose_values_on_removal),
        );
        if disposal == Disposal::Dispose {
            self.release(key, evicted);
        }
        Expiry::Evicted
    }

    // == Sweep Expired ==
    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<(K, u64)> = self
            .state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| !entry.expiry_pending && entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.generation))
            .collect();

        let evicted = candidates
            .iter()
            .filter(|(key, generation)| matches!(self.expire(key, *generation), Expiry::Evicted))
            .count();

        if evicted > 0 {
            debug!("Expiration sweep: evicted {} entries", evicted);
        } else {
            trace!("Expiration sweep: no entries evicted");
        }
        evicted
    }

    fn clear(&self) {
        let drained: Vec<(K, CacheEntry<V>)> = {
            let mut state = self.state.lock();
            let drained: Vec<_> = state.entries.drain().collect();
            state.stats.record_removals(drained.len());
            state.stats.set_total_entries(0);
            drained
        };

        if !drained.is_empty() {
            debug!("Cleared {} cache entries", drained.len());
        }
        if self.settings.dispose_values_on_removal {
            for (key, entry) in drained {
                self.release(&key, entry.value);
            }
        }
    }

    fn release(&self, key: &K, value: V) {
        if let Some(release) = &self.settings.release {
            trace!(?key, "Releasing cache value");
            release(key, value);
        }
    }
}

/// Expiry mark held while `Expiring` handlers run. Clears the mark on drop
/// if a handler unwinds before a decision is committed.
struct PendingExpiry<'a, K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    inner: &'a Inner<K, V>,
    key: &'a K,
    generation: u64,
    armed: bool,
}

impl<K, V> PendingExpiry<'_, K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Clears the mark. Called with the map lock held.
    fn settle(&mut self, entries: &mut HashMap<K, CacheEntry<V>>) {
        self.armed = false;
        if let Some(entry) = entries.get_mut(self.key) {
            if entry.generation == self.generation {
                entry.expiry_pending = false;
            }
        }
    }
}

impl<K, V> Drop for PendingExpiry<'_, K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn drop(&mut self) {
        if self.armed {
            let inner = self.inner;
            let mut state = inner.state.lock();
            self.settle(&mut state.entries);
        }
    }
}

impl<K, V> Sweep for Inner<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn sweep_on_tick(&self) -> bool {
        self.sweep_expired();

        let state = self.state.lock();
        if state.entries.values().any(CacheEntry::can_expire) {
            return true;
        }
        let timer = self.timer.lock().take();
        drop(state);
        drop(timer);
        debug!("No expiring entries left, expiration timer idle");
        false
    }
}
