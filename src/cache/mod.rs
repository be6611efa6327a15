//! Cache Module
//!
//! Provides thread-safe in-memory caching with pluggable expiration policies,
//! timer-driven eviction, and cancellable expiry events.

mod builder;
mod entry;
mod events;
mod key_lock;
mod policy;
mod stats;
mod store;


use std::fmt::Debug;
use std::hash::Hash;

// Re-export public types
pub use builder::{
    validators, CacheStorageBuilder, EntryOptions, KeyValidator, PolicyFactory, ReleaseFn,
};
pub use entry::CacheEntry;
pub use events::{
    Disposal, ExpiredEntry, ExpiredHandler, ExpiringEntry, ExpiringHandler, ExpiryDecision,
};
pub use policy::{ExpirationPolicy, ExpirationPredicate};
pub use stats::CacheStats;
pub use store::CacheStorage;

/// Types usable as cache keys.
pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Types usable as cache values. Reads hand out clones; wrap expensive
/// payloads in `Arc`.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}
