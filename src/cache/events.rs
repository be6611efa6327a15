//! Expiry Events Module
//!
//! Handlers observe entries that are about to expire (and may veto the
//! eviction) and entries that have been evicted (and may override whether the
//! value is released).

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::ExpirationPolicy;

/// Outcome of an `Expiring` handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDecision {
    /// Let the eviction go ahead
    Proceed,
    /// Keep the entry alive
    Cancel,
}

/// Whether an evicted value is handed to the release callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    Keep,
    Dispose,
}

impl From<bool> for Disposal {
    fn from(dispose: bool) -> Self {
        if dispose {
            Disposal::Dispose
        } else {
            Disposal::Keep
        }
    }
}

/// An entry that is about to be evicted because its policy expired.
#[derive(Debug)]
pub struct ExpiringEntry<'a, K, V> {
    pub key: &'a K,
    pub value: &'a V,
    pub expiration_policy: &'a ExpirationPolicy,
}

/// An entry that has been evicted because its policy expired.
#[derive(Debug)]
pub struct ExpiredEntry<'a, K, V> {
    pub key: &'a K,
    pub value: &'a V,
}

pub type ExpiringHandler<K, V> =
    Arc<dyn Fn(&ExpiringEntry<'_, K, V>) -> ExpiryDecision + Send + Sync>;

pub type ExpiredHandler<K, V> =
    Arc<dyn Fn(&ExpiredEntry<'_, K, V>, Disposal) -> Disposal + Send + Sync>;

// == Event Handlers ==
/// Registered expiry handlers.
///
/// Dispatch works on a snapshot of the handler lists, so a handler may
/// register further handlers or call back into the cache.
pub(crate) struct EventHandlers<K, V> {
    expiring: RwLock<Vec<ExpiringHandler<K, V>>>,
    expired: RwLock<Vec<ExpiredHandler<K, V>>>,
}

impl<K, V> EventHandlers<K, V> {
    pub fn new() -> Self {
        Self {
            expiring: RwLock::new(Vec::new()),
            expired: RwLock::new(Vec::new()),
        }
    }

    pub fn add_expiring(&self, handler: ExpiringHandler<K, V>) {
        self.expiring.write().push(handler);
    }

    pub fn add_expired(&self, handler: ExpiredHandler<K, V>) {
        self.expired.write().push(handler);
    }

    // == Raise Expiring ==
    /// Runs every `Expiring` handler; the entry is kept if any handler cancels.
    pub fn raise_expiring(&self, entry: &ExpiringEntry<'_, K, V>) -> ExpiryDecision {
        let handlers = self.expiring.read().clone();
        let mut decision = ExpiryDecision::Proceed;
        for handler in handlers {
            if handler(entry) == ExpiryDecision::Cancel {
                decision = ExpiryDecision::Cancel;
            }
        }
        decision
    }

    // == Raise Expired ==
    /// Runs every `Expired` handler, each seeing the decision of the previous one.
    pub fn raise_expired(&self, entry: &ExpiredEntry<'_, K, V>, initial: Disposal) -> Disposal {
        let handlers = self.expired.read().clone();
        handlers
            .into_iter()
            .fold(initial, |disposal, handler| handler(entry, disposal))
    }
}
