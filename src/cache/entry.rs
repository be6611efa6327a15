//! Cache Entry Module
//!
//! Couples a cached value to its expiration policy and access bookkeeping.

use std::time::Instant;

use crate::cache::ExpirationPolicy;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Expiration policy, None = never expires
    pub expiration_policy: Option<ExpirationPolicy>,
    /// Insertion instant
    pub created_at: Instant,
    /// Instant of the most recent access
    pub last_accessed_at: Instant,
    /// Identity of this insertion; replacing a value yields a new generation
    pub(crate) generation: u64,
    /// Set while `Expiring` handlers decide the fate of this entry
    pub(crate) expiry_pending: bool,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry inserted at `now`.
    ///
    /// Relative policies (sliding, duration) start counting from `now`.
    pub fn new(value: V, expiration_policy: Option<ExpirationPolicy>, now: Instant) -> Self {
        Self {
            value,
            expiration_policy: expiration_policy.map(|policy| policy.starting_at(now)),
            created_at: now,
            last_accessed_at: now,
            generation: 0,
            expiry_pending: false,
        }
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    // == Touch ==
    /// Records an access at `now`, sliding the deadline when the policy allows.
    pub fn touch(&mut self, now: Instant) {
        self.last_accessed_at = now;
        if let Some(policy) = &self.expiration_policy {
            if policy.can_reset() {
                self.expiration_policy = Some(policy.on_accessed(now));
            }
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry without a policy never expires.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expiration_policy
            .as_ref()
            .is_some_and(|policy| policy.is_expired(now))
    }

    /// Returns true when the entry is subject to timer sweeps.
    pub fn can_expire(&self) -> bool {
        self.expiration_policy.is_some()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_entry_creation_no_policy() {
        let now = Instant::now();
        let entry = CacheEntry::new("test_value", None, now);

        assert_eq!(entry.value, "test_value");
        assert!(!entry.can_expire());
        assert!(!entry.is_expired(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_entry_duration_counts_from_insertion() {
        let policy = ExpirationPolicy::duration(Duration::from_millis(100));
        let inserted = Instant::now() + Duration::from_secs(1);
        let entry = CacheEntry::new(1, Some(policy), inserted);

        assert!(!entry.is_expired(inserted + Duration::from_millis(99)));
        assert!(entry.is_expired(inserted + Duration::from_millis(100)));
    }

    #[test]
    fn test_touch_slides_deadline() {
        let now = Instant::now();
        let mut entry = CacheEntry::new(
            "value",
            Some(ExpirationPolicy::sliding(Duration::from_millis(100))),
            now,
        );

        let accessed = now + Duration::from_millis(90);
        entry.touch(accessed);

        assert_eq!(entry.last_accessed_at, accessed);
        assert!(!entry.is_expired(now + Duration::from_millis(150)));
        assert!(entry.is_expired(accessed + Duration::from_millis(100)));
    }

    #[test]
    fn test_touch_keeps_absolute_deadline() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(50);
        let mut entry = CacheEntry::new("value", Some(ExpirationPolicy::absolute(deadline)), now);

        entry.touch(now + Duration::from_millis(40));

        assert_eq!(
            entry.expiration_policy.as_ref().and_then(|p| p.expires_at()),
            Some(deadline)
        );
        assert!(entry.is_expired(deadline));
    }
}
