//! Cache Storage Builder
//!
//! Fluent construction of a [`CacheStorage`] plus the per-call
//! [`EntryOptions`] accepted by the insert and fetch operations.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKey, CacheStorage, CacheValue, ExpirationPolicy};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Produces the expiration policy for inserts that don't name one.
pub type PolicyFactory<K> = Arc<dyn Fn(&K) -> Option<ExpirationPolicy> + Send + Sync>;

/// Returns false for keys the storage must reject.
pub type KeyValidator<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;

/// Receives ownership of values the storage disposes.
pub type ReleaseFn<K, V> = Arc<dyn Fn(&K, V) + Send + Sync>;

// == Entry Options ==
/// Per-call options for `add_with` and `get_from_cache_or_fetch_with`.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    /// Explicit policy; None falls back to the storage's default factory
    pub expiration: Option<ExpirationPolicy>,
    /// Replace a live entry already stored under the key
    pub override_existing: bool,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expiration(mut self, policy: ExpirationPolicy) -> Self {
        self.expiration = Some(policy);
        self
    }

    pub fn override_existing(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }
}

// == Builder ==
/// Builder for [`CacheStorage`].
///
/// # Example
/// ```
/// use std::time::Duration;
/// use cache_storage::cache::{CacheStorage, ExpirationPolicy};
///
/// let cache: CacheStorage<String, u32> = CacheStorage::builder()
///     .expiration_timer_interval(Duration::from_millis(250))
///     .default_expiration(|_| Some(ExpirationPolicy::sliding(Duration::from_secs(30))))
///     .build()
///     .unwrap();
///
/// cache.add("answer".to_string(), 42).unwrap();
/// assert_eq!(cache.get(&"answer".to_string()).unwrap(), Some(42));
/// ```
pub struct CacheStorageBuilder<K, V> {
    pub(crate) timer_interval: Duration,
    pub(crate) dispose_values_on_removal: bool,
    pub(crate) default_expiration: Option<PolicyFactory<K>>,
    pub(crate) key_validator: Option<KeyValidator<K>>,
    pub(crate) release: Option<ReleaseFn<K, V>>,
}

impl<K, V> CacheStorageBuilder<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new() -> Self {
        Self::from_config(&CacheConfig::default())
    }

    /// Starts from the serializable settings in `config`.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            timer_interval: config.expiration_timer_interval(),
            dispose_values_on_removal: config.dispose_values_on_removal,
            default_expiration: None,
            key_validator: None,
            release: None,
        }
    }

    /// Sets the period between expiration sweeps.
    pub fn expiration_timer_interval(mut self, interval: Duration) -> Self {
        self.timer_interval = interval;
        self
    }

    /// Hands removed and expired values to the release callback by default.
    pub fn dispose_values_on_removal(mut self, dispose: bool) -> Self {
        self.dispose_values_on_removal = dispose;
        self
    }

    /// Policy used when an insert does not specify one.
    pub fn default_expiration<F>(mut self, factory: F) -> Self
    where
        F: Fn(&K) -> Option<ExpirationPolicy> + Send + Sync + 'static,
    {
        self.default_expiration = Some(Arc::new(factory));
        self
    }

    /// Rejects keys for which `validator` returns false.
    pub fn key_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.key_validator = Some(Arc::new(validator));
        self
    }

    /// Callback that takes ownership of every disposed value.
    pub fn release_with<F>(mut self, release: F) -> Self
    where
        F: Fn(&K, V) + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(release));
        self
    }

    // == Build ==
    /// Builds the storage. The expiration timer is not started until the
    /// first entry with a policy is stored.
    pub fn build(self) -> Result<CacheStorage<K, V>> {
        if self.timer_interval.is_zero() {
            return Err(CacheError::InvalidConfiguration(
                "expiration timer interval must be greater than zero".to_string(),
            ));
        }
        Ok(CacheStorage::from_builder(self))
    }
}

impl<K, V> Default for CacheStorageBuilder<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn default() -> Self {
        Self::new()
    }
}

// == Validators ==
/// Stock key validators.
pub mod validators {
    /// Rejects empty and whitespace-only string keys.
    pub fn non_empty<K: AsRef<str>>(key: &K) -> bool {
        !key.as_ref().trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_options_defaults() {
        let options = EntryOptions::new();
        assert!(options.expiration.is_none());
        assert!(!options.override_existing);

        let options = EntryOptions::new()
            .expiration(ExpirationPolicy::duration(Duration::from_secs(1)))
            .override_existing(true);
        assert!(options.expiration.is_some());
        assert!(options.override_existing);
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = CacheStorageBuilder::<String, u32>::new()
            .expiration_timer_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_builder_from_config() {
        let config = CacheConfig {
            expiration_timer_interval_ms: 250,
            dispose_values_on_removal: true,
        };
        let builder = CacheStorageBuilder::<String, u32>::from_config(&config);
        assert_eq!(builder.timer_interval, Duration::from_millis(250));
        assert!(builder.dispose_values_on_removal);
    }

    #[test]
    fn test_non_empty_validator() {
        assert!(validators::non_empty(&"key"));
        assert!(validators::non_empty(&"key".to_string()));
        assert!(!validators::non_empty(&""));
        assert!(!validators::non_empty(&"   ".to_string()));
    }
}
