//! Configuration Module
//!
//! Serializable settings for a cache storage. The parts that cannot be
//! serialized (policy factory, key validator, release callback) live on
//! [`CacheStorageBuilder`](crate::cache::CacheStorageBuilder).

use std::time::Duration;

use serde::Deserialize;

/// Default sweep period of the expiration timer in milliseconds
pub const DEFAULT_TIMER_INTERVAL_MS: u64 = 1000;

/// Cache storage configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Period between expiration sweeps in milliseconds
    pub expiration_timer_interval_ms: u64,
    /// Whether removed or expired values are handed to the release callback
    pub dispose_values_on_removal: bool,
}

impl CacheConfig {
    /// Returns the sweep period as a `Duration`.
    pub fn expiration_timer_interval(&self) -> Duration {
        Duration::from_millis(self.expiration_timer_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration_timer_interval_ms: DEFAULT_TIMER_INTERVAL_MS,
            dispose_values_on_removal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.expiration_timer_interval_ms, 1000);
        assert!(!config.dispose_values_on_removal);
        assert_eq!(config.expiration_timer_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"expiration_timer_interval_ms":250}"#).unwrap();
        assert_eq!(config.expiration_timer_interval(), Duration::from_millis(250));
        assert!(!config.dispose_values_on_removal);
    }

    #[test]
    fn test_config_deserialize_full() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"expiration_timer_interval_ms":50,"dispose_values_on_removal":true}"#,
        )
        .unwrap();
        assert_eq!(config.expiration_timer_interval_ms, 50);
        assert!(config.dispose_values_on_removal);
    }
}
