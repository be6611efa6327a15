//! Error types for the cache storage
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key rejected by the configured key validator
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Storage could not be built from the supplied settings
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache storage.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::InvalidKey("\"\"".to_string());
        assert_eq!(err.to_string(), "Invalid key: \"\"");

        let err = CacheError::InvalidConfiguration("interval must be non-zero".to_string());
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}
