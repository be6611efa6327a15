//! Cache Storage - A thread-safe in-memory cache with expiration policies
//!
//! Provides keyed storage with absolute, sliding, and duration expiration,
//! a background expiration timer, cancellable expiry events, and optional
//! release of evicted values.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{CacheStorage, CacheStorageBuilder, EntryOptions, ExpirationPolicy};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
