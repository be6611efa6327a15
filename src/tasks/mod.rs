//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside a cache storage.
//!
//! # Tasks
//! - Expiration timer: sweeps expired entries at the configured interval

mod expiration_timer;

pub(crate) use expiration_timer::{ExpirationTimer, Sweep};
