//! Expiration Policy Module
//!
//! Pure decision functions answering "is this entry expired at `now`" and
//! "what does the policy look like after an access at `now`".

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Predicate used by [`ExpirationPolicy::Custom`].
pub type ExpirationPredicate = Arc<dyn Fn(Instant) -> bool + Send + Sync>;

// == Expiration Policy ==
/// Decides whether and when a cached entry expires.
///
/// Policies are immutable values. Accessing an entry never mutates its
/// policy in place; [`on_accessed`](Self::on_accessed) returns the policy to
/// use from then on.
///
/// A deadline of `None` lies beyond what `Instant` can represent, so a span
/// such as `Duration::MAX` never expires.
#[derive(Clone)]
pub enum ExpirationPolicy {
    /// Expires at a fixed instant regardless of access.
    Absolute { expires_at: Option<Instant> },
    /// Expires `window` after the last access.
    Sliding { window: Duration, expires_at: Option<Instant> },
    /// Expires `ttl` after insertion, unaffected by access.
    Duration { ttl: Duration, expires_at: Option<Instant> },
    /// Expires once the predicate returns true.
    Custom(ExpirationPredicate),
}

impl ExpirationPolicy {
    // == Constructors ==
    /// Expires at `expires_at`. An instant in the past is not an error; the
    /// entry becomes eligible for eviction on the next check.
    pub fn absolute(expires_at: Instant) -> Self {
        Self::Absolute {
            expires_at: Some(expires_at),
        }
    }

    /// Expires at a wall-clock deadline.
    pub fn absolute_at(deadline: DateTime<Utc>) -> Self {
        let now = Instant::now();
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        Self::Absolute {
            expires_at: deadline_after(now, remaining),
        }
    }

    /// Expires `window` after the most recent access.
    pub fn sliding(window: Duration) -> Self {
        Self::Sliding {
            window,
            expires_at: deadline_after(Instant::now(), window),
        }
    }

    /// Expires `ttl` after insertion.
    pub fn duration(ttl: Duration) -> Self {
        Self::Duration {
            ttl,
            expires_at: deadline_after(Instant::now(), ttl),
        }
    }

    /// Expires as soon as `predicate` returns true.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(Instant) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    // == Is Expired ==
    /// Checks whether the policy considers the entry expired at `now`.
    ///
    /// The boundary is inclusive: an entry is expired once `now` reaches the
    /// deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Self::Absolute { expires_at }
            | Self::Sliding { expires_at, .. }
            | Self::Duration { expires_at, .. } => expires_at.is_some_and(|at| now >= at),
            Self::Custom(predicate) => predicate(now),
        }
    }

    // == On Accessed ==
    /// Returns the policy that applies after an access at `now`.
    pub fn on_accessed(&self, now: Instant) -> Self {
        match self {
            Self::Sliding { window, .. } => Self::Sliding {
                window: *window,
                expires_at: deadline_after(now, *window),
            },
            other => other.clone(),
        }
    }

    /// Re-bases relative policies on the insertion instant.
    pub(crate) fn starting_at(&self, now: Instant) -> Self {
        match self {
            Self::Sliding { window, .. } => Self::Sliding {
                window: *window,
                expires_at: deadline_after(now, *window),
            },
            Self::Duration { ttl, .. } => Self::Duration {
                ttl: *ttl,
                expires_at: deadline_after(now, *ttl),
            },
            other => other.clone(),
        }
    }

    /// Returns true when an access moves the deadline.
    pub fn can_reset(&self) -> bool {
        matches!(self, Self::Sliding { .. })
    }

    /// Returns the deadline, if the policy has one.
    pub fn expires_at(&self) -> Option<Instant> {
        match self {
            Self::Absolute { expires_at }
            | Self::Sliding { expires_at, .. }
            | Self::Duration { expires_at, .. } => *expires_at,
            Self::Custom(_) => None,
        }
    }
}

/// `start + span`, or `None` when the sum overflows `Instant`.
fn deadline_after(start: Instant, span: Duration) -> Option<Instant> {
    start.checked_add(span)
}

impl fmt::Debug for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute { expires_at } => f
                .debug_struct("Absolute")
                .field("expires_at", expires_at)
                .finish(),
            Self::Sliding { window, expires_at } => f
                .debug_struct("Sliding")
                .field("window", window)
                .field("expires_at", expires_at)
                .finish(),
            Self::Duration { ttl, expires_at } => f
                .debug_struct("Duration")
                .field("ttl", ttl)
                .field("expires_at", expires_at)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_absolute_expiration() {
        let now = Instant::now();
        let policy = ExpirationPolicy::absolute(now + Duration::from_secs(10));

        assert!(!policy.is_expired(now));
        assert!(policy.is_expired(now + Duration::from_secs(10)));
        assert!(!policy.can_reset());
    }

    #[test]
    fn test_absolute_in_the_past_is_expired() {
        let now = Instant::now();
        let past = now.checked_sub(Duration::from_secs(1)).unwrap_or(now);
        let policy = ExpirationPolicy::absolute(past);

        assert!(policy.is_expired(now));
    }

    #[test]
    fn test_absolute_at_wall_clock() {
        let policy = ExpirationPolicy::absolute_at(Utc::now() + chrono::Duration::seconds(60));
        assert!(!policy.is_expired(Instant::now()));

        let policy = ExpirationPolicy::absolute_at(Utc::now() - chrono::Duration::seconds(60));
        assert!(policy.is_expired(Instant::now()));
    }

    #[test]
    fn test_sliding_resets_on_access() {
        let start = Instant::now();
        let policy = ExpirationPolicy::sliding(Duration::from_millis(100)).starting_at(start);

        let touched = policy.on_accessed(start + Duration::from_millis(80));
        assert!(policy.is_expired(start + Duration::from_millis(120)));
        assert!(!touched.is_expired(start + Duration::from_millis(120)));
        assert!(touched.is_expired(start + Duration::from_millis(180)));
        assert!(touched.can_reset());
    }

    #[test]
    fn test_duration_ignores_access() {
        let start = Instant::now();
        let policy = ExpirationPolicy::duration(Duration::from_millis(100)).starting_at(start);

        let touched = policy.on_accessed(start + Duration::from_millis(90));
        assert_eq!(touched.expires_at(), policy.expires_at());
        assert!(touched.is_expired(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_starting_at_rebases_relative_policies() {
        let policy = ExpirationPolicy::duration(Duration::from_secs(1));
        let later = Instant::now() + Duration::from_secs(5);

        let rebased = policy.starting_at(later);
        assert_eq!(rebased.expires_at(), Some(later + Duration::from_secs(1)));
    }

    #[test]
    fn test_custom_predicate() {
        let flag = Arc::new(AtomicBool::new(false));
        let observed = flag.clone();
        let policy = ExpirationPolicy::custom(move |_| observed.load(Ordering::SeqCst));

        assert!(!policy.is_expired(Instant::now()));
        flag.store(true, Ordering::SeqCst);
        assert!(policy.is_expired(Instant::now()));
        assert!(policy.expires_at().is_none());
        assert_eq!(format!("{:?}", policy), "Custom(..)");
    }

    #[test]
    fn test_unbounded_spans_never_expire() {
        let start = Instant::now();
        let far = start + Duration::from_secs(100 * 365 * 24 * 3600);

        let sliding = ExpirationPolicy::sliding(Duration::MAX);
        assert!(sliding.expires_at().is_none());
        assert!(!sliding.is_expired(far));
        assert!(!sliding.on_accessed(start).is_expired(far));
        assert!(!sliding.starting_at(start).is_expired(far));

        let duration = ExpirationPolicy::duration(Duration::from_secs(u64::MAX / 2));
        assert!(!duration.starting_at(start).is_expired(far));
    }

    #[test]
    fn test_absolute_at_far_future_never_expires() {
        let policy = ExpirationPolicy::absolute_at(chrono::DateTime::<Utc>::MAX_UTC);
        assert!(!policy.is_expired(Instant::now() + Duration::from_secs(3600)));
    }
}
