//! Time source used by the cache, the rate limiter, and the gateway.
//!
//! Production code uses [`SystemClock`]; tests inject a [`MockClock`] and move
//! time explicitly so that TTL expiry and sliding windows are deterministic.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::UtcDateTime;

/// Port for obtaining the current wall-clock instant.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> UtcDateTime;
}

/// System clock backed by `OffsetDateTime::now_utc()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Controllable clock for tests.
///
/// Clones share the same underlying time, so advancing one clone moves every
/// component holding another.
///
/// ```
/// use leadgate_core::clock::{Clock, MockClock};
/// use leadgate_core::UtcDateTime;
/// use std::time::Duration;
///
/// let start = UtcDateTime::parse("2024-01-01T00:00:00Z").unwrap();
/// let clock = MockClock::new(start);
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start.checked_add(Duration::from_secs(10)).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<UtcDateTime>>,
}

impl MockClock {
    pub fn new(start: UtcDateTime) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut time = self
            .current_time
            .lock()
            .expect("mock clock lock is not poisoned");
        *time = time.saturating_add(duration);
    }

    pub fn set(&self, instant: UtcDateTime) {
        let mut time = self
            .current_time
            .lock()
            .expect("mock clock lock is not poisoned");
        *time = instant;
    }
}

impl Clock for MockClock {
    fn now(&self) -> UtcDateTime {
        *self
            .current_time
            .lock()
            .expect("mock clock lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_and_sets() {
        let start = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid");
        let clock = MockClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(10));
        assert_eq!(
            clock.now().saturating_duration_since(start),
            Duration::from_secs(10)
        );

        let later = UtcDateTime::parse("2024-06-01T00:00:00Z").expect("valid");
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn clones_share_time() {
        let start = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid");
        let clock = MockClock::new(start);
        let shared = clock.clone();

        shared.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), shared.now());
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
