//! Single-slot time-bounded cache for the expensive metric sources.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Default time a GPU or storage reading is served without re-querying.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Monotonic time source, swapped for a fake in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    last_fetch: Option<Instant>,
}

/// A value plus the time it was fetched.
///
/// The value and timestamp are swapped together under a short lock that is
/// never held across a source query, so concurrent callers may both miss and
/// both refetch; the last store wins.
pub struct TtlCache<T> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entry: Mutex<CacheEntry<T>>,
}

impl<T: Clone> TtlCache<T> {
    /// Empty cache holding `initial` as the cold-start value.
    pub fn new(initial: T, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entry: Mutex::new(CacheEntry {
                value: initial,
                last_fetch: None,
            }),
        }
    }

    /// The cached value if it was fetched less than one TTL ago.
    ///
    /// A fetch time that lies ahead of `now` counts as expired.
    pub fn fresh(&self) -> Option<T> {
        let now = self.clock.now();
        let entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        let age = entry
            .last_fetch
            .and_then(|last_fetch| now.checked_duration_since(last_fetch))?;
        (age < self.ttl).then(|| entry.value.clone())
    }

    /// The cached value regardless of age.
    pub fn last(&self) -> T {
        self.entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .value
            .clone()
    }

    /// Replace the value and restart its TTL window.
    pub fn store(&self, value: T) {
        let now = self.clock.now();
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry.value = value;
        entry.last_fetch = Some(now);
    }
}

#[cfg(test)]
pub mod test_clock {
    use super::*;

    /// Manually moved clock.
    pub struct FakeClock {
        now: Mutex<Instant>,
    }

    impl FakeClock {
        pub fn new() -> Arc<Self> {
            // Far enough from the origin that `rewind` cannot underflow.
            let start = Instant::now() + Duration::from_secs(3600);
            Arc::new(Self {
                now: Mutex::new(start),
            })
        }

        pub fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }

        pub fn rewind(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now = now.checked_sub(by).unwrap();
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }
}
