//! Monotonic nanosecond time sources.
//!
//! The governor never reads a system clock directly. It is handed a
//! [`TimeSource`], which is either a real [`MonotonicClock`], a
//! [`ManualClock`] driven by tests and replays, or any `Fn() -> u64`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A zero-argument source of monotonically non-decreasing nanoseconds.
///
/// Must not be backed by the wall clock; behavior is undefined if time regresses.
pub trait TimeSource {
    fn now_nanos(&self) -> u64;
}

impl<F> TimeSource for F
where
    F: Fn() -> u64,
{
    fn now_nanos(&self) -> u64 {
        self()
    }
}

/// Nanoseconds elapsed since the clock was created, from `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        // u64 nanoseconds covers ~584 years of uptime
        self.origin.elapsed().as_nanos() as u64
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one clone and hand the
/// other to a governor.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_nanos: u64) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(start_nanos)),
        }
    }

    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    /// Moves the clock forward and returns the new time.
    pub fn advance(&self, nanos: u64) -> u64 {
        self.nanos.fetch_add(nanos, Ordering::SeqCst) + nanos
    }

    pub fn get(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

impl TimeSource for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(5);
        let other = clock.clone();
        assert_eq!(clock.advance(10), 15);
        assert_eq!(other.now_nanos(), 15);
        other.set(100);
        assert_eq!(clock.get(), 100);
    }

    #[test]
    fn closures_are_time_sources() {
        let source = || 42u64;
        assert_eq!(source.now_nanos(), 42);
    }

    #[test]
    fn monotonic_clock_does_not_regress() {
        let clock = MonotonicClock::new();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }
}
