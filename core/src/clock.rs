//! Time sources for circuit breaker bookkeeping
//!
//! All breaker timestamps are `Duration`s measured from the clock's own epoch.
//! `MonotonicClock` anchors on an `Instant` so NTP adjustments never move the
//! recovery window; `ManualClock` only moves when told to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source used by the circuit breaker
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since this clock's epoch
    fn now(&self) -> Duration;
}

/// Real monotonic clock anchored at construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Hand-driven clock for deterministic tests
///
/// Starts at zero and advances only through [`ManualClock::advance`] or
/// [`ManualClock::set`].
///
/// # Example
///
/// ```rust
/// use tripwire::{CircuitBreaker, ManualClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new());
/// let circuit = CircuitBreaker::builder("inventory")
///     .failure_threshold(1)
///     .recovery_timeout(Duration::from_secs(10))
///     .clock(clock.clone())
///     .build()
///     .unwrap();
///
/// let _ = circuit.call(|| Err::<(), _>("boom"));
/// assert!(circuit.is_open());
///
/// clock.advance(Duration::from_secs(11));
/// assert!(circuit.call(|| Ok::<_, &str>("recovered")).is_ok());
/// assert!(circuit.is_closed());
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let by = saturating_nanos(by);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(by)));
    }

    /// Jump to an absolute reading
    pub fn set(&self, at: Duration) {
        self.nanos.store(saturating_nanos(at), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();

        let time1 = clock.now();
        std::thread::sleep(Duration::from_millis(10));
        let time2 = clock.now();

        assert!(time2 > time1);
    }

    #[test]
    fn test_manual_clock_starts_at_zero() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::new();

        clock.advance(Duration::from_millis(1500));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Duration::from_secs(2));

        clock.set(Duration::from_secs(42));
        assert_eq!(clock.now(), Duration::from_secs(42));
    }

    #[test]
    fn test_manual_clock_advance_saturates() {
        let clock = ManualClock::new();
        let ceiling = Duration::from_nanos(u64::MAX);

        clock.set(ceiling - Duration::from_secs(1));
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), ceiling);

        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), ceiling);
    }

    #[test]
    fn test_manual_clock_is_shared_across_threads() {
        use std::sync::Arc;

        let clock = Arc::new(ManualClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || clock.advance(Duration::from_secs(1)))
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(clock.now(), Duration::from_secs(4));
    }
}
