//! Wall Clock Abstraction
//!
//! Object names are derived from the instant an object was opened. Routing that
//! instant through a trait keeps names deterministic under test while production
//! reads the system clock.
//!
//! The idle timer is not driven from here; it runs on `tokio::time` so that
//! tests can pause and advance the runtime independently of naming.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Clock trait for the open timestamp of new objects
///
/// Implementations:
/// - `SystemClock`: Uses real system time
/// - `SimulatedClock`: Uses controlled virtual time for tests and DST
pub trait WallClock: Send + Sync + 'static {
    /// Get current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock using real system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances when explicitly told to via `advance()` or `set()`.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    /// Current virtual time in milliseconds since the Unix epoch
    time_ms: Arc<AtomicI64>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedClock {
    /// Create a new simulated clock starting at the given Unix time in milliseconds
    pub fn new(start_ms: i64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// Create a clock frozen at the given instant
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self::new(instant.timestamp_millis())
    }

    /// Advance time by the given duration
    pub fn advance(&self, duration: Duration) {
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Advance time by milliseconds
    pub fn advance_ms(&self, ms: i64) {
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set time to a specific value
    pub fn set(&self, time_ms: i64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }

    /// Get current time in milliseconds
    pub fn current_ms(&self) -> i64 {
        self.time_ms.load(Ordering::SeqCst)
    }
}

impl WallClock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        // Out-of-range values clamp to the epoch rather than panic
        Utc.timestamp_millis_opt(self.current_ms())
            .single()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();

        assert!(t2 > t1, "Time should advance");
    }

    #[test]
    fn test_simulated_clock_deterministic() {
        let clock = SimulatedClock::new(1_000);

        // Time doesn't advance on its own
        assert_eq!(clock.now(), clock.now());

        clock.advance_ms(100);
        assert_eq!(clock.current_ms(), 1_100);

        clock.set(5_000);
        assert_eq!(clock.now().timestamp_millis(), 5_000);
    }

    #[test]
    fn test_simulated_clock_shared() {
        let clock = SimulatedClock::new(0);
        let clock2 = clock.clone();

        clock.advance(Duration::from_secs(2));
        assert_eq!(clock2.current_ms(), 2_000, "Clones should share state");
    }

    #[test]
    fn test_simulated_clock_at() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap();
        let clock = SimulatedClock::at(instant);
        assert_eq!(clock.now(), instant);
    }
}
