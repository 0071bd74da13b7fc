use lazy_static::lazy_static;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

lazy_static! {
    static ref START: Instant = Instant::now();
}

// Monotonic millisecond time source. Injected so rate estimation can be
// driven by a simulated clock in tests.
pub trait Clock: Send + Sync {
    fn time_millis(&self) -> i64;
}

// Milliseconds elapsed since the first clock use in this process.
#[derive(Default)]
pub struct RealTimeClock;

impl Clock for RealTimeClock {
    fn time_millis(&self) -> i64 {
        START.elapsed().as_millis() as i64
    }
}

// Manually advanced clock for tests.
pub struct SimulatedClock {
    now_ms: AtomicI64,
}

impl SimulatedClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::Relaxed);
    }

    pub fn set_millis(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::Relaxed);
    }
}

impl Clock for SimulatedClock {
    fn time_millis(&self) -> i64 {
        self.now_ms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simulated_clock_advances() {
        let clock = SimulatedClock::new(1000);
        assert_eq!(clock.time_millis(), 1000);
        clock.advance_ms(33);
        assert_eq!(clock.time_millis(), 1033);
        clock.set_millis(0);
        assert_eq!(clock.time_millis(), 0);
    }

    #[test]
    fn real_time_clock_is_monotonic() {
        let clock = RealTimeClock;
        let first = clock.time_millis();
        let second = clock.time_millis();
        assert!(second >= first);
        assert!(first >= 0);
    }
}
