use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Microsecond time source driving step timing.
///
/// Implementations must be monotonic: wall clock adjustments would corrupt
/// the interval between two steps.
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

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

impl Clock for MonotonicClock {
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when slept on or advanced explicitly.
///
/// Used by simulations and tests so that homing and ramp runs are
/// deterministic and do not wait for real time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(micros: u64) -> Self {
        Self {
            now: AtomicU64::new(micros),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_on_sleep() {
        let clock = ManualClock::starting_at(10);
        assert_eq!(clock.now_micros(), 10);

        clock.sleep(Duration::from_millis(2));
        assert_eq!(clock.now_micros(), 2010);

        clock.advance(Duration::from_micros(5));
        assert_eq!(clock.now_micros(), 2015);
    }

    #[test]
    fn monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let first = clock.now_micros();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.now_micros() >= first + 1000);
    }
}
