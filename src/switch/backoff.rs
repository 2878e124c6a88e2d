// live-sessions-service/src/switch/backoff.rs

use std::time::Duration;

/// Fibonacci reconnect delays: 1, 1, 2, 3, 5, 8, ... units, capped at `max`.
///
/// A zero `max` disables the cap.
#[derive(Debug, Clone)]
pub struct FibBackoff {
    prev: u64,
    current: u64,
    unit: Duration,
    max: Duration,
}

impl FibBackoff {
    pub fn new(unit: Duration, max: Duration) -> Self {
        Self {
            prev: 0,
            current: 1,
            unit,
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let steps = self.current;
        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next;

        let delay = self.unit.saturating_mul(u32::try_from(steps).unwrap_or(u32::MAX));
        if !self.max.is_zero() && delay > self.max {
            self.max
        } else {
            delay
        }
    }
}

impl Iterator for FibBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}
