//! Monotonic tick source for call deadlines.

use std::time::{Duration, Instant};

/// Millisecond ticks since the owning connection was created.
///
/// Deadlines are absolute tick values; `0` means "no deadline".
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current tick, rounded down.
    pub fn now(&self) -> u64 {
        duration_ms_floor(self.origin.elapsed())
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Absolute deadline `timeout` from now, or `0` for a zero timeout.
    ///
    /// Rounded up once, so a deadline compared against [`Clock::now`] fires
    /// no earlier than `timeout` and less than a tick after it.
    pub fn deadline_after(&self, timeout: Duration) -> u64 {
        if timeout.is_zero() {
            return 0;
        }
        duration_ms_ceil(self.origin.elapsed().saturating_add(timeout)).max(1)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn duration_ms_floor(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn duration_ms_ceil(d: Duration) -> u64 {
    let ms = duration_ms_floor(d);
    if d > Duration::from_millis(ms) {
        ms.saturating_add(1)
    } else {
        ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeout_has_no_deadline() {
        assert_eq!(Clock::new().deadline_after(Duration::ZERO), 0);
    }

    #[test]
    fn test_deadline_is_never_early() {
        let clock = Clock::new();
        let start = clock.now();
        let deadline = clock.deadline_after(Duration::from_micros(1500));
        assert!(deadline >= start + 2);
    }

    #[test]
    fn test_deadline_rounds_once() {
        let clock = Clock::new();
        let timeout = Duration::from_micros(10_300);
        let before = clock.elapsed();
        let deadline = clock.deadline_after(timeout);
        let after = clock.elapsed();

        assert!(deadline >= duration_ms_ceil(before + timeout));
        assert!(deadline <= duration_ms_ceil(after + timeout));
        // Fires within one tick of the exact expiry.
        assert!(Duration::from_millis(deadline) < after + timeout + Duration::from_millis(1));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(duration_ms_ceil(Duration::from_millis(3)), 3);
        assert_eq!(duration_ms_ceil(Duration::from_micros(3001)), 4);
        assert_eq!(duration_ms_floor(Duration::from_micros(3999)), 3);
    }
}
