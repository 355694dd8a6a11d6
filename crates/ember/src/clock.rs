use std::ops::Add;

use once_cell::sync::OnceCell;
use quanta::Clock;

/// Poll timeout used when no deadline is queued anywhere.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10_000;

static GLOBAL_CLOCK: OnceCell<Clock> = OnceCell::new();

fn global_clock() -> &'static Clock {
    GLOBAL_CLOCK.get_or_init(Clock::new)
}

/// Absolute monotonic milliseconds since an arbitrary process-local epoch.
///
/// All deadlines (expiration, idle eviction, poll timeouts) are expressed in
/// this unit. The loop samples `now` once per iteration and threads it through
/// every accessor, so one iteration observes a single consistent timestamp.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonoMs(pub u64);

impl MonoMs {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn now() -> Self {
        let clock = global_clock();
        Self(clock.delta_as_nanos(0, clock.raw()) / 1_000_000)
    }

    /// Milliseconds from `now` until `self`, clamped to 0 once past.
    #[inline]
    pub fn ms_until(self, now: Self) -> u64 {
        self.0.saturating_sub(now.0)
    }

    #[inline]
    pub fn saturating_sub(self, other: Self) -> u64 {
        self.0.saturating_sub(other.0)
    }

    /// Shifts by a signed millisecond delta, saturating at both ends.
    #[inline]
    pub fn offset(self, delta_ms: i64) -> Self {
        if delta_ms >= 0 {
            Self(self.0.saturating_add(delta_ms as u64))
        } else {
            Self(self.0.saturating_sub(delta_ms.unsigned_abs()))
        }
    }
}

impl Add<u64> for MonoMs {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let a = MonoMs::now();
        let b = MonoMs::now();
        assert!(b >= a);
    }

    #[test]
    fn deadline_arithmetic() {
        let now = MonoMs(1_000);
        assert_eq!((now + 250).ms_until(now), 250);
        assert_eq!(now.ms_until(now + 250), 0);
        assert_eq!(now.offset(-1_500), MonoMs::ZERO);
        assert_eq!(now.offset(500), MonoMs(1_500));
    }
}
