//! Dual-clock lifetimes.
//!
//! A lifetime is stamped with both the wall clock and the monotonic clock at
//! creation. The wall clock alone can be moved by the user; the monotonic
//! clock cannot, but resets on reboot. Expiry is evaluated at read time and
//! any one failed check is enough to void the record.

use keygate_core::ClockReading;
use serde::{Deserialize, Serialize};

/// Creation stamps and bounds shared by permissions and app settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    /// Wall-clock expiry; `None` never expires by wall time
    pub expires_at: Option<u64>,
    /// Wall-clock milliseconds at creation
    pub created_at: u64,
    /// Monotonic milliseconds at creation
    pub created_at_monotonic: u64,
    /// Requested lifetime, re-checked against the monotonic clock
    pub duration_ms: Option<u64>,
}

/// Which check voided a lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryReason {
    /// Wall clock reached `expires_at`
    WallClockElapsed,
    /// `created_at` lies ahead of the wall clock by more than the tolerance
    CreatedInFuture,
    /// Monotonic time since creation reached `duration_ms`
    MonotonicElapsed,
    /// Monotonic clock is behind the creation stamp (reboot or regression)
    MonotonicRegression,
}

impl Lifetime {
    /// Lifetime starting at `now`, bounded by `duration_ms` if given.
    pub fn starting_at(now: ClockReading, duration_ms: Option<u64>) -> Self {
        Self {
            expires_at: duration_ms.map(|d| now.wall_ms.saturating_add(d)),
            created_at: now.wall_ms,
            created_at_monotonic: now.monotonic_ms,
            duration_ms,
        }
    }

    /// Unbounded lifetime starting at `now`.
    pub fn unbounded(now: ClockReading) -> Self {
        Self::starting_at(now, None)
    }

    /// The first failed check, if any.
    pub fn expiry_reason(&self, now: ClockReading, skew_tolerance_ms: u64) -> Option<ExpiryReason> {
        if self.created_at > now.wall_ms.saturating_add(skew_tolerance_ms) {
            return Some(ExpiryReason::CreatedInFuture);
        }
        if self.expires_at.is_some_and(|at| now.wall_ms >= at) {
            return Some(ExpiryReason::WallClockElapsed);
        }
        let duration = self.duration_ms?;
        if now.monotonic_ms < self.created_at_monotonic {
            return Some(ExpiryReason::MonotonicRegression);
        }
        if now.monotonic_ms - self.created_at_monotonic >= duration {
            return Some(ExpiryReason::MonotonicElapsed);
        }
        None
    }

    /// Whether any check fails.
    pub fn is_expired(&self, now: ClockReading, skew_tolerance_ms: u64) -> bool {
        self.expiry_reason(now, skew_tolerance_ms).is_some()
    }

    /// Age as the smaller of wall-clock and monotonic age.
    ///
    /// `None` when either clock contradicts the creation stamps, in which
    /// case the age cannot be trusted.
    ///
    /// The monotonic clock restarts at boot. Right after a reboot it is
    /// usually behind the creation stamp and the age is `None`; once uptime
    /// passes the stamp the monotonic delta is meaningless and the result is
    /// an age that is too small. A reboot and a forward wall-clock jump look
    /// the same from two readings, so neither is detected here. Both outcomes
    /// under-report the age, and callers must treat a young or unknown age
    /// as the stricter case.
    pub fn age_ms(&self, now: ClockReading) -> Option<u64> {
        let wall = now.wall_ms.checked_sub(self.created_at)?;
        let monotonic = now.monotonic_ms.checked_sub(self.created_at_monotonic)?;
        Some(wall.min(monotonic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: u64 = 60_000;
    const HOUR: u64 = 3_600_000;

    fn at(wall_ms: u64, monotonic_ms: u64) -> ClockReading {
        ClockReading::new(wall_ms, monotonic_ms)
    }

    #[test]
    fn fresh_lifetime_is_live() {
        let lifetime = Lifetime::starting_at(at(1_000_000, 5_000), Some(HOUR));
        assert_eq!(lifetime.expires_at, Some(1_000_000 + HOUR));
        assert_eq!(lifetime.expiry_reason(at(1_000_000, 5_000), TOLERANCE), None);
        assert!(!lifetime.is_expired(at(1_000_000 + HOUR - 1, 5_000 + HOUR - 1), TOLERANCE));
    }

    #[test]
    fn each_trigger_is_reported() {
        let lifetime = Lifetime::starting_at(at(10 * HOUR, 2 * HOUR), Some(HOUR));

        assert_eq!(
            lifetime.expiry_reason(at(11 * HOUR, 2 * HOUR + 10), TOLERANCE),
            Some(ExpiryReason::WallClockElapsed)
        );
        assert_eq!(
            lifetime.expiry_reason(at(10 * HOUR - TOLERANCE - 1, 2 * HOUR), TOLERANCE),
            Some(ExpiryReason::CreatedInFuture)
        );
        assert_eq!(
            lifetime.expiry_reason(at(10 * HOUR, 3 * HOUR), TOLERANCE),
            Some(ExpiryReason::MonotonicElapsed)
        );
        assert_eq!(
            lifetime.expiry_reason(at(10 * HOUR + 10, 1_000), TOLERANCE),
            Some(ExpiryReason::MonotonicRegression)
        );
    }

    #[test]
    fn skew_within_tolerance_is_accepted() {
        let lifetime = Lifetime::unbounded(at(10 * HOUR, 0));
        assert!(!lifetime.is_expired(at(10 * HOUR - TOLERANCE, 0), TOLERANCE));
    }

    #[test]
    fn unbounded_ignores_monotonic_reset() {
        let lifetime = Lifetime::unbounded(at(10 * HOUR, 5 * HOUR));
        assert!(!lifetime.is_expired(at(20 * HOUR, 10), TOLERANCE));
    }

    #[test]
    fn age_takes_the_smaller_clock() {
        let lifetime = Lifetime::unbounded(at(10 * HOUR, HOUR));
        // Wall clock pushed forward a day, monotonic says one hour passed.
        assert_eq!(lifetime.age_ms(at(35 * HOUR, 2 * HOUR)), Some(HOUR));
        assert_eq!(lifetime.age_ms(at(9 * HOUR, 2 * HOUR)), None);
        assert_eq!(lifetime.age_ms(at(11 * HOUR, 0)), None);
    }

    #[test]
    fn age_after_reboot_errs_young() {
        // Created a week in, five hours of uptime.
        let lifetime = Lifetime::unbounded(at(7 * 24 * HOUR, 5 * HOUR));
        // Rebooted a month later: uptime still below the stamp.
        assert_eq!(lifetime.age_ms(at(37 * 24 * HOUR, HOUR)), None);
        // Uptime has since passed the stamp: the age comes out small.
        assert_eq!(lifetime.age_ms(at(38 * 24 * HOUR, 6 * HOUR)), Some(HOUR));
    }
}
