//! Production clock handler
//!
//! Stateless apart from the monotonic anchor captured at construction. This
//! is the only place in the workspace that reads the system clocks.

use chrono::Timelike;
use keygate_core::effects::ClockEffects;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use sysinfo::System;

/// Real clock handler for production use
///
/// The monotonic reading is the system uptime sampled once at construction
/// plus the process-local `Instant` elapsed since then. It therefore keeps
/// counting across process restarts, cannot be moved by changing the wall
/// clock, and starts over after a reboot.
#[derive(Debug, Clone)]
pub struct RealClockHandler {
    boot_offset_ms: u64,
    anchor: Instant,
}

impl RealClockHandler {
    /// Create a handler anchored at the current uptime.
    #[allow(clippy::disallowed_methods)]
    pub fn new() -> Self {
        Self {
            boot_offset_ms: System::uptime().saturating_mul(1000),
            anchor: Instant::now(),
        }
    }
}

impl Default for RealClockHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockEffects for RealClockHandler {
    #[allow(clippy::disallowed_methods)]
    fn physical_time_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    fn monotonic_time_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.boot_offset_ms.saturating_add(elapsed)
    }

    #[allow(clippy::disallowed_methods)]
    fn local_hour(&self) -> u8 {
        chrono::Local::now().hour() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_after_2020() {
        let handler = RealClockHandler::new();
        assert!(handler.physical_time_ms() > 1_577_836_800_000);
    }

    #[test]
    fn monotonic_never_decreases() {
        let handler = RealClockHandler::new();
        let first = handler.monotonic_time_ms();
        std::thread::sleep(Duration::from_millis(5));
        let second = handler.monotonic_time_ms();
        assert!(second >= first + 5);
    }

    #[test]
    fn local_hour_in_range() {
        assert!(RealClockHandler::new().local_hour() < 24);
    }

    #[test]
    fn reading_samples_both_clocks() {
        let handler = RealClockHandler::new();
        let reading = handler.reading();
        assert!(reading.wall_ms > 0);
        assert!(reading.monotonic_ms >= handler.boot_offset_ms);
    }
}
