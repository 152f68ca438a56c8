//! Controllable clock for deterministic tests
//!
//! Wall and monotonic clocks move independently so tests can stage the three
//! manipulation scenarios the expiry logic must catch: wall clock rolled
//! back, wall clock pushed forward, and a reboot that resets the monotonic
//! clock.

use keygate_core::effects::ClockEffects;
use parking_lot::Mutex;
use std::sync::Arc;

/// 2024-01-01T00:00:00Z
pub const DEFAULT_WALL_MS: u64 = 1_704_067_200_000;
/// One day of uptime
pub const DEFAULT_MONOTONIC_MS: u64 = 86_400_000;
/// Mid-day, outside any unusual-hour window
pub const DEFAULT_HOUR: u8 = 12;

#[derive(Debug, Clone, Copy)]
struct ClockState {
    wall_ms: u64,
    monotonic_ms: u64,
    hour: u8,
}

/// Shared, cloneable test clock
#[derive(Debug, Clone)]
pub struct ControllableClock {
    state: Arc<Mutex<ClockState>>,
}

impl ControllableClock {
    /// Clock at the given wall and monotonic readings, hour 12.
    pub fn new(wall_ms: u64, monotonic_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                wall_ms,
                monotonic_ms,
                hour: DEFAULT_HOUR,
            })),
        }
    }

    /// Advance both clocks together, as real time passing would.
    pub fn advance(&self, ms: u64) {
        let mut state = self.state.lock();
        state.wall_ms += ms;
        state.monotonic_ms += ms;
    }

    /// Move only the wall clock forward.
    pub fn advance_wall(&self, ms: u64) {
        self.state.lock().wall_ms += ms;
    }

    /// Move only the wall clock backward.
    pub fn rewind_wall(&self, ms: u64) {
        let mut state = self.state.lock();
        state.wall_ms = state.wall_ms.saturating_sub(ms);
    }

    /// Move only the monotonic clock forward.
    pub fn advance_monotonic(&self, ms: u64) {
        self.state.lock().monotonic_ms += ms;
    }

    /// Simulate a reboot: the monotonic clock restarts at `uptime_ms`.
    pub fn reboot(&self, uptime_ms: u64) {
        self.state.lock().monotonic_ms = uptime_ms;
    }

    /// Set the absolute wall clock.
    pub fn set_wall(&self, wall_ms: u64) {
        self.state.lock().wall_ms = wall_ms;
    }

    /// Set the local hour reported to heuristics.
    pub fn set_hour(&self, hour: u8) {
        self.state.lock().hour = hour % 24;
    }
}

impl Default for ControllableClock {
    fn default() -> Self {
        Self::new(DEFAULT_WALL_MS, DEFAULT_MONOTONIC_MS)
    }
}

impl ClockEffects for ControllableClock {
    fn physical_time_ms(&self) -> u64 {
        self.state.lock().wall_ms
    }

    fn monotonic_time_ms(&self) -> u64 {
        self.state.lock().monotonic_ms
    }

    fn local_hour(&self) -> u8 {
        self.state.lock().hour
    }

    fn reading(&self) -> keygate_core::ClockReading {
        let state = self.state.lock();
        keygate_core::ClockReading::new(state.wall_ms, state.monotonic_ms)
    }
}
