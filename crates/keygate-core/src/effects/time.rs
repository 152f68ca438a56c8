//! Clock effect definitions.
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `keygate-effects` (production), `keygate-testkit` (controllable)
//! - **Usage**: every component that reasons about time
//!
//! Business logic never reads the system clock directly. It asks a
//! `ClockEffects` implementation for one of three readings:
//!
//! - wall-clock milliseconds since the Unix epoch (user adjustable)
//! - monotonic milliseconds since an arbitrary origin that survives process
//!   restarts but resets on device reboot (not user adjustable)
//! - the local hour of day, for unusual-time heuristics
//!
//! Comparing the two clocks is what lets expiry checks detect wall-clock
//! manipulation.

use serde::{Deserialize, Serialize};

/// Both clocks sampled together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockReading {
    /// Wall-clock milliseconds since the Unix epoch
    pub wall_ms: u64,
    /// Boot-relative monotonic milliseconds
    pub monotonic_ms: u64,
}

impl ClockReading {
    /// Construct a reading from raw values.
    pub fn new(wall_ms: u64, monotonic_ms: u64) -> Self {
        Self {
            wall_ms,
            monotonic_ms,
        }
    }
}

/// Source of time for the policy engine.
///
/// Implementations must be cheap and infallible; they are called inside
/// critical sections.
pub trait ClockEffects: Send + Sync {
    /// Wall-clock milliseconds since the Unix epoch.
    fn physical_time_ms(&self) -> u64;

    /// Monotonic milliseconds since an arbitrary boot-relative origin.
    fn monotonic_time_ms(&self) -> u64;

    /// Local hour of day in `0..=23`.
    fn local_hour(&self) -> u8;

    /// Sample both clocks.
    fn reading(&self) -> ClockReading {
        ClockReading {
            wall_ms: self.physical_time_ms(),
            monotonic_ms: self.monotonic_time_ms(),
        }
    }
}

/// Blanket implementation for Arc<T> where T: ClockEffects
impl<T: ClockEffects + ?Sized> ClockEffects for std::sync::Arc<T> {
    fn physical_time_ms(&self) -> u64 {
        (**self).physical_time_ms()
    }

    fn monotonic_time_ms(&self) -> u64 {
        (**self).monotonic_time_ms()
    }

    fn local_hour(&self) -> u8 {
        (**self).local_hour()
    }

    fn reading(&self) -> ClockReading {
        (**self).reading()
    }
}
