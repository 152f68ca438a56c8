//! Effect interfaces (no implementations)
//!
//! Production handlers live in `keygate-effects`; deterministic handlers for
//! tests live in `keygate-testkit`.

pub mod storage;
pub mod time;

pub use storage::{StorageEffects, StorageError};
pub use time::{ClockEffects, ClockReading};
