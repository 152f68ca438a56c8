//! Keygate Testkit
//!
//! Deterministic effect handlers shared by the test suites of the other
//! crates. Depends only on `keygate-core` and `keygate-effects` so any crate
//! may use it as a dev-dependency.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

pub mod storage;
pub mod time;

pub use storage::FaultyStorage;
pub use time::{ControllableClock, DEFAULT_HOUR, DEFAULT_MONOTONIC_MS, DEFAULT_WALL_MS};
