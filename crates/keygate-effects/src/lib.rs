//! # Keygate Effects - production handlers
//!
//! Stateless implementations of the effect traits declared in `keygate-core`.
//! These are the only places allowed to touch the system clock or the
//! filesystem. Deterministic handlers for tests live in `keygate-testkit`.

#![forbid(unsafe_code)]

pub mod storage;
pub mod time;

pub use storage::{FilesystemStorageHandler, MemoryStorageHandler};
pub use time::RealClockHandler;
