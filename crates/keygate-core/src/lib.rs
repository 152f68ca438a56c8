//! Keygate Core - foundation for the local signing-authorization engine
//!
//! This crate holds what every other keygate crate agrees on: the unified
//! error type, validated domain types, configuration, the hash primitive and
//! the effect interfaces through which time and persistence are reached.
//!
//! # Effect Interfaces
//! - `ClockEffects`: wall clock, boot-relative monotonic clock, local hour
//! - `StorageEffects`: key/value persistence with a compare-and-set insert
//!
//! No implementation lives here; see `keygate-effects` and `keygate-testkit`.

#![forbid(unsafe_code)]

/// Tunable configuration with fixed defaults
pub mod config;

/// Pure effect interfaces
pub mod effects;

/// Unified error handling
pub mod errors;

/// Hash primitive used for the audit chain
pub mod hash;

/// Validated domain types
pub mod types;

pub use config::{AuditConfig, KeygateConfig, PermissionConfig, PolicyConfig, RateLimitConfig};
pub use effects::{ClockEffects, ClockReading, StorageEffects, StorageError};
pub use errors::{KeygateError, Result};
pub use hash::Hash32;
pub use types::{
    AuthLevel, CallerId, Decision, EventKind, GrantDuration, KindScope, RequestType, SignPolicy,
};
