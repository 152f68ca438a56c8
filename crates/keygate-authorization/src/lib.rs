//! Keygate Authorization
//!
//! The decision half of the engine:
//!
//! - **Classifier** (`kinds`): which event kinds are sensitive
//! - **Expiry** (`expiry`): dual-clock lifetimes that resist wall-clock
//!   manipulation and detect reboots
//! - **Permission store** (`store`): one decision per (caller, request type,
//!   kind scope), plus per-caller settings
//! - **Risk assessor** (`risk`): additive score mapped to a required
//!   authentication level
//! - **Rate limiter** (`rate_limit`): fixed window per caller
//!
//! Composition into a request-answering engine happens in `keygate-agent`.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

pub mod expiry;
pub mod kinds;
pub mod locks;
pub mod permission;
pub mod rate_limit;
pub mod risk;
pub mod store;

pub use expiry::{ExpiryReason, Lifetime};
pub use kinds::{classify, is_sensitive, sensitive_warning, KindClass, REPLACEABLE_RANGE};
pub use locks::KeyedLocks;
pub use permission::{AppSettings, ConnectedApp, Permission};
pub use rate_limit::RateLimiter;
pub use risk::{
    required_auth_for, score, score_factors, RiskAssessment, RiskAssessor, RiskFactor, RiskSignals,
};
pub use store::{CleanupReport, PermissionStore};
