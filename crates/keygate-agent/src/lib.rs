//! Keygate Agent - the policy engine
//!
//! Composes the clock, storage, permission store, risk assessor, rate
//! limiter and audit log into a single [`PolicyEngine`] that answers ALLOW,
//! DENY or ASK for each signing request and persists the user's answers.
//!
//! The engine performs no scheduling of its own: expiry and retention sweeps
//! are triggered from outside (see the `keygate` binary).

#![forbid(unsafe_code)]
#![allow(missing_docs)]

pub mod config;
pub mod engine;
pub mod request;
pub mod session;

pub use config::{load_config, parse_config};
pub use engine::{FilesystemPolicyEngine, PolicyEngine};
pub use request::{ApplyTo, DenyReason, Resolution, SigningRequest, Verdict};
pub use session::{PendingPrompt, PromptSessions, PromptTicket};
