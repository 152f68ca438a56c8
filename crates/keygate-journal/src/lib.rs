//! Hash-chained audit journal for keygate
//!
//! Every decision the engine makes, automatic or interactive, is appended
//! here. Each entry commits to its predecessor's hash, so editing or
//! removing any entry is detectable by replaying the chain.
//!
//! # Architecture
//!
//! - **Entries**: immutable records with a canonical byte form (`entry`)
//! - **Log**: append, paged reads, usage queries, retention (`log`)
//! - **Verification**: pure replay from genesis or a retention checkpoint (`verify`)
//!
//! Retention removes a prefix of the chain and records the last removed hash
//! as a checkpoint, so the surviving suffix stays verifiable.

#![forbid(unsafe_code)]

pub mod entry;
pub mod log;
pub mod verify;

pub use entry::{canonical_bytes, compute_entry_hash, AuditLogEntry, AuditRecord, GENESIS_HASH};
pub use log::{AuditLog, RetentionReport};
pub use verify::{verify_entries, ChainBreak, ChainCheckpoint, ChainVerification};
