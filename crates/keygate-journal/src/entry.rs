//! Audit entries and their chain hash.
//!
//! `entry_hash[i] = H(entry_hash[i-1] || canonical(entry[i]))` with the
//! all-zero digest standing in for `entry_hash[-1]`. The canonical form is a
//! fixed, length-prefixed byte layout so the hash does not depend on how the
//! record happens to be serialized at rest.

use keygate_core::hash::{self, Hash32};
use keygate_core::{CallerId, Decision, EventKind, KindScope, RequestType};
use serde::{Deserialize, Serialize};

/// Predecessor hash of the very first entry.
pub const GENESIS_HASH: Hash32 = Hash32::ZERO;

const DOMAIN_TAG: &[u8] = b"keygate.audit.v1\0";

/// What the caller supplies when recording a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub caller_id: CallerId,
    pub request_type: RequestType,
    pub event_kind: Option<EventKind>,
    pub decision: Decision,
    /// Decided without an interactive prompt
    pub was_automatic: bool,
}

impl AuditRecord {
    /// Record for a decision reached without user interaction.
    pub fn automatic(
        caller_id: CallerId,
        request_type: RequestType,
        event_kind: Option<EventKind>,
        decision: Decision,
    ) -> Self {
        Self {
            caller_id,
            request_type,
            event_kind,
            decision,
            was_automatic: true,
        }
    }

    /// Record for a decision the user made at a prompt.
    pub fn interactive(
        caller_id: CallerId,
        request_type: RequestType,
        event_kind: Option<EventKind>,
        decision: Decision,
    ) -> Self {
        Self {
            was_automatic: false,
            ..Self::automatic(caller_id, request_type, event_kind, decision)
        }
    }
}

/// Immutable, chained record of a single decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Position in the chain, starting at 1
    pub sequence: u64,
    /// Wall-clock milliseconds at append time
    pub timestamp: u64,
    pub caller_id: CallerId,
    pub request_type: RequestType,
    pub event_kind: Option<EventKind>,
    pub decision: Decision,
    pub was_automatic: bool,
    pub entry_hash: Hash32,
}

impl AuditLogEntry {
    /// Whether this entry is covered by a permission with the given scope.
    /// A generic scope covers every kind of the request type.
    pub fn matches_scope(&self, request_type: RequestType, scope: KindScope) -> bool {
        self.request_type == request_type
            && match scope {
                KindScope::Generic => true,
                KindScope::Specific(kind) => self.event_kind == Some(kind),
            }
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Canonical byte layout of every field except the hash itself.
pub fn canonical_bytes(entry: &AuditLogEntry) -> Vec<u8> {
    let mut out = Vec::with_capacity(96 + entry.caller_id.as_str().len());
    out.extend_from_slice(DOMAIN_TAG);
    out.extend_from_slice(&entry.sequence.to_be_bytes());
    out.extend_from_slice(&entry.timestamp.to_be_bytes());
    put_bytes(&mut out, entry.caller_id.as_str().as_bytes());
    put_bytes(&mut out, entry.request_type.as_str().as_bytes());
    match entry.event_kind {
        Some(kind) => {
            out.push(1);
            out.extend_from_slice(&kind.value().to_be_bytes());
        }
        None => out.push(0),
    }
    put_bytes(&mut out, entry.decision.as_str().as_bytes());
    out.push(u8::from(entry.was_automatic));
    out
}

/// Hash binding `entry` to its predecessor.
pub fn compute_entry_hash(previous: &Hash32, entry: &AuditLogEntry) -> Hash32 {
    let mut h = hash::hasher();
    h.update(previous.as_bytes());
    h.update(&canonical_bytes(entry));
    h.finalize()
}
