//! Persisted permission and per-caller records.

use keygate_core::{CallerId, ClockReading, Decision, KindScope, RequestType, SignPolicy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::expiry::Lifetime;

/// A stored decision for one (caller, request type, kind scope) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Surrogate id, stable across upserts of the same tuple
    pub id: Uuid,
    pub caller_id: CallerId,
    pub request_type: RequestType,
    pub scope: KindScope,
    pub decision: Decision,
    #[serde(flatten)]
    pub lifetime: Lifetime,
}

impl Permission {
    /// Whether the record is void at `now`.
    pub fn is_expired(&self, now: ClockReading, skew_tolerance_ms: u64) -> bool {
        self.lifetime.is_expired(now, skew_tolerance_ms)
    }
}

/// Per-caller metadata, independent of any single permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    pub caller_id: CallerId,
    /// Registration stamps; also the source of the caller's age
    #[serde(flatten)]
    pub lifetime: Lifetime,
    /// Caller-specific override of the default signing policy
    pub sign_policy_override: Option<SignPolicy>,
}

impl AppSettings {
    /// Settings for a caller first seen at `now`.
    pub fn registered(caller_id: CallerId, lifetime: Lifetime) -> Self {
        Self {
            caller_id,
            lifetime,
            sign_policy_override: None,
        }
    }
}

/// Summary row for a caller holding at least one live permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedApp {
    pub caller_id: CallerId,
    pub permission_count: usize,
    /// Timestamp of the last allowed request, from the audit log
    pub last_used: Option<u64>,
}
