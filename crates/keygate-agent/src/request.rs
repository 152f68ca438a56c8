//! Request and verdict types exchanged with the transport layer.

use keygate_authorization::RiskAssessment;
use keygate_core::{AuthLevel, CallerId, Decision, EventKind, GrantDuration, RequestType, Result};
use serde::{Deserialize, Serialize};

use crate::session::PromptTicket;

/// A normalized signing-related request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub caller_id: CallerId,
    pub request_type: RequestType,
    pub event_kind: Option<EventKind>,
    /// Lifetime the caller suggested for a remembered decision
    pub duration_hint: Option<GrantDuration>,
}

impl SigningRequest {
    pub fn new(caller_id: CallerId, request_type: RequestType) -> Self {
        Self {
            caller_id,
            request_type,
            event_kind: None,
            duration_hint: None,
        }
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.event_kind = Some(kind);
        self
    }

    pub fn with_duration_hint(mut self, duration: GrantDuration) -> Self {
        self.duration_hint = Some(duration);
        self
    }

    /// Validate raw transport values. Nothing is stored on failure.
    pub fn parse(caller_id: &str, request_type: &str, event_kind: Option<i64>) -> Result<Self> {
        let mut request = Self::new(CallerId::new(caller_id)?, request_type.parse()?);
        if let Some(kind) = event_kind {
            request = request.with_kind(EventKind::try_from(kind)?);
        }
        Ok(request)
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Caller exceeded its request window
    RateLimited,
    /// A stored DENY matched
    StoredDecision,
    /// Too many prompts already waiting for the user
    PromptCapacity,
    /// Persistence failed; the engine fails closed
    StorageUnavailable,
    /// Any other internal failure, also fail-closed
    Internal,
}

/// The engine's answer for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny {
        reason: DenyReason,
    },
    /// The user must decide; resolve the ticket once they have
    Ask {
        ticket: PromptTicket,
        required_auth: AuthLevel,
        assessment: RiskAssessment,
    },
}

impl Verdict {
    pub fn decision(&self) -> Decision {
        match self {
            Verdict::Allow => Decision::Allow,
            Verdict::Deny { .. } => Decision::Deny,
            Verdict::Ask { .. } => Decision::Ask,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Which kinds a prompt resolution is remembered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyTo {
    /// Only the kind on the request
    #[default]
    ThisKind,
    /// Every non-sensitive kind of the request type
    AllKinds,
}

/// The user's answer to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub decision: Decision,
    /// Falls back to the request's hint, then to one-time
    pub duration: Option<GrantDuration>,
    pub apply_to: ApplyTo,
    /// Strongest authentication the user completed
    pub presented_auth: AuthLevel,
}

impl Resolution {
    pub fn allow(presented_auth: AuthLevel) -> Self {
        Self {
            decision: Decision::Allow,
            duration: None,
            apply_to: ApplyTo::ThisKind,
            presented_auth,
        }
    }

    pub fn deny() -> Self {
        Self {
            decision: Decision::Deny,
            duration: None,
            apply_to: ApplyTo::ThisKind,
            presented_auth: AuthLevel::None,
        }
    }

    pub fn remember(mut self, duration: GrantDuration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn for_all_kinds(mut self) -> Self {
        self.apply_to = ApplyTo::AllKinds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_validates_before_anything_else() {
        let request = SigningRequest::parse("com.example", "sign_event", Some(1)).unwrap();
        assert_eq!(request.event_kind, Some(EventKind::new(1)));
        assert!(SigningRequest::parse("", "sign_event", None).is_err());
        assert!(SigningRequest::parse("app", "sign_psbt", None).is_err());
        assert!(SigningRequest::parse("app", "sign_event", Some(70_000)).is_err());
        assert!(SigningRequest::parse("app", "sign_event", Some(-1)).is_err());
    }

    #[test]
    fn verdict_decisions() {
        assert_eq!(Verdict::Allow.decision(), Decision::Allow);
        assert_eq!(
            Verdict::Deny {
                reason: DenyReason::RateLimited
            }
            .decision(),
            Decision::Deny
        );
    }
}
