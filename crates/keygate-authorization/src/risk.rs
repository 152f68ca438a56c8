//! Risk scoring.
//!
//! Signals are gathered from the audit log, the permission store and the
//! clock, then scored by a pure function. Weights and thresholds are fixed
//! policy constants.

use keygate_core::effects::{ClockEffects, StorageEffects};
use keygate_core::{AuthLevel, CallerId, EventKind, Result};
use keygate_journal::AuditLog;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::kinds::is_sensitive;
use crate::store::PermissionStore;

pub const SENSITIVE_EVENT_KIND_WEIGHT: u8 = 40;
pub const FIRST_KIND_WEIGHT: u8 = 15;
pub const HIGH_FREQUENCY_WEIGHT: u8 = 20;
pub const NEW_APP_WEIGHT: u8 = 15;
pub const UNUSUAL_TIME_WEIGHT: u8 = 10;

/// Requests above this count inside the frequency window are "high".
pub const HIGH_FREQUENCY_THRESHOLD: usize = 10;
pub const HIGH_FREQUENCY_WINDOW_MS: u64 = 60_000;
/// Callers known for less than this are "new".
pub const NEW_APP_AGE_MS: u64 = 24 * 60 * 60 * 1000;
/// Local hours considered unusual, inclusive.
pub const UNUSUAL_HOURS: std::ops::RangeInclusive<u8> = 0..=5;

pub const MAX_SCORE: u8 = 100;
pub const EXPLICIT_THRESHOLD: u8 = 60;
pub const BIOMETRIC_THRESHOLD: u8 = 40;
pub const PIN_THRESHOLD: u8 = 20;

/// A named condition contributing to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFactor {
    SensitiveEventKind,
    FirstKind,
    HighFrequency,
    NewApp,
    UnusualTime,
}

impl RiskFactor {
    pub const ALL: [RiskFactor; 5] = [
        RiskFactor::SensitiveEventKind,
        RiskFactor::FirstKind,
        RiskFactor::HighFrequency,
        RiskFactor::NewApp,
        RiskFactor::UnusualTime,
    ];

    pub fn weight(&self) -> u8 {
        match self {
            RiskFactor::SensitiveEventKind => SENSITIVE_EVENT_KIND_WEIGHT,
            RiskFactor::FirstKind => FIRST_KIND_WEIGHT,
            RiskFactor::HighFrequency => HIGH_FREQUENCY_WEIGHT,
            RiskFactor::NewApp => NEW_APP_WEIGHT,
            RiskFactor::UnusualTime => UNUSUAL_TIME_WEIGHT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::SensitiveEventKind => "SENSITIVE_EVENT_KIND",
            RiskFactor::FirstKind => "FIRST_KIND",
            RiskFactor::HighFrequency => "HIGH_FREQUENCY",
            RiskFactor::NewApp => "NEW_APP",
            RiskFactor::UnusualTime => "UNUSUAL_TIME",
        }
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored risk for one pending request. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// `0..=100`
    pub score: u8,
    /// Every triggered factor, even when the score is capped
    pub factors: Vec<RiskFactor>,
    pub required_auth: AuthLevel,
}

/// Raw inputs to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RiskSignals {
    pub sensitive_kind: bool,
    /// Prior entries with this exact kind; `None` when the request has no kind
    pub prior_kind_count: Option<usize>,
    /// Entries from the caller inside the frequency window
    pub recent_requests: usize,
    /// Trusted age of the caller; `None` is maximally new
    pub app_age_ms: Option<u64>,
    pub local_hour: u8,
}

impl RiskSignals {
    /// Factors these signals trigger, in declaration order.
    pub fn factors(&self) -> Vec<RiskFactor> {
        RiskFactor::ALL
            .into_iter()
            .filter(|factor| match factor {
                RiskFactor::SensitiveEventKind => self.sensitive_kind,
                RiskFactor::FirstKind => self.prior_kind_count == Some(0),
                RiskFactor::HighFrequency => self.recent_requests > HIGH_FREQUENCY_THRESHOLD,
                RiskFactor::NewApp => self.app_age_ms.map_or(true, |age| age < NEW_APP_AGE_MS),
                RiskFactor::UnusualTime => UNUSUAL_HOURS.contains(&self.local_hour),
            })
            .collect()
    }
}

/// Authentication required for a score.
pub fn required_auth_for(score: u8) -> AuthLevel {
    if score >= EXPLICIT_THRESHOLD {
        AuthLevel::Explicit
    } else if score >= BIOMETRIC_THRESHOLD {
        AuthLevel::Biometric
    } else if score >= PIN_THRESHOLD {
        AuthLevel::Pin
    } else {
        AuthLevel::None
    }
}

/// Additive score over a factor set, capped.
pub fn score_factors(factors: &[RiskFactor]) -> RiskAssessment {
    let raw: u32 = factors.iter().map(|f| u32::from(f.weight())).sum();
    let score = raw.min(u32::from(MAX_SCORE)) as u8;
    RiskAssessment {
        score,
        factors: factors.to_vec(),
        required_auth: required_auth_for(score),
    }
}

/// Score a request's signals.
pub fn score(signals: &RiskSignals) -> RiskAssessment {
    score_factors(&signals.factors())
}

/// Gathers signals for a caller and scores them.
pub struct RiskAssessor<'a, S, C> {
    audit: &'a AuditLog<S, C>,
    permissions: &'a PermissionStore<S, C>,
    clock: &'a C,
}

impl<'a, S: StorageEffects, C: ClockEffects> RiskAssessor<'a, S, C> {
    pub fn new(
        audit: &'a AuditLog<S, C>,
        permissions: &'a PermissionStore<S, C>,
        clock: &'a C,
    ) -> Self {
        Self {
            audit,
            permissions,
            clock,
        }
    }

    pub async fn signals(&self, caller: &CallerId, kind: Option<EventKind>) -> Result<RiskSignals> {
        let now = self.clock.physical_time_ms();
        let prior_kind_count = match kind {
            Some(kind) => Some(self.audit.count_for_kind(caller, kind).await?),
            None => None,
        };
        let recent_requests = self
            .audit
            .count_since(caller, now.saturating_sub(HIGH_FREQUENCY_WINDOW_MS))
            .await?;
        Ok(RiskSignals {
            sensitive_kind: kind.is_some_and(is_sensitive),
            prior_kind_count,
            recent_requests,
            app_age_ms: self.permissions.app_age_ms(caller).await?,
            local_hour: self.clock.local_hour(),
        })
    }

    pub async fn assess(&self, caller: &CallerId, kind: Option<EventKind>) -> Result<RiskAssessment> {
        let signals = self.signals(caller, kind).await?;
        let assessment = score(&signals);
        debug!(
            caller = %caller,
            kind = ?kind,
            score = assessment.score,
            factors = ?assessment.factors,
            required_auth = %assessment.required_auth,
            "risk assessed"
        );
        Ok(assessment)
    }
}
