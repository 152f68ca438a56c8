//! Tunable configuration.
//!
//! Every value has a fixed default; a deployment may override them through a
//! TOML file (see `keygate_agent::config`). Risk weights and thresholds are
//! deliberately absent: they are policy constants, not knobs.

use serde::{Deserialize, Serialize};

use crate::errors::{KeygateError, Result};
use crate::types::SignPolicy;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygateConfig {
    pub rate_limit: RateLimitConfig,
    pub permissions: PermissionConfig,
    pub audit: AuditConfig,
    pub policy: PolicyConfig,
}

/// Fixed-window rate limiting per caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 30,
        }
    }
}

/// Permission lifetime bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Upper bound on the lifetime of any grant for a sensitive kind
    pub sensitive_max_duration_ms: u64,
    /// How far in the future a `created_at` may lie before the row is void
    pub clock_skew_tolerance_ms: u64,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            sensitive_max_duration_ms: 30 * DAY_MS,
            clock_skew_tolerance_ms: 60_000,
        }
    }
}

/// Audit log retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Entries older than this are removed by a retention sweep
    pub retention_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_ms: 90 * DAY_MS,
        }
    }
}

/// Engine-level policy defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Policy applied to callers without an override
    pub default_sign_policy: SignPolicy,
    /// Pending prompts older than this are discarded
    pub prompt_ttl_ms: u64,
    /// Upper bound on simultaneously pending prompts
    pub max_pending_prompts: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_sign_policy: SignPolicy::Manual,
            prompt_ttl_ms: 5 * 60 * 1000,
            max_pending_prompts: 64,
        }
    }
}

impl KeygateConfig {
    /// Reject values that would disable a protection.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.window_ms == 0 {
            return Err(KeygateError::invalid("rate_limit.window_ms must be positive"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(KeygateError::invalid(
                "rate_limit.max_requests must be positive",
            ));
        }
        if self.permissions.sensitive_max_duration_ms == 0 {
            return Err(KeygateError::invalid(
                "permissions.sensitive_max_duration_ms must be positive",
            ));
        }
        if self.audit.retention_ms == 0 {
            return Err(KeygateError::invalid("audit.retention_ms must be positive"));
        }
        if self.policy.prompt_ttl_ms == 0 || self.policy.max_pending_prompts == 0 {
            return Err(KeygateError::invalid(
                "policy.prompt_ttl_ms and policy.max_pending_prompts must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(KeygateConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_window_rejected() {
        let mut config = KeygateConfig::default();
        config.rate_limit.window_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(KeygateError::Invalid { .. })
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: KeygateConfig =
            serde_json::from_str(r#"{"rate_limit":{"max_requests":5}}"#).unwrap();
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.policy, PolicyConfig::default());
    }
}
