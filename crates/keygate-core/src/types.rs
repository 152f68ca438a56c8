//! Domain types shared across the workspace.
//!
//! Inputs arriving from the transport layer are validated here, before any
//! storage is touched: a `CallerId`, `RequestType` or `EventKind` that exists
//! as a value is already known to be well formed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{KeygateError, Result};

/// Longest accepted caller identity, in bytes.
pub const MAX_CALLER_ID_LEN: usize = 256;

/// Identity of the third-party application making a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CallerId(String);

impl CallerId {
    /// Validate and wrap a caller identity.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(KeygateError::invalid("caller id is empty"));
        }
        if id.len() > MAX_CALLER_ID_LEN {
            return Err(KeygateError::invalid(format!(
                "caller id exceeds {MAX_CALLER_ID_LEN} bytes"
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(KeygateError::invalid("caller id contains control characters"));
        }
        Ok(Self(id))
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage-safe rendering: hex of the UTF-8 bytes.
    pub fn storage_token(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl TryFrom<String> for CallerId {
    type Error = KeygateError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CallerId> for String {
    fn from(value: CallerId) -> Self {
        value.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation requested against the identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    GetPublicKey,
    SignEvent,
    Nip04Encrypt,
    Nip04Decrypt,
    Nip44Encrypt,
    Nip44Decrypt,
    DecryptZapEvent,
}

impl RequestType {
    /// Every request type, in declaration order.
    pub const ALL: [RequestType; 7] = [
        RequestType::GetPublicKey,
        RequestType::SignEvent,
        RequestType::Nip04Encrypt,
        RequestType::Nip04Decrypt,
        RequestType::Nip44Encrypt,
        RequestType::Nip44Decrypt,
        RequestType::DecryptZapEvent,
    ];

    /// Wire name, also used in storage keys and audit entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::GetPublicKey => "get_public_key",
            RequestType::SignEvent => "sign_event",
            RequestType::Nip04Encrypt => "nip04_encrypt",
            RequestType::Nip04Decrypt => "nip04_decrypt",
            RequestType::Nip44Encrypt => "nip44_encrypt",
            RequestType::Nip44Decrypt => "nip44_decrypt",
            RequestType::DecryptZapEvent => "decrypt_zap_event",
        }
    }
}

impl FromStr for RequestType {
    type Err = KeygateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| KeygateError::invalid(format!("unknown request type: {s}")))
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric event kind, `0..=65535`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKind(u16);

impl EventKind {
    /// Wrap a kind already known to be in range.
    pub const fn new(kind: u16) -> Self {
        Self(kind)
    }

    /// The numeric kind.
    pub const fn value(&self) -> u16 {
        self.0
    }
}

impl TryFrom<i64> for EventKind {
    type Error = KeygateError;

    fn try_from(value: i64) -> Result<Self> {
        u16::try_from(value)
            .map(Self)
            .map_err(|_| KeygateError::invalid(format!("event kind out of range: {value}")))
    }
}

impl TryFrom<i32> for EventKind {
    type Error = KeygateError;

    fn try_from(value: i32) -> Result<Self> {
        Self::try_from(i64::from(value))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which event kinds a stored decision covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindScope {
    /// Any non-sensitive kind
    Generic,
    /// Exactly one kind
    Specific(EventKind),
}

impl KindScope {
    /// Scope for an optional kind: `None` maps to `Generic`.
    pub fn from_kind(kind: Option<EventKind>) -> Self {
        kind.map_or(KindScope::Generic, KindScope::Specific)
    }

    /// The kind, if specific.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            KindScope::Generic => None,
            KindScope::Specific(kind) => Some(*kind),
        }
    }

    /// Token used in storage keys.
    pub fn storage_token(&self) -> String {
        match self {
            KindScope::Generic => "generic".to_string(),
            KindScope::Specific(kind) => kind.to_string(),
        }
    }
}

/// Outcome recorded for a caller/request-type/kind tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    Ask,
}

impl Decision {
    /// Upper-case rendering used in audit entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
            Decision::Ask => "ASK",
        }
    }
}

impl FromStr for Decision {
    type Err = KeygateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(Decision::Allow),
            "DENY" => Ok(Decision::Deny),
            "ASK" => Ok(Decision::Ask),
            other => Err(KeygateError::invalid(format!("unknown decision: {other}"))),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength of user authentication, ordered weakest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthLevel {
    #[default]
    None,
    Pin,
    Biometric,
    Explicit,
}

impl AuthLevel {
    /// Whether presenting `self` meets a `required` level.
    pub fn satisfies(&self, required: AuthLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthLevel::None => "NONE",
            AuthLevel::Pin => "PIN",
            AuthLevel::Biometric => "BIOMETRIC",
            AuthLevel::Explicit => "EXPLICIT",
        };
        f.write_str(s)
    }
}

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Lifetime requested for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantDuration {
    /// Applies to the current request only and is never persisted
    JustOnce,
    FiveMinutes,
    OneHour,
    OneDay,
    OneWeek,
    Forever,
}

impl GrantDuration {
    /// Whether the decision is written to storage at all.
    pub fn persists(&self) -> bool {
        !matches!(self, GrantDuration::JustOnce)
    }

    /// Bounded lifetime in milliseconds; `None` for `JustOnce` and `Forever`.
    pub fn millis(&self) -> Option<u64> {
        match self {
            GrantDuration::JustOnce | GrantDuration::Forever => None,
            GrantDuration::FiveMinutes => Some(5 * MINUTE_MS),
            GrantDuration::OneHour => Some(HOUR_MS),
            GrantDuration::OneDay => Some(DAY_MS),
            GrantDuration::OneWeek => Some(7 * DAY_MS),
        }
    }
}

impl FromStr for GrantDuration {
    type Err = KeygateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "once" | "just_once" => Ok(GrantDuration::JustOnce),
            "5m" | "five_minutes" => Ok(GrantDuration::FiveMinutes),
            "1h" | "one_hour" => Ok(GrantDuration::OneHour),
            "1d" | "one_day" => Ok(GrantDuration::OneDay),
            "1w" | "one_week" => Ok(GrantDuration::OneWeek),
            "forever" => Ok(GrantDuration::Forever),
            other => Err(KeygateError::invalid(format!("unknown duration: {other}"))),
        }
    }
}

/// How much a caller may do without an interactive prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignPolicy {
    /// Prompt for everything without a stored decision
    #[default]
    Manual,
    /// Auto-allow `get_public_key` when no authentication is required
    Basic,
    /// Auto-allow non-sensitive requests when no authentication is required
    Trusted,
}

impl FromStr for SignPolicy {
    type Err = KeygateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(SignPolicy::Manual),
            "basic" => Ok(SignPolicy::Basic),
            "trusted" => Ok(SignPolicy::Trusted),
            other => Err(KeygateError::invalid(format!("unknown sign policy: {other}"))),
        }
    }
}

impl fmt::Display for SignPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignPolicy::Manual => "manual",
            SignPolicy::Basic => "basic",
            SignPolicy::Trusted => "trusted",
        })
    }
}
