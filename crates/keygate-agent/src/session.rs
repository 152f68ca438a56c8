//! Prompt sessions.
//!
//! An ASK verdict opens a session the presentation layer later resolves.
//! Sessions are owned by the engine and move through
//! `Pending -> Resolving -> Resolved`. A session is `Resolving` while its
//! outcome is being written; a failed write releases it back to `Pending`
//! so the user can answer again. `clear_all` abandons every pending one.
//! Nothing is persisted until a session resolves, so an abandoned prompt
//! leaves no trace beyond its ASK audit entry.

use keygate_authorization::RiskAssessment;
use keygate_core::{Decision, KeygateError, PolicyConfig, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::request::SigningRequest;

/// Handle for one pending prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTicket(Uuid);

impl PromptTicket {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PromptTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request waiting for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    pub ticket: PromptTicket,
    pub request: SigningRequest,
    pub assessment: RiskAssessment,
    pub opened_at_monotonic: u64,
}

#[derive(Debug, Clone)]
enum SessionState {
    Pending(PendingPrompt),
    Resolving(PendingPrompt),
    Resolved { decision: Decision, at_monotonic: u64 },
}

/// Owned table of prompt sessions
#[derive(Debug)]
pub struct PromptSessions {
    ttl_ms: u64,
    max_pending: usize,
    sessions: Mutex<HashMap<PromptTicket, SessionState>>,
}

impl PromptSessions {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            ttl_ms: config.prompt_ttl_ms,
            max_pending: config.max_pending_prompts,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn prune(&self, sessions: &mut HashMap<PromptTicket, SessionState>, now: u64) {
        let ttl = self.ttl_ms;
        sessions.retain(|_, state| {
            let since = match state {
                // Owned by an in-flight resolution.
                SessionState::Resolving(_) => return true,
                SessionState::Pending(prompt) => prompt.opened_at_monotonic,
                SessionState::Resolved { at_monotonic, .. } => *at_monotonic,
            };
            // A monotonic clock behind the stamp means a reboot: drop it.
            now >= since && now - since < ttl
        });
    }

    /// Open a session for `request`.
    pub fn activate(
        &self,
        request: SigningRequest,
        assessment: RiskAssessment,
        now_monotonic: u64,
    ) -> Result<PromptTicket> {
        let mut sessions = self.sessions.lock();
        self.prune(&mut sessions, now_monotonic);
        let pending = sessions
            .values()
            .filter(|s| !matches!(s, SessionState::Resolved { .. }))
            .count();
        if pending >= self.max_pending {
            return Err(KeygateError::invalid(format!(
                "{pending} prompts already pending"
            )));
        }

        let ticket = PromptTicket::generate();
        sessions.insert(
            ticket,
            SessionState::Pending(PendingPrompt {
                ticket,
                request,
                assessment,
                opened_at_monotonic: now_monotonic,
            }),
        );
        debug!(%ticket, "prompt session activated");
        Ok(ticket)
    }

    /// The pending prompt behind `ticket`.
    pub fn pending(&self, ticket: PromptTicket, now_monotonic: u64) -> Result<PendingPrompt> {
        let mut sessions = self.sessions.lock();
        self.prune(&mut sessions, now_monotonic);
        match sessions.get(&ticket) {
            Some(SessionState::Pending(prompt)) => Ok(prompt.clone()),
            Some(SessionState::Resolving(_)) => Err(KeygateError::race_aborted(format!(
                "prompt {ticket} is being resolved"
            ))),
            Some(SessionState::Resolved { decision, .. }) => Err(KeygateError::race_aborted(
                format!("prompt {ticket} already resolved as {decision}"),
            )),
            None => Err(KeygateError::not_found(format!(
                "prompt {ticket} is unknown or expired"
            ))),
        }
    }

    /// Take ownership of a pending session for resolution. Exactly one
    /// caller wins; later attempts get `RaceAborted` until the winner
    /// completes or releases it.
    pub fn claim(&self, ticket: PromptTicket, now_monotonic: u64) -> Result<PendingPrompt> {
        let mut sessions = self.sessions.lock();
        self.prune(&mut sessions, now_monotonic);
        let Some(state) = sessions.get_mut(&ticket) else {
            return Err(KeygateError::not_found(format!(
                "prompt {ticket} is unknown or expired"
            )));
        };
        let SessionState::Pending(prompt) = state else {
            return Err(KeygateError::race_aborted(format!(
                "prompt {ticket} already claimed"
            )));
        };
        let prompt = prompt.clone();
        *state = SessionState::Resolving(prompt.clone());
        Ok(prompt)
    }

    /// Give a claimed session back to the pending set.
    pub fn release(&self, ticket: PromptTicket) {
        let mut sessions = self.sessions.lock();
        if let Some(state) = sessions.get_mut(&ticket) {
            if let SessionState::Resolving(prompt) = state {
                *state = SessionState::Pending(prompt.clone());
                debug!(%ticket, "prompt session released");
            }
        }
    }

    /// Move a claimed session to its terminal state.
    pub fn complete(
        &self,
        ticket: PromptTicket,
        decision: Decision,
        now_monotonic: u64,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let Some(state) = sessions.get_mut(&ticket) else {
            return Err(KeygateError::not_found(format!(
                "prompt {ticket} is unknown or expired"
            )));
        };
        if !matches!(state, SessionState::Resolving(_)) {
            return Err(KeygateError::race_aborted(format!(
                "prompt {ticket} is not claimed"
            )));
        }
        *state = SessionState::Resolved {
            decision,
            at_monotonic: now_monotonic,
        };
        debug!(%ticket, %decision, "prompt session resolved");
        Ok(())
    }

    /// Drop one session without resolving it.
    pub fn discard(&self, ticket: PromptTicket) -> bool {
        self.sessions.lock().remove(&ticket).is_some()
    }

    /// Abandon every pending prompt. Returns how many were dropped.
    pub fn clear_all(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, state| !matches!(state, SessionState::Pending(_)));
        let dropped = before - sessions.len();
        debug!(dropped, "pending prompts cleared");
        dropped
    }

    /// Every live pending prompt.
    pub fn pending_prompts(&self, now_monotonic: u64) -> Vec<PendingPrompt> {
        let mut sessions = self.sessions.lock();
        self.prune(&mut sessions, now_monotonic);
        sessions
            .values()
            .filter_map(|state| match state {
                SessionState::Pending(prompt) => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }
}
