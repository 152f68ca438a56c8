//! Policy engine.
//!
//! Answers "what should happen with this request right now". The flow for
//! one request:
//!
//! 1. The rate limiter admits or rejects it.
//! 2. A stored, live decision is looked up.
//! 3. Without one, the risk assessor computes the required authentication
//!    and the caller's signing policy may auto-allow; otherwise a prompt
//!    session is opened and the verdict is ASK.
//! 4. Every outcome is appended to the audit log.
//!
//! `evaluate` is infallible. Any internal error, storage included, yields a
//! DENY verdict; no error path ever produces ALLOW.

use std::path::Path;
use std::sync::Arc;

use keygate_authorization::{
    is_sensitive, AppSettings, CleanupReport, ConnectedApp, Permission, PermissionStore,
    RateLimiter, RiskAssessment, RiskAssessor,
};
use keygate_core::effects::{ClockEffects, StorageEffects};
use keygate_core::{
    AuthLevel, CallerId, Decision, EventKind, GrantDuration, KeygateConfig, KeygateError,
    KindScope, RequestType, Result, SignPolicy,
};
use keygate_effects::{FilesystemStorageHandler, RealClockHandler};
use keygate_journal::{AuditLog, AuditLogEntry, AuditRecord, ChainVerification, RetentionReport};
use tracing::{debug, info, warn};

use crate::request::{ApplyTo, DenyReason, Resolution, SigningRequest, Verdict};
use crate::session::{PendingPrompt, PromptSessions, PromptTicket};

/// Engine over durable storage and the system clocks.
pub type FilesystemPolicyEngine = PolicyEngine<Arc<FilesystemStorageHandler>, RealClockHandler>;

/// Composition root for the authorization core
#[derive(Debug)]
pub struct PolicyEngine<S, C> {
    config: KeygateConfig,
    clock: C,
    permissions: PermissionStore<S, C>,
    audit: AuditLog<S, C>,
    rate_limiter: RateLimiter<C>,
    sessions: PromptSessions,
}

impl FilesystemPolicyEngine {
    /// Open an engine whose state lives under `data_dir`.
    pub async fn open(data_dir: impl AsRef<Path>, config: KeygateConfig) -> Result<Self> {
        let storage = FilesystemStorageHandler::open(data_dir.as_ref()).await?;
        Self::new(Arc::new(storage), RealClockHandler::new(), config)
    }
}

impl<S, C> PolicyEngine<S, C>
where
    S: StorageEffects + Clone,
    C: ClockEffects + Clone,
{
    /// Build an engine; the configuration is validated first.
    pub fn new(storage: S, clock: C, config: KeygateConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            permissions: PermissionStore::new(
                storage.clone(),
                clock.clone(),
                config.permissions.clone(),
            ),
            audit: AuditLog::new(storage, clock.clone()),
            rate_limiter: RateLimiter::new(clock.clone(), &config.rate_limit),
            sessions: PromptSessions::new(&config.policy),
            clock,
            config,
        })
    }

    pub fn config(&self) -> &KeygateConfig {
        &self.config
    }

    pub fn permissions(&self) -> &PermissionStore<S, C> {
        &self.permissions
    }

    pub fn audit(&self) -> &AuditLog<S, C> {
        &self.audit
    }

    /// Decide a request. Never fails and never allows on an error path.
    pub async fn evaluate(&self, request: &SigningRequest) -> Verdict {
        match self.try_evaluate(request).await {
            Ok(verdict) => verdict,
            Err(error) => {
                let reason = if error.is_storage() {
                    DenyReason::StorageUnavailable
                } else {
                    DenyReason::Internal
                };
                warn!(
                    caller = %request.caller_id,
                    request_type = %request.request_type,
                    kind = ?request.event_kind,
                    %error,
                    "evaluation failed, denying"
                );
                Verdict::Deny { reason }
            }
        }
    }

    async fn try_evaluate(&self, request: &SigningRequest) -> Result<Verdict> {
        let caller = &request.caller_id;

        if !self.rate_limiter.admit(caller) {
            self.record(request, Decision::Deny, true).await?;
            return Ok(Verdict::Deny {
                reason: DenyReason::RateLimited,
            });
        }

        let stored = self
            .permissions
            .decision_for(caller, request.request_type, request.event_kind)
            .await?;
        match stored {
            Some(Decision::Allow) => {
                self.record(request, Decision::Allow, true).await?;
                debug!(caller = %caller, kind = ?request.event_kind, "allowed by stored decision");
                return Ok(Verdict::Allow);
            }
            Some(Decision::Deny) => {
                self.record(request, Decision::Deny, true).await?;
                debug!(caller = %caller, kind = ?request.event_kind, "denied by stored decision");
                return Ok(Verdict::Deny {
                    reason: DenyReason::StoredDecision,
                });
            }
            Some(Decision::Ask) | None => {}
        }

        let assessment = self.assess(caller, request.event_kind).await?;
        // A stored ASK always re-prompts, whatever the policy.
        if stored.is_none() && self.auto_allows(request, &assessment).await? {
            self.record(request, Decision::Allow, true).await?;
            info!(caller = %caller, request_type = %request.request_type, "allowed by sign policy");
            return Ok(Verdict::Allow);
        }

        let now = self.clock.monotonic_time_ms();
        let ticket = match self
            .sessions
            .activate(request.clone(), assessment.clone(), now)
        {
            Ok(ticket) => ticket,
            Err(error) => {
                warn!(caller = %caller, %error, "prompt capacity reached");
                self.record(request, Decision::Deny, true).await?;
                return Ok(Verdict::Deny {
                    reason: DenyReason::PromptCapacity,
                });
            }
        };
        if let Err(error) = self.record(request, Decision::Ask, true).await {
            self.sessions.discard(ticket);
            return Err(error);
        }

        info!(
            caller = %caller,
            %ticket,
            score = assessment.score,
            required_auth = %assessment.required_auth,
            "prompt opened"
        );
        Ok(Verdict::Ask {
            ticket,
            required_auth: assessment.required_auth,
            assessment,
        })
    }

    async fn auto_allows(
        &self,
        request: &SigningRequest,
        assessment: &RiskAssessment,
    ) -> Result<bool> {
        if assessment.required_auth != AuthLevel::None {
            return Ok(false);
        }
        let policy = self.sign_policy(&request.caller_id).await?;
        Ok(match policy {
            SignPolicy::Manual => false,
            SignPolicy::Basic => request.request_type == RequestType::GetPublicKey,
            SignPolicy::Trusted => !request.event_kind.is_some_and(is_sensitive),
        })
    }

    /// Effective signing policy for a caller.
    pub async fn sign_policy(&self, caller: &CallerId) -> Result<SignPolicy> {
        Ok(self
            .permissions
            .app_settings(caller)
            .await?
            .and_then(|settings| settings.sign_policy_override)
            .unwrap_or(self.config.policy.default_sign_policy))
    }

    /// Apply the user's answer to a pending prompt.
    ///
    /// ALLOW requires the presented authentication to meet the level the
    /// assessment demanded. The decision is audited as interactive, then
    /// persisted unless one-time. If either write fails the prompt stays
    /// pending and the ticket can be resolved again.
    pub async fn resolve(&self, ticket: PromptTicket, resolution: Resolution) -> Result<Decision> {
        let now = self.clock.monotonic_time_ms();
        let prompt = self.sessions.pending(ticket, now)?;
        let required = prompt.assessment.required_auth;
        if resolution.decision == Decision::Allow && !resolution.presented_auth.satisfies(required)
        {
            warn!(
                %ticket,
                required = %required,
                presented = %resolution.presented_auth,
                "insufficient authentication for prompt"
            );
            return Err(KeygateError::permission_denied(format!(
                "{required} authentication required, {} presented",
                resolution.presented_auth
            )));
        }

        let prompt = self.sessions.claim(ticket, now)?;
        let request = &prompt.request;
        let scope = match (resolution.apply_to, request.event_kind) {
            (_, None) => KindScope::Generic,
            (ApplyTo::ThisKind, Some(kind)) => KindScope::Specific(kind),
            // Sensitive kinds are always remembered individually.
            (ApplyTo::AllKinds, Some(kind)) if is_sensitive(kind) => KindScope::Specific(kind),
            (ApplyTo::AllKinds, Some(_)) => KindScope::Generic,
        };
        let duration = resolution
            .duration
            .or(request.duration_hint)
            .unwrap_or(GrantDuration::JustOnce);

        if let Err(error) = self
            .persist_resolution(request, scope, resolution.decision, duration)
            .await
        {
            warn!(%ticket, %error, "prompt resolution not persisted");
            self.sessions.release(ticket);
            return Err(error);
        }
        self.sessions
            .complete(ticket, resolution.decision, self.clock.monotonic_time_ms())?;

        info!(
            %ticket,
            caller = %request.caller_id,
            decision = %resolution.decision,
            scope = ?scope,
            duration = ?duration,
            "prompt resolved"
        );
        Ok(resolution.decision)
    }

    /// The audit entry goes first so no stored decision is ever unaudited.
    async fn persist_resolution(
        &self,
        request: &SigningRequest,
        scope: KindScope,
        decision: Decision,
        duration: GrantDuration,
    ) -> Result<()> {
        self.record(request, decision, false).await?;
        self.permissions
            .record(
                &request.caller_id,
                request.request_type,
                scope,
                decision,
                duration,
            )
            .await?;
        Ok(())
    }

    async fn record(
        &self,
        request: &SigningRequest,
        decision: Decision,
        automatic: bool,
    ) -> Result<AuditLogEntry> {
        let record = AuditRecord {
            caller_id: request.caller_id.clone(),
            request_type: request.request_type,
            event_kind: request.event_kind,
            decision,
            was_automatic: automatic,
        };
        match self.audit.append(record.clone()).await {
            // The head was reloaded; one retry chains onto the winner.
            Err(KeygateError::RaceAborted { .. }) => self.audit.append(record).await,
            other => other,
        }
    }

    /// Risk assessment for a prospective request.
    pub async fn assess(
        &self,
        caller: &CallerId,
        kind: Option<EventKind>,
    ) -> Result<RiskAssessment> {
        RiskAssessor::new(&self.audit, &self.permissions, &self.clock)
            .assess(caller, kind)
            .await
    }

    pub async fn decision_for(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
    ) -> Result<Option<Decision>> {
        self.permissions
            .decision_for(caller, request_type, kind)
            .await
    }

    pub async fn grant(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
        duration: GrantDuration,
    ) -> Result<Option<Permission>> {
        self.permissions
            .grant(caller, request_type, kind, duration)
            .await
    }

    pub async fn deny(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
        duration: GrantDuration,
    ) -> Result<Option<Permission>> {
        self.permissions
            .deny(caller, request_type, kind, duration)
            .await
    }

    pub async fn set_ask(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
    ) -> Result<Permission> {
        self.permissions.set_ask(caller, request_type, kind).await
    }

    pub async fn revoke(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        scope: KindScope,
    ) -> Result<bool> {
        self.permissions.revoke(caller, request_type, scope).await
    }

    pub async fn revoke_all(&self, caller: &CallerId) -> Result<usize> {
        self.permissions.revoke_all(caller).await
    }

    pub async fn connect_app(
        &self,
        caller: &CallerId,
        duration: GrantDuration,
    ) -> Result<AppSettings> {
        self.permissions.connect_app(caller, duration).await
    }

    pub async fn set_sign_policy(
        &self,
        caller: &CallerId,
        policy: Option<SignPolicy>,
    ) -> Result<AppSettings> {
        self.permissions.set_sign_policy(caller, policy).await
    }

    pub async fn connected_apps(&self) -> Result<Vec<ConnectedApp>> {
        self.permissions.connected_apps(&self.audit).await
    }

    /// Expiry sweep over permissions and app settings.
    pub async fn cleanup_expired(&self) -> Result<CleanupReport> {
        self.permissions.cleanup_expired().await
    }

    /// Retention sweep: drops audit entries older than the retention age.
    pub async fn sweep_audit(&self) -> Result<RetentionReport> {
        let cutoff = self
            .clock
            .physical_time_ms()
            .saturating_sub(self.config.audit.retention_ms);
        self.audit.delete_older_than(cutoff).await
    }

    pub async fn verify_audit(&self) -> Result<ChainVerification> {
        self.audit.verify_chain().await
    }

    /// Clear every rate-limit window, e.g. after a network change.
    pub fn reset_rate_limits(&self) {
        self.rate_limiter.reset_all();
    }

    pub fn pending_prompts(&self) -> Vec<PendingPrompt> {
        self.sessions
            .pending_prompts(self.clock.monotonic_time_ms())
    }

    /// Abandon every pending prompt.
    pub fn clear_prompts(&self) -> usize {
        self.sessions.clear_all()
    }
}
