//! Permission store.
//!
//! Logical tables are storage key prefixes and the tuple is the key, so the
//! storage layer itself guarantees one row per (caller, request type, kind
//! scope) and one settings row per caller:
//!
//! - `perm/<hex caller>/<request type>/<kind | generic>`
//! - `app/<hex caller>`
//!
//! Every read-evaluate-write on a key runs under that key's lock. Storage
//! failures are returned as errors and never read as "no permission".

use std::collections::BTreeMap;

use keygate_core::effects::{ClockEffects, StorageEffects};
use keygate_core::{
    CallerId, Decision, EventKind, GrantDuration, KeygateError, KindScope, PermissionConfig,
    RequestType, Result, SignPolicy,
};
use keygate_journal::AuditLog;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::expiry::Lifetime;
use crate::kinds::is_sensitive;
use crate::locks::KeyedLocks;
use crate::permission::{AppSettings, ConnectedApp, Permission};

const PERMISSION_PREFIX: &str = "perm/";
const APP_PREFIX: &str = "app/";

fn caller_prefix(caller: &CallerId) -> String {
    format!("{PERMISSION_PREFIX}{}/", caller.storage_token())
}

fn permission_key(caller: &CallerId, request_type: RequestType, scope: KindScope) -> String {
    format!(
        "{}{}/{}",
        caller_prefix(caller),
        request_type.as_str(),
        scope.storage_token()
    )
}

fn app_key(caller: &CallerId) -> String {
    format!("{APP_PREFIX}{}", caller.storage_token())
}

/// Rows removed by an expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub permissions_removed: usize,
    pub apps_removed: usize,
}

/// Store of decisions and per-caller settings
#[derive(Debug)]
pub struct PermissionStore<S, C> {
    storage: S,
    clock: C,
    config: PermissionConfig,
    locks: KeyedLocks,
}

impl<S: StorageEffects, C: ClockEffects> PermissionStore<S, C> {
    pub fn new(storage: S, clock: C, config: PermissionConfig) -> Self {
        Self {
            storage,
            clock,
            config,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    /// Record ALLOW. Sensitive kinds are clamped to the configured maximum
    /// lifetime. Returns `None` when the duration does not persist.
    pub async fn grant(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
        duration: GrantDuration,
    ) -> Result<Option<Permission>> {
        self.record(
            caller,
            request_type,
            KindScope::from_kind(kind),
            Decision::Allow,
            duration,
        )
        .await
    }

    /// Record DENY.
    pub async fn deny(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
        duration: GrantDuration,
    ) -> Result<Option<Permission>> {
        self.record(
            caller,
            request_type,
            KindScope::from_kind(kind),
            Decision::Deny,
            duration,
        )
        .await
    }

    /// Record ASK with no expiry, so the tuple always re-prompts.
    pub async fn set_ask(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
    ) -> Result<Permission> {
        self.record(
            caller,
            request_type,
            KindScope::from_kind(kind),
            Decision::Ask,
            GrantDuration::Forever,
        )
        .await?
        .ok_or_else(|| KeygateError::internal("ask decision was not persisted"))
    }

    /// Upsert a decision for an explicit scope.
    pub async fn record(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        scope: KindScope,
        decision: Decision,
        duration: GrantDuration,
    ) -> Result<Option<Permission>> {
        if !duration.persists() {
            debug!(caller = %caller, request_type = %request_type, "one-time decision not persisted");
            return Ok(None);
        }

        let lifetime_ms = self.effective_lifetime(scope, decision, duration);
        let key = permission_key(caller, request_type, scope);
        let _guard = self.locks.lock(&key).await;
        let now = self.clock.reading();

        let id = match self.read_json::<Permission>(&key).await? {
            Some(existing) => existing.id,
            None => Uuid::new_v4(),
        };
        let permission = Permission {
            id,
            caller_id: caller.clone(),
            request_type,
            scope,
            decision,
            lifetime: Lifetime::starting_at(now, lifetime_ms),
        };
        self.write_json(&key, &permission).await?;
        self.register_if_unknown(caller).await?;

        info!(
            caller = %caller,
            request_type = %request_type,
            scope = ?scope,
            decision = %decision,
            expires_at = ?permission.lifetime.expires_at,
            "permission recorded"
        );
        Ok(Some(permission))
    }

    fn effective_lifetime(
        &self,
        scope: KindScope,
        decision: Decision,
        duration: GrantDuration,
    ) -> Option<u64> {
        let requested = duration.millis();
        let sensitive = scope.kind().is_some_and(is_sensitive);
        if decision != Decision::Allow || !sensitive {
            return requested;
        }
        let cap = self.config.sensitive_max_duration_ms;
        Some(requested.map_or(cap, |ms| ms.min(cap)))
    }

    /// Resolve the live decision for a request.
    ///
    /// The exact kind is tried first; a non-sensitive kind then falls back to
    /// the generic row. Sensitive kinds never fall back. Expired rows found
    /// along the way are deleted.
    pub async fn decision_for(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
    ) -> Result<Option<Decision>> {
        Ok(self
            .permission_for(caller, request_type, kind)
            .await?
            .map(|p| p.decision))
    }

    /// Like [`decision_for`](Self::decision_for), returning the matched row.
    pub async fn permission_for(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        kind: Option<EventKind>,
    ) -> Result<Option<Permission>> {
        if let Some(kind) = kind {
            let exact = permission_key(caller, request_type, KindScope::Specific(kind));
            if let Some(permission) = self.live_permission(&exact).await? {
                return Ok(Some(permission));
            }
            if is_sensitive(kind) {
                return Ok(None);
            }
        }
        let generic = permission_key(caller, request_type, KindScope::Generic);
        self.live_permission(&generic).await
    }

    async fn live_permission(&self, key: &str) -> Result<Option<Permission>> {
        let _guard = self.locks.lock(key).await;
        let Some(permission) = self.read_json::<Permission>(key).await? else {
            return Ok(None);
        };
        let now = self.clock.reading();
        if let Some(reason) = permission
            .lifetime
            .expiry_reason(now, self.config.clock_skew_tolerance_ms)
        {
            self.storage.remove(key).await?;
            debug!(key, ?reason, "expired permission removed on read");
            return Ok(None);
        }
        Ok(Some(permission))
    }

    /// Every stored row for a caller, expired or not.
    pub async fn permissions(&self, caller: &CallerId) -> Result<Vec<Permission>> {
        let mut rows = Vec::new();
        for key in self.storage.list_keys(&caller_prefix(caller)).await? {
            if let Some(permission) = self.read_json::<Permission>(&key).await? {
                rows.push(permission);
            }
        }
        Ok(rows)
    }

    /// Delete one tuple. Returns whether a row existed.
    pub async fn revoke(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        scope: KindScope,
    ) -> Result<bool> {
        let key = permission_key(caller, request_type, scope);
        let _guard = self.locks.lock(&key).await;
        let removed = self.storage.remove(&key).await?;
        info!(caller = %caller, request_type = %request_type, scope = ?scope, removed, "permission revoked");
        Ok(removed)
    }

    /// Delete every permission held by a caller.
    pub async fn revoke_all(&self, caller: &CallerId) -> Result<usize> {
        let mut removed = 0;
        for key in self.storage.list_keys(&caller_prefix(caller)).await? {
            let _guard = self.locks.lock(&key).await;
            if self.storage.remove(&key).await? {
                removed += 1;
            }
        }
        info!(caller = %caller, removed, "all permissions revoked");
        Ok(removed)
    }

    /// Delete every expired permission and settings row.
    pub async fn cleanup_expired(&self) -> Result<CleanupReport> {
        let permissions_removed = self.sweep::<Permission>(PERMISSION_PREFIX).await?;
        let apps_removed = self.sweep::<AppSettings>(APP_PREFIX).await?;
        let report = CleanupReport {
            permissions_removed,
            apps_removed,
        };
        info!(
            permissions_removed,
            apps_removed, "expired permission sweep complete"
        );
        Ok(report)
    }

    async fn sweep<T>(&self, prefix: &str) -> Result<usize>
    where
        T: DeserializeOwned + HasLifetime,
    {
        let mut removed = 0;
        for key in self.storage.list_keys(prefix).await? {
            let _guard = self.locks.lock(&key).await;
            let Some(row) = self.read_json::<T>(&key).await? else {
                continue;
            };
            let now = self.clock.reading();
            if let Some(reason) = row
                .lifetime()
                .expiry_reason(now, self.config.clock_skew_tolerance_ms)
            {
                self.storage.remove(&key).await?;
                debug!(key = %key, ?reason, "expired row removed");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// One row per caller holding a live permission, ordered by caller.
    pub async fn connected_apps<AS, AC>(&self, audit: &AuditLog<AS, AC>) -> Result<Vec<ConnectedApp>>
    where
        AS: StorageEffects,
        AC: ClockEffects,
    {
        let now = self.clock.reading();
        let mut counts: BTreeMap<CallerId, usize> = BTreeMap::new();
        for key in self.storage.list_keys(PERMISSION_PREFIX).await? {
            if let Some(permission) = self.read_json::<Permission>(&key).await? {
                if !permission.is_expired(now, self.config.clock_skew_tolerance_ms) {
                    *counts.entry(permission.caller_id).or_default() += 1;
                }
            }
        }

        let mut apps = Vec::with_capacity(counts.len());
        for (caller_id, permission_count) in counts {
            let last_used = audit.last_used_time(&caller_id).await?;
            apps.push(ConnectedApp {
                caller_id,
                permission_count,
                last_used,
            });
        }
        Ok(apps)
    }

    /// Live settings for a caller; expired rows are deleted and read as absent.
    pub async fn app_settings(&self, caller: &CallerId) -> Result<Option<AppSettings>> {
        let key = app_key(caller);
        let _guard = self.locks.lock(&key).await;
        self.live_settings(&key).await
    }

    async fn live_settings(&self, key: &str) -> Result<Option<AppSettings>> {
        let Some(settings) = self.read_json::<AppSettings>(key).await? else {
            return Ok(None);
        };
        let now = self.clock.reading();
        if settings
            .lifetime
            .is_expired(now, self.config.clock_skew_tolerance_ms)
        {
            self.storage.remove(key).await?;
            debug!(key, "expired app settings removed on read");
            return Ok(None);
        }
        Ok(Some(settings))
    }

    /// Register a caller, or extend an existing registration.
    ///
    /// An existing row keeps its creation stamps; only the bound moves, and
    /// it is re-based so both clocks agree on the new end.
    pub async fn connect_app(
        &self,
        caller: &CallerId,
        duration: GrantDuration,
    ) -> Result<AppSettings> {
        if !duration.persists() {
            return Err(KeygateError::invalid(
                "an app registration cannot be one-time",
            ));
        }
        let key = app_key(caller);
        let _guard = self.locks.lock(&key).await;
        let now = self.clock.reading();

        let settings = match self.live_settings(&key).await? {
            Some(mut existing) => {
                let lifetime = &mut existing.lifetime;
                match duration.millis() {
                    Some(ms) => {
                        let elapsed = match now
                            .monotonic_ms
                            .checked_sub(lifetime.created_at_monotonic)
                        {
                            Some(elapsed) => elapsed,
                            None => {
                                // Rebooted since registration; the old stamp is meaningless.
                                lifetime.created_at_monotonic = now.monotonic_ms;
                                0
                            }
                        };
                        lifetime.expires_at = Some(now.wall_ms.saturating_add(ms));
                        lifetime.duration_ms = Some(elapsed.saturating_add(ms));
                    }
                    None => {
                        lifetime.expires_at = None;
                        lifetime.duration_ms = None;
                    }
                }
                existing
            }
            None => AppSettings::registered(
                caller.clone(),
                Lifetime::starting_at(now, duration.millis()),
            ),
        };
        self.write_json(&key, &settings).await?;
        info!(caller = %caller, expires_at = ?settings.lifetime.expires_at, "app connected");
        Ok(settings)
    }

    /// Set or clear the caller's signing-policy override.
    pub async fn set_sign_policy(
        &self,
        caller: &CallerId,
        policy: Option<SignPolicy>,
    ) -> Result<AppSettings> {
        let key = app_key(caller);
        let _guard = self.locks.lock(&key).await;
        let mut settings = match self.live_settings(&key).await? {
            Some(settings) => settings,
            None => AppSettings::registered(
                caller.clone(),
                Lifetime::unbounded(self.clock.reading()),
            ),
        };
        settings.sign_policy_override = policy;
        self.write_json(&key, &settings).await?;
        info!(caller = %caller, policy = ?policy, "sign policy override updated");
        Ok(settings)
    }

    /// How long the caller has been known, or `None` if unknown or
    /// untrustworthy.
    pub async fn app_age_ms(&self, caller: &CallerId) -> Result<Option<u64>> {
        let now = self.clock.reading();
        Ok(self
            .app_settings(caller)
            .await?
            .and_then(|settings| settings.lifetime.age_ms(now)))
    }

    async fn register_if_unknown(&self, caller: &CallerId) -> Result<()> {
        let key = app_key(caller);
        let _guard = self.locks.lock(&key).await;
        if self.live_settings(&key).await?.is_none() {
            let settings =
                AppSettings::registered(caller.clone(), Lifetime::unbounded(self.clock.reading()));
            self.write_json(&key, &settings).await?;
            debug!(caller = %caller, "caller registered on first decision");
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.retrieve(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                warn!(key, error = %e, "undecodable record");
                KeygateError::from(e)
            }),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.storage.store(key, bytes).await?;
        Ok(())
    }
}

/// Rows the expiry sweep understands.
trait HasLifetime {
    fn lifetime(&self) -> &Lifetime;
}

impl HasLifetime for Permission {
    fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }
}

impl HasLifetime for AppSettings {
    fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_per_tuple() {
        let caller = CallerId::new("app").unwrap();
        assert_eq!(
            permission_key(&caller, RequestType::SignEvent, KindScope::Generic),
            "perm/617070/sign_event/generic"
        );
        assert_eq!(
            permission_key(
                &caller,
                RequestType::SignEvent,
                KindScope::Specific(EventKind::new(1))
            ),
            "perm/617070/sign_event/1"
        );
        assert_eq!(app_key(&caller), "app/617070");
    }

    #[test]
    fn caller_prefix_does_not_match_longer_callers() {
        let short = CallerId::new("ab").unwrap();
        let long = CallerId::new("abc").unwrap();
        let key = permission_key(&long, RequestType::GetPublicKey, KindScope::Generic);
        assert!(!key.starts_with(&caller_prefix(&short)));
    }
}
