//! Permission store behaviour: resolution order, clamping, upserts and the
//! four independent expiry triggers.

use std::sync::Arc;

use keygate_authorization::{PermissionStore, RiskAssessor};
use keygate_core::effects::ClockEffects;
use keygate_core::{
    CallerId, Decision, EventKind, GrantDuration, KindScope, PermissionConfig, RequestType,
    SignPolicy,
};
use keygate_effects::MemoryStorageHandler;
use keygate_journal::{AuditLog, AuditRecord};
use keygate_testkit::{ControllableClock, FaultyStorage};

const MINUTE: u64 = 60_000;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

type Store = PermissionStore<MemoryStorageHandler, ControllableClock>;

fn store() -> (Store, MemoryStorageHandler, ControllableClock) {
    let storage = MemoryStorageHandler::new();
    let clock = ControllableClock::default();
    let store = PermissionStore::new(storage.clone(), clock.clone(), PermissionConfig::default());
    (store, storage, clock)
}

fn app(name: &str) -> CallerId {
    CallerId::new(name).unwrap()
}

fn kind(k: u16) -> Option<EventKind> {
    Some(EventKind::new(k))
}

const SIGN: RequestType = RequestType::SignEvent;

#[tokio::test]
async fn just_once_is_never_resolvable() {
    let (store, storage, _) = store();
    let x = app("x");
    let recorded = store.grant(&x, SIGN, kind(1), GrantDuration::JustOnce).await.unwrap();
    assert!(recorded.is_none());
    assert_eq!(store.decision_for(&x, SIGN, kind(1)).await.unwrap(), None);
    assert!(storage.is_empty().await);
}

#[tokio::test]
async fn sensitive_forever_grants_are_bounded() {
    let (store, _, clock) = store();
    let x = app("x");
    let now = clock.physical_time_ms();
    for k in [0, 3, 4, 1059, 1984, 10_002, 30_000, 39_999] {
        let permission = store
            .grant(&x, SIGN, kind(k), GrantDuration::Forever)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(permission.lifetime.expires_at, Some(now + 30 * DAY), "kind {k}");
        assert_eq!(permission.lifetime.duration_ms, Some(30 * DAY));
    }
    // Non-sensitive forever stays unbounded.
    let permission = store
        .grant(&x, SIGN, kind(1), GrantDuration::Forever)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(permission.lifetime.expires_at, None);
}

#[tokio::test]
async fn sensitive_finite_grants_are_capped() {
    let storage = MemoryStorageHandler::new();
    let clock = ControllableClock::default();
    let config = PermissionConfig {
        sensitive_max_duration_ms: DAY,
        ..PermissionConfig::default()
    };
    let store = PermissionStore::new(storage, clock.clone(), config);
    let x = app("x");

    let week = store
        .grant(&x, SIGN, kind(3), GrantDuration::OneWeek)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(week.lifetime.duration_ms, Some(DAY));

    let hour = store
        .grant(&x, SIGN, kind(4), GrantDuration::OneHour)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hour.lifetime.duration_ms, Some(HOUR));

    // Denials are not loosened by the cap.
    let deny = store
        .deny(&x, SIGN, kind(0), GrantDuration::Forever)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deny.lifetime.expires_at, None);
}

#[tokio::test]
async fn specific_grant_does_not_cover_other_kinds() {
    let (store, _, _) = store();
    let x = app("x");
    store.grant(&x, SIGN, kind(1), GrantDuration::Forever).await.unwrap();
    assert_eq!(
        store.decision_for(&x, SIGN, kind(1)).await.unwrap(),
        Some(Decision::Allow)
    );
    assert_eq!(store.decision_for(&x, SIGN, kind(7)).await.unwrap(), None);
    assert_eq!(store.decision_for(&x, SIGN, None).await.unwrap(), None);
}

#[tokio::test]
async fn generic_grant_covers_only_non_sensitive_kinds() {
    let (store, _, _) = store();
    let x = app("x");
    store.grant(&x, SIGN, None, GrantDuration::Forever).await.unwrap();

    for k in [1, 7, 9735, 29_999, 40_000] {
        assert_eq!(
            store.decision_for(&x, SIGN, kind(k)).await.unwrap(),
            Some(Decision::Allow),
            "kind {k}"
        );
    }
    for k in [0, 3, 4, 30_000, 39_999] {
        assert_eq!(store.decision_for(&x, SIGN, kind(k)).await.unwrap(), None, "kind {k}");
    }
    assert_eq!(store.decision_for(&x, SIGN, None).await.unwrap(), Some(Decision::Allow));

    // Same caller, other request type: nothing.
    assert_eq!(
        store
            .decision_for(&x, RequestType::Nip44Decrypt, kind(1))
            .await
            .unwrap(),
        None
    );
    // Other caller: nothing.
    assert_eq!(store.decision_for(&app("y"), SIGN, kind(1)).await.unwrap(), None);
}

#[tokio::test]
async fn exact_kind_wins_over_generic() {
    let (store, _, _) = store();
    let x = app("x");
    store.grant(&x, SIGN, None, GrantDuration::Forever).await.unwrap();
    store.deny(&x, SIGN, kind(1), GrantDuration::Forever).await.unwrap();
    assert_eq!(
        store.decision_for(&x, SIGN, kind(1)).await.unwrap(),
        Some(Decision::Deny)
    );
    assert_eq!(
        store.decision_for(&x, SIGN, kind(2)).await.unwrap(),
        Some(Decision::Allow)
    );
}

#[tokio::test]
async fn upsert_keeps_one_row_with_latest_decision() {
    let (store, _, _) = store();
    let x = app("x");
    let first = store
        .grant(&x, SIGN, kind(1), GrantDuration::Forever)
        .await
        .unwrap()
        .unwrap();
    store.grant(&x, SIGN, kind(1), GrantDuration::OneHour).await.unwrap();
    let last = store
        .deny(&x, SIGN, kind(1), GrantDuration::OneDay)
        .await
        .unwrap()
        .unwrap();

    let rows = store.permissions(&x).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].decision, Decision::Deny);
    assert_eq!(rows[0].id, first.id);
    assert_eq!(rows[0], last);
}

#[tokio::test]
async fn concurrent_upserts_leave_one_row() {
    let (store, _, _) = store();
    let store = Arc::new(store);
    let x = app("x");
    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        let x = x.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                store.grant(&x, SIGN, kind(1), GrantDuration::Forever).await
            } else {
                store.deny(&x, SIGN, kind(1), GrantDuration::Forever).await
            }
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().unwrap().id);
    }
    assert_eq!(store.permissions(&x).await.unwrap().len(), 1);
    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn set_ask_has_no_expiry() {
    let (store, _, clock) = store();
    let x = app("x");
    let permission = store.set_ask(&x, SIGN, kind(1)).await.unwrap();
    assert_eq!(permission.decision, Decision::Ask);
    assert_eq!(permission.lifetime.expires_at, None);
    assert_eq!(permission.lifetime.duration_ms, None);

    clock.advance(365 * DAY);
    assert_eq!(
        store.decision_for(&x, SIGN, kind(1)).await.unwrap(),
        Some(Decision::Ask)
    );
}

/// Grants kinds 1 and 2, runs `tamper`, then checks that kind 1 no longer
/// resolves and a sweep removes the untouched kind 2 row.
async fn assert_expiry_trigger(
    duration: GrantDuration,
    before: impl Fn(&ControllableClock),
    tamper: impl Fn(&ControllableClock),
) -> keygate_authorization::CleanupReport {
    let (store, _, clock) = store();
    let x = app("x");
    before(&clock);
    store.grant(&x, SIGN, kind(1), duration).await.unwrap();
    store.grant(&x, SIGN, kind(2), duration).await.unwrap();
    assert_eq!(
        store.decision_for(&x, SIGN, kind(1)).await.unwrap(),
        Some(Decision::Allow)
    );

    tamper(&clock);
    assert_eq!(store.decision_for(&x, SIGN, kind(1)).await.unwrap(), None);
    let report = store.cleanup_expired().await.unwrap();
    assert_eq!(report.permissions_removed, 1);
    assert!(store.permissions(&x).await.unwrap().is_empty());
    report
}

#[tokio::test]
async fn expiry_wall_clock_elapsed() {
    let report = assert_expiry_trigger(
        GrantDuration::OneHour,
        |_| {},
        |clock| clock.advance_wall(HOUR),
    )
    .await;
    assert_eq!(report.apps_removed, 0);
}

#[tokio::test]
async fn expiry_created_in_future() {
    // Clock rolled forward, grant made, clock put back.
    let report = assert_expiry_trigger(
        GrantDuration::Forever,
        |clock| clock.advance_wall(DAY),
        |clock| clock.rewind_wall(DAY),
    )
    .await;
    // The caller was registered at the forged time too.
    assert_eq!(report.apps_removed, 1);
}

#[tokio::test]
async fn expiry_monotonic_elapsed() {
    // Wall clock held back while real time passes.
    let report = assert_expiry_trigger(
        GrantDuration::OneHour,
        |_| {},
        |clock| clock.advance_monotonic(HOUR),
    )
    .await;
    assert_eq!(report.apps_removed, 0);
}

#[tokio::test]
async fn expiry_monotonic_regression() {
    let report = assert_expiry_trigger(
        GrantDuration::OneDay,
        |_| {},
        |clock| clock.reboot(1_000),
    )
    .await;
    assert_eq!(report.apps_removed, 0);
}

#[tokio::test]
async fn small_skew_is_tolerated() {
    let (store, _, clock) = store();
    let x = app("x");
    store.grant(&x, SIGN, None, GrantDuration::Forever).await.unwrap();
    clock.rewind_wall(30_000);
    assert_eq!(store.decision_for(&x, SIGN, None).await.unwrap(), Some(Decision::Allow));
}

#[tokio::test]
async fn revoke_one_and_all() {
    let (store, _, _) = store();
    let x = app("x");
    store.grant(&x, SIGN, None, GrantDuration::Forever).await.unwrap();
    store.grant(&x, SIGN, kind(1), GrantDuration::Forever).await.unwrap();
    store
        .grant(&x, RequestType::GetPublicKey, None, GrantDuration::Forever)
        .await
        .unwrap();
    store.grant(&app("y"), SIGN, None, GrantDuration::Forever).await.unwrap();

    let specific = KindScope::Specific(EventKind::new(1));
    assert!(store.revoke(&x, SIGN, specific).await.unwrap());
    assert!(!store.revoke(&x, SIGN, specific).await.unwrap());
    // Generic still answers for kind 1.
    assert_eq!(
        store.decision_for(&x, SIGN, kind(1)).await.unwrap(),
        Some(Decision::Allow)
    );

    assert_eq!(store.revoke_all(&x).await.unwrap(), 2);
    assert!(store.permissions(&x).await.unwrap().is_empty());
    assert_eq!(
        store.decision_for(&app("y"), SIGN, None).await.unwrap(),
        Some(Decision::Allow)
    );
}

#[tokio::test]
async fn storage_failures_are_errors_not_absence() {
    let storage = FaultyStorage::in_memory();
    let store = PermissionStore::new(
        storage.clone(),
        ControllableClock::default(),
        PermissionConfig::default(),
    );
    let x = app("x");
    store.grant(&x, SIGN, None, GrantDuration::Forever).await.unwrap();

    storage.fail_reads(true);
    assert!(store.decision_for(&x, SIGN, kind(1)).await.unwrap_err().is_storage());
    assert!(store.cleanup_expired().await.unwrap_err().is_storage());

    storage.fail_reads(false);
    storage.fail_writes(true);
    assert!(store
        .grant(&x, SIGN, kind(1), GrantDuration::Forever)
        .await
        .unwrap_err()
        .is_storage());
}

#[tokio::test]
async fn connected_apps_report_counts_and_last_use() {
    let (store, storage, clock) = store();
    let audit = AuditLog::new(storage, clock.clone());
    let (x, y, z) = (app("x"), app("y"), app("z"));

    store.grant(&x, SIGN, None, GrantDuration::Forever).await.unwrap();
    store.grant(&x, SIGN, kind(1), GrantDuration::OneHour).await.unwrap();
    store.deny(&y, SIGN, None, GrantDuration::Forever).await.unwrap();
    store.grant(&z, SIGN, None, GrantDuration::FiveMinutes).await.unwrap();

    audit
        .append(AuditRecord::automatic(x.clone(), SIGN, kind(1), Decision::Allow))
        .await
        .unwrap();
    let used_at = clock.physical_time_ms();
    clock.advance(10 * MINUTE);
    audit
        .append(AuditRecord::automatic(x.clone(), SIGN, kind(1), Decision::Deny))
        .await
        .unwrap();

    let apps = store.connected_apps(&audit).await.unwrap();
    assert_eq!(apps.len(), 2);
    assert_eq!(apps[0].caller_id, x);
    assert_eq!(apps[0].permission_count, 2);
    assert_eq!(apps[0].last_used, Some(used_at));
    assert_eq!(apps[1].caller_id, y);
    assert_eq!(apps[1].last_used, None);
}

#[tokio::test]
async fn first_decision_registers_the_caller() {
    let (store, _, clock) = store();
    let x = app("x");
    assert_eq!(store.app_settings(&x).await.unwrap(), None);
    assert_eq!(store.app_age_ms(&x).await.unwrap(), None);

    store.grant(&x, SIGN, None, GrantDuration::OneHour).await.unwrap();
    let settings = store.app_settings(&x).await.unwrap().unwrap();
    assert_eq!(settings.lifetime.created_at, clock.physical_time_ms());
    assert_eq!(settings.lifetime.expires_at, None);

    clock.advance(2 * DAY);
    assert_eq!(store.app_age_ms(&x).await.unwrap(), Some(2 * DAY));

    // Pushing the wall clock forward does not age the caller.
    clock.advance_wall(30 * DAY);
    assert_eq!(store.app_age_ms(&x).await.unwrap(), Some(2 * DAY));

    // After a reboot the age cannot be trusted.
    clock.reboot(5_000);
    assert_eq!(store.app_age_ms(&x).await.unwrap(), None);
}

#[tokio::test]
async fn connect_app_preserves_creation_stamps() {
    let (store, _, clock) = store();
    let x = app("x");
    let first = store.connect_app(&x, GrantDuration::OneWeek).await.unwrap();
    clock.advance(2 * DAY);

    let extended = store.connect_app(&x, GrantDuration::OneDay).await.unwrap();
    assert_eq!(extended.lifetime.created_at, first.lifetime.created_at);
    assert_eq!(
        extended.lifetime.created_at_monotonic,
        first.lifetime.created_at_monotonic
    );
    assert_eq!(
        extended.lifetime.expires_at,
        Some(clock.physical_time_ms() + DAY)
    );

    clock.advance(DAY - 1);
    assert!(store.app_settings(&x).await.unwrap().is_some());
    clock.advance(1);
    assert_eq!(store.app_settings(&x).await.unwrap(), None);

    assert!(store.connect_app(&x, GrantDuration::JustOnce).await.is_err());
}

#[tokio::test]
async fn sign_policy_override_round_trips() {
    let (store, _, _) = store();
    let x = app("x");
    let settings = store
        .set_sign_policy(&x, Some(SignPolicy::Trusted))
        .await
        .unwrap();
    assert_eq!(settings.sign_policy_override, Some(SignPolicy::Trusted));
    assert_eq!(
        store
            .app_settings(&x)
            .await
            .unwrap()
            .unwrap()
            .sign_policy_override,
        Some(SignPolicy::Trusted)
    );

    store.set_sign_policy(&x, None).await.unwrap();
    assert_eq!(
        store.app_settings(&x).await.unwrap().unwrap().sign_policy_override,
        None
    );
}

#[tokio::test]
async fn risk_signals_come_from_history_and_settings() {
    let (store, storage, clock) = store();
    let audit = AuditLog::new(storage, clock.clone());
    let x = app("x");

    let assessor = RiskAssessor::new(&audit, &store, &clock);
    let fresh = assessor.assess(&x, kind(4)).await.unwrap();
    // Sensitive, first use, unknown caller.
    assert_eq!(fresh.score, 70);
    assert_eq!(fresh.required_auth, keygate_core::AuthLevel::Explicit);

    store.connect_app(&x, GrantDuration::Forever).await.unwrap();
    clock.advance(2 * DAY);
    for _ in 0..11 {
        audit
            .append(AuditRecord::automatic(x.clone(), SIGN, kind(1), Decision::Allow))
            .await
            .unwrap();
    }
    let busy = assessor.signals(&x, kind(1)).await.unwrap();
    assert_eq!(busy.prior_kind_count, Some(11));
    assert_eq!(busy.recent_requests, 11);
    assert_eq!(busy.app_age_ms, Some(2 * DAY));
    let assessment = assessor.assess(&x, kind(1)).await.unwrap();
    assert_eq!(assessment.score, 20);
    assert_eq!(assessment.required_auth, keygate_core::AuthLevel::Pin);

    clock.advance(MINUTE + 1);
    clock.set_hour(3);
    let night = assessor.assess(&x, kind(1)).await.unwrap();
    assert_eq!(night.score, 10);
    assert_eq!(night.required_auth, keygate_core::AuthLevel::None);
}
