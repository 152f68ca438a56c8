// Caller and permission management commands
//
// Everything here works on stored state only: listing callers, editing
// remembered decisions and signing policies, and previewing risk.

use anyhow::{bail, Result};
use clap::Args;
use keygate_agent::FilesystemPolicyEngine;
use keygate_authorization::{classify, sensitive_warning, Permission};
use keygate_core::{GrantDuration, KindScope, RequestType, SignPolicy};
use tracing::info;

use super::{format_timestamp, parse_caller, parse_kind};

#[derive(Args, Debug)]
pub struct GrantArgs {
    /// Caller identifier
    pub caller: String,

    /// Request type the decision applies to
    #[arg(short = 't', long, default_value = "sign_event")]
    pub request_type: String,

    /// Event kind; omit for every non-sensitive kind
    #[arg(short, long)]
    pub kind: Option<i64>,

    /// once, 5m, 1h, 1d, 1w or forever
    #[arg(long, default_value = "forever")]
    pub duration: String,

    /// Store a DENY instead of an ALLOW
    #[arg(long)]
    pub deny: bool,
}

#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Caller identifier
    pub caller: String,

    /// Request type of the decision to remove
    #[arg(short = 't', long)]
    pub request_type: Option<String>,

    /// Event kind; omit for the generic decision
    #[arg(short, long)]
    pub kind: Option<i64>,

    /// Remove every decision stored for the caller
    #[arg(long, conflicts_with_all = ["request_type", "kind"])]
    pub all: bool,
}

pub async fn list_apps(engine: &FilesystemPolicyEngine) -> Result<()> {
    let apps = engine.connected_apps().await?;
    if apps.is_empty() {
        println!("No connected apps");
        return Ok(());
    }
    for app in apps {
        let last_used = app
            .last_used
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  permissions: {}  last used: {last_used}",
            app.caller_id, app.permission_count
        );
    }
    Ok(())
}

pub async fn show_permissions(engine: &FilesystemPolicyEngine, caller: &str) -> Result<()> {
    let caller = parse_caller(caller)?;
    let rows = engine.permissions().permissions(&caller).await?;
    if rows.is_empty() {
        println!("No stored permissions for {caller}");
        return Ok(());
    }
    for row in rows {
        println!("{}", format_permission(&row));
    }
    Ok(())
}

fn format_permission(permission: &Permission) -> String {
    let scope = match permission.scope {
        KindScope::Generic => "*".to_string(),
        KindScope::Specific(kind) => kind.to_string(),
    };
    let expires = permission
        .lifetime
        .expires_at
        .map(format_timestamp)
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{:<20} kind {:<6} {:<5} expires {expires}",
        permission.request_type.as_str(),
        scope,
        permission.decision.as_str()
    )
}

pub async fn grant(engine: &FilesystemPolicyEngine, args: GrantArgs) -> Result<()> {
    let caller = parse_caller(&args.caller)?;
    let request_type: RequestType = args.request_type.parse()?;
    let kind = parse_kind(args.kind)?;
    let duration: GrantDuration = args.duration.parse()?;
    if !duration.persists() {
        bail!("a one-time decision cannot be stored");
    }

    let stored = if args.deny {
        engine.deny(&caller, request_type, kind, duration).await?
    } else {
        engine.grant(&caller, request_type, kind, duration).await?
    };
    if let Some(permission) = stored {
        info!(caller = %caller, id = %permission.id, "decision stored");
        println!("{}", format_permission(&permission));
    }
    Ok(())
}

pub async fn revoke(engine: &FilesystemPolicyEngine, args: RevokeArgs) -> Result<()> {
    let caller = parse_caller(&args.caller)?;
    if args.all {
        let removed = engine.revoke_all(&caller).await?;
        println!("Removed {removed} permissions for {caller}");
        return Ok(());
    }

    let Some(request_type) = args.request_type else {
        bail!("pass --request-type, or --all to remove everything");
    };
    let request_type: RequestType = request_type.parse()?;
    let scope = KindScope::from_kind(parse_kind(args.kind)?);
    if engine.revoke(&caller, request_type, scope).await? {
        println!("Revoked {request_type} ({}) for {caller}", scope.storage_token());
    } else {
        println!("Nothing stored for {request_type} ({})", scope.storage_token());
    }
    Ok(())
}

pub async fn policy(
    engine: &FilesystemPolicyEngine,
    caller: &str,
    policy: Option<&str>,
) -> Result<()> {
    let caller = parse_caller(caller)?;
    match policy {
        None => {}
        Some("default") => {
            engine.set_sign_policy(&caller, None).await?;
        }
        Some(policy) => {
            let policy: SignPolicy = policy.parse()?;
            engine.set_sign_policy(&caller, Some(policy)).await?;
        }
    }
    println!("{caller}: {}", engine.sign_policy(&caller).await?);
    Ok(())
}

pub async fn assess(
    engine: &FilesystemPolicyEngine,
    caller: &str,
    kind: Option<i64>,
) -> Result<()> {
    let caller = parse_caller(caller)?;
    let kind = parse_kind(kind)?;
    let assessment = engine.assess(&caller, kind).await?;
    println!(
        "score {}  required auth {}  kind class {:?}",
        assessment.score,
        assessment.required_auth,
        classify(kind)
    );
    if let Some(warning) = kind.and_then(sensitive_warning) {
        println!("  warning: {warning}");
    }
    for factor in &assessment.factors {
        println!("  {factor} (+{})", factor.weight());
    }
    Ok(())
}

pub async fn cleanup(engine: &FilesystemPolicyEngine) -> Result<()> {
    let report = engine.cleanup_expired().await?;
    println!(
        "Removed {} expired permissions and {} expired app settings",
        report.permissions_removed, report.apps_removed
    );
    Ok(())
}
