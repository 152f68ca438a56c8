// Audit log commands

use anyhow::{bail, Result};
use clap::Subcommand;
use keygate_agent::FilesystemPolicyEngine;
use keygate_journal::{AuditLogEntry, ChainBreak, ChainVerification};
use tracing::warn;

use super::{format_timestamp, parse_caller};

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Show entries, newest first
    Log {
        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Entries to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Only entries for this caller
        #[arg(long)]
        caller: Option<String>,

        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Replay the hash chain and report the first break
    Verify,

    /// Delete entries older than the configured retention
    Sweep,
}

pub async fn handle_audit_command(
    engine: &FilesystemPolicyEngine,
    command: AuditCommand,
) -> Result<()> {
    match command {
        AuditCommand::Log {
            limit,
            offset,
            caller,
            json,
        } => {
            let entries = match caller {
                Some(caller) => {
                    let caller = parse_caller(&caller)?;
                    engine.audit().for_caller(&caller, limit, offset).await?
                }
                None => engine.audit().page(limit, offset).await?,
            };
            for entry in &entries {
                if json {
                    println!("{}", serde_json::to_string(entry)?);
                } else {
                    println!("{}", format_entry(entry));
                }
            }
        }
        AuditCommand::Verify => {
            let verification = engine.verify_audit().await?;
            println!("{}", format_verification(&verification));
            if !verification.is_intact() {
                warn!("audit chain verification failed");
                bail!("audit chain is broken");
            }
        }
        AuditCommand::Sweep => {
            let report = engine.sweep_audit().await?;
            println!("Removed {} audit entries", report.removed);
            if let Some(checkpoint) = report.checkpoint {
                println!(
                    "Chain now anchored at #{} ({})",
                    checkpoint.anchor_sequence, checkpoint.anchor_hash
                );
            }
        }
    }
    Ok(())
}

fn format_entry(entry: &AuditLogEntry) -> String {
    let kind = entry
        .event_kind
        .map(|k| k.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mode = if entry.was_automatic { "auto" } else { "user" };
    format!(
        "#{:<6} {} {:<24} {:<20} kind {:<6} {:<5} {mode}",
        entry.sequence,
        format_timestamp(entry.timestamp),
        entry.caller_id.as_str(),
        entry.request_type.as_str(),
        kind,
        entry.decision.as_str()
    )
}

fn format_verification(verification: &ChainVerification) -> String {
    match &verification.first_break {
        None => format!("Chain intact: {} entries verified", verification.entries_verified),
        Some((sequence, ChainBreak::HashMismatch { .. })) => format!(
            "Chain broken at #{sequence}: hash mismatch after {} verified entries",
            verification.entries_verified
        ),
        Some((sequence, ChainBreak::MissingEntry { expected_sequence })) => format!(
            "Chain broken at #{sequence}: entry #{expected_sequence} is missing"
        ),
    }
}
