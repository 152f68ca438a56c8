//! keygate operator CLI
//!
//! Inspects and manages the decisions, app settings and audit trail a
//! signer has stored. Interactive prompting lives in the host application;
//! this tool only works on persisted state.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{
    apps::{self, GrantArgs, RevokeArgs},
    audit::{handle_audit_command, AuditCommand},
};

#[derive(Parser)]
#[command(name = "keygate")]
#[command(about = "keygate - signing request authorization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = ".keygate/config.toml")]
    config: PathBuf,

    /// Directory holding permissions and the audit log
    #[arg(short, long, global = true, default_value = ".keygate/data")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List callers holding live permissions
    Apps,

    /// Show every stored permission of a caller
    Permissions {
        /// Caller identifier
        caller: String,
    },

    /// Store a decision for a caller
    Grant(GrantArgs),

    /// Remove one stored decision, or all of a caller's
    Revoke(RevokeArgs),

    /// Show or set a caller's signing policy
    Policy {
        /// Caller identifier
        caller: String,

        /// manual, basic, trusted, or default to clear the override
        policy: Option<String>,
    },

    /// Compute the risk assessment a request would get right now
    Assess {
        /// Caller identifier
        caller: String,

        /// Event kind of the prospective request
        #[arg(short, long)]
        kind: Option<i64>,
    },

    /// Delete expired permissions and app settings
    Cleanup,

    /// Audit log operations
    #[command(subcommand)]
    Audit(AuditCommand),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let engine = commands::open_engine(&cli.config, &cli.data_dir).await?;

    match cli.command {
        Commands::Apps => apps::list_apps(&engine).await?,
        Commands::Permissions { caller } => apps::show_permissions(&engine, &caller).await?,
        Commands::Grant(args) => apps::grant(&engine, args).await?,
        Commands::Revoke(args) => apps::revoke(&engine, args).await?,
        Commands::Policy { caller, policy } => {
            apps::policy(&engine, &caller, policy.as_deref()).await?;
        }
        Commands::Assess { caller, kind } => apps::assess(&engine, &caller, kind).await?,
        Commands::Cleanup => apps::cleanup(&engine).await?,
        Commands::Audit(cmd) => handle_audit_command(&engine, cmd).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_apply_to_subcommands() {
        let cli = Cli::try_parse_from([
            "keygate",
            "audit",
            "log",
            "--limit",
            "5",
            "-d",
            "/tmp/kg",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/kg"));
        assert!(matches!(
            cli.command,
            Commands::Audit(AuditCommand::Log { limit: 5, .. })
        ));
    }

    #[test]
    fn grant_defaults() {
        let cli = Cli::try_parse_from(["keygate", "grant", "com.example"]).unwrap();
        let Commands::Grant(args) = cli.command else {
            panic!("expected grant");
        };
        assert_eq!(args.request_type, "sign_event");
        assert_eq!(args.duration, "forever");
        assert!(!args.deny);
        assert_eq!(args.kind, None);
    }

    #[test]
    fn revoke_all_conflicts_with_scope() {
        assert!(Cli::try_parse_from(["keygate", "revoke", "app", "--all", "-k", "1"]).is_err());
        assert!(Cli::try_parse_from(["keygate", "revoke", "app", "--all"]).is_ok());
    }
}
