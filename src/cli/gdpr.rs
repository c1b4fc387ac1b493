//! GDPR and retention CLI commands
//!
//! Only available when `retention.gdpr_enabled` is set in the config.

use clap::Subcommand;

use crate::context::AuditContext;
use crate::display::{format_actor_summary, format_pending_deletions};
use crate::error::AuditResult;
use crate::models::EntityType;

#[derive(Subcommand)]
pub enum GdprCommands {
    /// Strip actor details from every record about an entity
    Anonymize {
        entity_id: String,
        #[arg(short, long)]
        force: bool,
    },

    /// Strip actor details from every record written by an actor
    AnonymizeActor {
        actor_id: String,
        #[arg(short, long)]
        force: bool,
    },

    /// Schedule an entity for permanent deletion after the grace period
    Mark {
        entity_type: EntityType,
        entity_id: String,
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Cancel a scheduled deletion
    Recover { entity_id: String },

    /// Permanently delete a marked entity whose grace period has ended
    Purge {
        entity_id: String,
        #[arg(short, long)]
        force: bool,
    },

    /// List scheduled deletions
    Pending,

    /// Show what the audit trail holds about an actor
    Summary { actor_id: String },

    /// Move records older than the retention window to the archive
    Archive {
        /// Retention window in days (defaults to the configured value)
        #[arg(short, long)]
        days: Option<u32>,
        #[arg(short, long)]
        force: bool,
    },
}

fn confirm(force: bool, action: &str, command: &str) -> bool {
    if !force {
        println!("WARNING: {} cannot be undone!", action);
        println!("To proceed, run again with --force flag:");
        println!("  rollcall gdpr {} --force", command);
    }
    force
}

pub async fn handle_gdpr_command(ctx: &AuditContext, cmd: GdprCommands) -> AuditResult<()> {
    let compliance = ctx.compliance()?;

    match cmd {
        GdprCommands::Anonymize { entity_id, force } => {
            if confirm(force, "Anonymization", &format!("anonymize {}", entity_id)) {
                let changed = compliance.anonymize(&entity_id).await?;
                println!("Anonymized {} record(s) for {}", changed, entity_id);
            }
        }

        GdprCommands::AnonymizeActor { actor_id, force } => {
            if confirm(force, "Anonymization", &format!("anonymize-actor {}", actor_id)) {
                let changed = compliance.anonymize_actor(&actor_id).await?;
                println!("Anonymized {} record(s) written by {}", changed, actor_id);
            }
        }

        GdprCommands::Mark {
            entity_type,
            entity_id,
            reason,
        } => {
            let mark = compliance.mark_for_deletion(entity_type, &entity_id, reason)?;
            println!("Marked {} {} for deletion", entity_type, entity_id);
            println!(
                "Can be permanently deleted after {}",
                mark.deadline.format("%Y-%m-%d %H:%M UTC")
            );
        }

        GdprCommands::Recover { entity_id } => {
            compliance.recover(&entity_id)?;
            println!("Deletion of {} cancelled", entity_id);
        }

        GdprCommands::Purge { entity_id, force } => {
            if confirm(force, "Permanent deletion", &format!("purge {}", entity_id)) {
                let report = compliance.permanently_delete(&entity_id).await?;
                println!("Permanently deleted {} {}", report.entity_type, report.entity_id);
                println!("  Snapshots removed:   {}", report.snapshots_removed);
                println!("  Records anonymized:  {}", report.records_anonymized);
            }
        }

        GdprCommands::Pending => {
            let pending = compliance.pending_deletions()?;
            print!("{}", format_pending_deletions(&pending));
        }

        GdprCommands::Summary { actor_id } => {
            let summary = compliance.actor_summary(&actor_id).await?;
            print!("{}", format_actor_summary(&summary));
        }

        GdprCommands::Archive { days, force } => {
            let days = match days {
                Some(days) => days,
                None => ctx.config()?.retention.retention_days,
            };
            if confirm(force, "Archival", &format!("archive --days {}", days)) {
                let report = compliance.archive(days)?;
                println!("Archived:  {}", report.archived);
                println!("Remaining: {}", report.remaining);
                if let Some(path) = report.archive_path {
                    println!("Archive:   {}", path.display());
                }
            }
        }
    }

    Ok(())
}
