//! Restore CLI commands
//!
//! `restore` and `undo` overwrite live data, so both print a preview and
//! stop unless `--force` is given.

use clap::Args;

use crate::context::AuditContext;
use crate::display::{format_diff, format_preview, format_version_table};
use crate::error::{AuditError, AuditResult};
use crate::models::{ActorContext, EntityType};
use crate::restore::RestoreOutcome;
use crate::storage::SnapshotStore;

#[derive(Args)]
pub struct VersionsArgs {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Maximum number of audit records to include
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args)]
pub struct PreviewArgs {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub version: u32,
}

#[derive(Args)]
pub struct RestoreArgs {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Version to restore
    pub version: u32,
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct UndoArgs {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

pub async fn handle_versions_command(
    ctx: &AuditContext,
    actor: &ActorContext,
    args: VersionsArgs,
) -> AuditResult<()> {
    let history = ctx
        .version_history(args.entity_type, &args.entity_id, Some(args.limit), actor)
        .await?;

    println!("Versions: {} {}", args.entity_type, args.entity_id);
    println!();
    print!("{}", format_version_table(&history));
    Ok(())
}

pub async fn handle_preview_command(
    ctx: &AuditContext,
    actor: &ActorContext,
    args: PreviewArgs,
) -> AuditResult<()> {
    let preview = ctx
        .preview_restore(args.entity_type, &args.entity_id, args.version, actor)
        .await?;
    print!("{}", format_preview(&preview));
    Ok(())
}

pub async fn handle_restore_command(
    ctx: &AuditContext,
    actor: &ActorContext,
    args: RestoreArgs,
) -> AuditResult<()> {
    if !args.force {
        let preview = ctx
            .preview_restore(args.entity_type, &args.entity_id, args.version, actor)
            .await?;
        print!("{}", format_preview(&preview));
        println!();
        println!("WARNING: This will overwrite the current state!");
        println!("To proceed, run again with --force flag:");
        println!(
            "  rollcall restore {} {} {} --force",
            args.entity_type, args.entity_id, args.version
        );
        return Ok(());
    }

    let outcome = ctx
        .restore(args.entity_type, &args.entity_id, args.version, actor)
        .await?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn handle_undo_command(
    ctx: &AuditContext,
    actor: &ActorContext,
    args: UndoArgs,
) -> AuditResult<()> {
    if !args.force {
        let versions = ctx.snapshots().list_versions(args.entity_type, &args.entity_id)?;
        let (Some(latest), Some(previous)) = (versions.first(), versions.get(1)) else {
            return Err(AuditError::CannotUndo {
                entity_type: args.entity_type.to_string(),
                entity_id: args.entity_id.clone(),
                versions: versions.len(),
            });
        };

        println!(
            "Undo will restore {} {} from v{} back to v{}.",
            args.entity_type, args.entity_id, latest.version_number, previous.version_number
        );
        println!("To proceed, run again with --force flag:");
        println!("  rollcall undo {} {} --force", args.entity_type, args.entity_id);
        return Ok(());
    }

    let outcome = ctx
        .undo_last_change(args.entity_type, &args.entity_id, actor)
        .await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &RestoreOutcome) {
    println!("Restore complete!");
    println!("{}", outcome.summary());
    if let Some(diff) = &outcome.diff_applied {
        print!("{}", format_diff(diff));
    }
    if let Some(version) = outcome.new_snapshot_version {
        println!("Restored state saved as v{}", version);
    }
}
