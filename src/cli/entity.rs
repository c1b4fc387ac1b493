//! Entity CLI commands
//!
//! Audited create/update/delete of live entities, mainly for operators and
//! for exercising the trail end to end.

use std::path::PathBuf;

use clap::Subcommand;

use crate::context::AuditContext;
use crate::error::{AuditError, AuditResult};
use crate::models::{ActorContext, EntityState, EntityType};
use crate::storage::EntityStore;

#[derive(Subcommand)]
pub enum EntityCommands {
    /// Create or overwrite an entity
    Put {
        entity_type: EntityType,
        entity_id: String,
        /// Entity state as a JSON object
        #[arg(required_unless_present = "file")]
        json: Option<String>,
        /// Read the state from a file instead
        #[arg(short, long, conflicts_with = "json")]
        file: Option<PathBuf>,
        /// Record the write as a bulk import
        #[arg(long)]
        import: bool,
    },

    /// Show the live state of an entity
    Show {
        entity_type: EntityType,
        entity_id: String,
    },

    /// List entity ids of a type
    List { entity_type: EntityType },

    /// Delete an entity
    Delete {
        entity_type: EntityType,
        entity_id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_state(json: Option<String>, file: Option<PathBuf>) -> AuditResult<EntityState> {
    let text = match (json, file) {
        (Some(json), _) => json,
        (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
            AuditError::Io(format!("Failed to read {}: {}", path.display(), e))
        })?,
        (None, None) => return Err(AuditError::Validation("No entity state given".into())),
    };
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| AuditError::Validation(format!("Invalid entity JSON: {}", e)))?;
    EntityState::from_value(value)
}

pub fn handle_entity_command(
    ctx: &AuditContext,
    actor: &ActorContext,
    cmd: EntityCommands,
) -> AuditResult<()> {
    match cmd {
        EntityCommands::Put {
            entity_type,
            entity_id,
            json,
            file,
            import,
        } => {
            let state = parse_state(json, file)?;
            let outcome = if import {
                ctx.audited().import(entity_type, &entity_id, state, actor)?
            } else {
                ctx.audited().upsert(entity_type, &entity_id, state, actor)?
            };

            println!("{} {} {}", capitalize(outcome.action.as_str()), entity_type, entity_id);
            if let Some(version) = outcome.snapshot_version {
                println!("Snapshot: v{}", version);
            }
            if !outcome.queued {
                println!("Note: no audit record was written for this change.");
            }
        }

        EntityCommands::Show {
            entity_type,
            entity_id,
        } => {
            let state = ctx
                .entities()
                .load(entity_type, &entity_id)?
                .ok_or_else(|| AuditError::entity_not_found(entity_type, &entity_id))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }

        EntityCommands::List { entity_type } => {
            let ids = ctx.entities().list_ids(entity_type)?;
            if ids.is_empty() {
                println!("No {} entities found.", entity_type);
            }
            for id in &ids {
                println!("{}", id);
            }
        }

        EntityCommands::Delete {
            entity_type,
            entity_id,
            force,
        } => {
            if !force {
                println!("This will delete {} {}.", entity_type, entity_id);
                println!("To proceed, run again with --force flag:");
                println!("  rollcall entity delete {} {} --force", entity_type, entity_id);
                return Ok(());
            }
            ctx.audited().delete(entity_type, &entity_id, actor)?;
            println!("Deleted {} {}", entity_type, entity_id);
        }
    }

    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
