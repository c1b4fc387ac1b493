//! CLI command handlers
//!
//! Bridges clap argument parsing with `AuditContext`.

pub mod entity;
pub mod gdpr;
pub mod history;
pub mod restore;

use clap::{Args, Subcommand};

use crate::context::AuditContext;
use crate::display::format_queue_stats;
use crate::error::AuditResult;
use crate::models::ActorContext;

pub use entity::{handle_entity_command, EntityCommands};
pub use gdpr::{handle_gdpr_command, GdprCommands};
pub use history::{handle_history_command, handle_logs_command, HistoryArgs, LogsArgs};
pub use restore::{
    handle_preview_command, handle_restore_command, handle_undo_command, handle_versions_command,
    PreviewArgs, RestoreArgs, UndoArgs, VersionsArgs,
};

/// Who the command runs as
#[derive(Args, Debug, Clone)]
pub struct ActorArgs {
    /// Acting user id
    #[arg(long, global = true, env = "ROLLCALL_ACTOR_ID")]
    pub actor_id: Option<String>,
    /// Acting user email
    #[arg(long, global = true, env = "ROLLCALL_ACTOR_EMAIL")]
    pub actor_email: Option<String>,
    /// Acting user role; restore, preview and versions need admin or developer
    #[arg(long = "role", global = true, env = "ROLLCALL_ACTOR_ROLE", default_value = "user")]
    pub actor_role: String,
}

impl ActorArgs {
    pub fn to_actor(&self) -> ActorContext {
        ActorContext {
            actor_id: self.actor_id.clone(),
            actor_email: self.actor_email.clone(),
            actor_role: self.actor_role.clone(),
            ip_address: None,
            user_agent: None,
        }
    }
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show buffer and delivery counters
    Stats,
}

pub fn handle_queue_command(ctx: &AuditContext, cmd: QueueCommands) -> AuditResult<()> {
    match cmd {
        QueueCommands::Stats => {
            let stats = ctx.queue().stats()?;
            print!("{}", format_queue_stats(&stats));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_args() {
        let args = ActorArgs {
            actor_id: Some("u-1".into()),
            actor_email: None,
            actor_role: "developer".into(),
        };
        let actor = args.to_actor();
        assert!(!actor.is_system());
        assert_eq!(actor.actor_role, "developer");
    }

    #[test]
    fn test_role_defaults_to_unprivileged() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            actor: ActorArgs,
        }

        let parsed = TestCli::try_parse_from(["rollcall"]).unwrap();
        assert_eq!(parsed.actor.actor_role, "user");
    }
}
