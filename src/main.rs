use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollcall::cli::{
    handle_entity_command, handle_gdpr_command, handle_history_command, handle_logs_command,
    handle_preview_command, handle_queue_command, handle_restore_command, handle_undo_command,
    handle_versions_command, ActorArgs,
};
use rollcall::config::{AuditConfig, RollcallPaths};
use rollcall::context::AuditContext;
use rollcall::error::AuditResult;

#[derive(Parser)]
#[command(
    name = "rollcall",
    version,
    about = "Audit trail and point-in-time recovery for member and event records",
    long_about = "rollcall records every change to tracked entities in an append-only \
                  audit log, keeps versioned snapshots of critical entities, and can \
                  preview, restore or undo any entity to an earlier version."
)]
struct Cli {
    #[command(flatten)]
    actor: ActorArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Audited entity writes
    #[command(subcommand)]
    Entity(rollcall::cli::EntityCommands),

    /// Audit history of one entity
    History(rollcall::cli::HistoryArgs),

    /// Search the whole audit log
    Logs(rollcall::cli::LogsArgs),

    /// Snapshot versions of an entity
    Versions(rollcall::cli::VersionsArgs),

    /// Show what restoring a version would change
    Preview(rollcall::cli::PreviewArgs),

    /// Restore an entity to an earlier version
    Restore(rollcall::cli::RestoreArgs),

    /// Revert an entity to its previous snapshot
    Undo(rollcall::cli::UndoArgs),

    /// GDPR anonymization, deletion and archival
    #[command(subcommand)]
    Gdpr(rollcall::cli::GdprCommands),

    /// Audit queue status
    #[command(subcommand)]
    Queue(rollcall::cli::QueueCommands),

    /// Show configuration and paths
    Config {
        /// Write the current configuration to disk
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollcall=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let paths = RollcallPaths::new()?;
    let config = AuditConfig::load_or_create(&paths)?;

    let Some(command) = cli.command else {
        println!("rollcall - audit trail and point-in-time recovery");
        println!();
        println!("Run 'rollcall --help' for usage information.");
        return Ok(());
    };

    if let Commands::Config { save } = command {
        return show_config(&paths, &config, save);
    }

    let ctx = AuditContext::open(paths, config)?;
    let result = run(&ctx, &cli.actor, command).await;

    // Flush even when the command failed so no queued record is lost
    let flushed = ctx.shutdown().await;
    result?;
    flushed?;
    Ok(())
}

async fn run(ctx: &AuditContext, actor: &ActorArgs, command: Commands) -> AuditResult<()> {
    let actor = actor.to_actor();

    match command {
        Commands::Entity(cmd) => handle_entity_command(ctx, &actor, cmd),
        Commands::History(args) => handle_history_command(ctx, args),
        Commands::Logs(args) => handle_logs_command(ctx, args),
        Commands::Versions(args) => handle_versions_command(ctx, &actor, args).await,
        Commands::Preview(args) => handle_preview_command(ctx, &actor, args).await,
        Commands::Restore(args) => handle_restore_command(ctx, &actor, args).await,
        Commands::Undo(args) => handle_undo_command(ctx, &actor, args).await,
        Commands::Gdpr(cmd) => handle_gdpr_command(ctx, cmd).await,
        Commands::Queue(cmd) => handle_queue_command(ctx, cmd),
        Commands::Config { .. } => Ok(()),
    }
}

fn show_config(paths: &RollcallPaths, config: &AuditConfig, save: bool) -> Result<()> {
    if save {
        config.save(paths)?;
        println!("Configuration saved to {}", paths.config_file().display());
        println!();
    }

    println!("rollcall Configuration");
    println!("======================");
    println!("Base directory:     {}", paths.base_dir().display());
    println!("Config file:        {}", paths.config_file().display());
    println!("Audit log:          {}", paths.audit_log().display());
    println!("Snapshot directory: {}", paths.snapshot_dir().display());
    println!("Data directory:     {}", paths.data_dir().display());
    println!();
    println!("Settings:");
    println!("  Audit trail enabled: {}", config.enabled);
    println!(
        "  Batching:            {} (size {}, interval {} ms)",
        if config.batching.enabled { "on" } else { "off" },
        config.batching.batch_size,
        config.batching.batch_interval_ms
    );
    println!(
        "  Critical entities:   {}",
        config
            .snapshots
            .critical_entities
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Restore window:      {} records", config.restore.search_window);
    println!("  GDPR features:       {}", if config.retention.gdpr_enabled { "on" } else { "off" });
    println!("  Retention:           {} days", config.retention.retention_days);
    println!("  Deletion grace:      {} days", config.retention.deletion_grace_days);
    Ok(())
}
