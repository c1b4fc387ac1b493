//! Restore and compliance display formatting

use crate::compliance::{ActorSummary, PendingDeletion};
use crate::restore::{RestorePreview, VersionHistory};

use super::history::format_diff;
use super::{format_size, truncate};

/// Snapshot versions, newest first
pub fn format_version_table(history: &VersionHistory) -> String {
    let mut output = String::new();

    if history.snapshots.is_empty() {
        output.push_str("No snapshots found.\n");
    } else {
        output.push_str(&format!("{:>7}  {:19}  {}\n", "Version", "Created", "Fields"));
        output.push_str(&"-".repeat(60));
        output.push('\n');
        for snapshot in &history.snapshots {
            let fields = snapshot
                .snapshot_data
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            output.push_str(&format!(
                "{:>7}  {:19}  {}\n",
                format!("v{}", snapshot.version_number),
                snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
                truncate(&fields, 30)
            ));
        }
    }

    output.push_str(&format!(
        "\n{} version(s), {} audit record(s)\n",
        history.version_count,
        history.audit_logs.len()
    ));
    output
}

pub fn format_preview(preview: &RestorePreview) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Restore preview: {} {} -> v{} (from {})\n",
        preview.entity_type, preview.entity_id, preview.target_version, preview.source
    ));
    if preview.current_state.is_none() {
        output.push_str("Entity does not currently exist; restoring will recreate it.\n");
    }

    match &preview.diff {
        Some(diff) => {
            output.push_str(&format!("{} field(s) will change:\n", diff.len()));
            output.push_str(&format_diff(diff));
        }
        None => output.push_str("No changes: the entity already matches this version.\n"),
    }

    output
}

pub fn format_pending_deletions(pending: &[PendingDeletion]) -> String {
    if pending.is_empty() {
        return "No pending deletions.\n".to_string();
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:10}  {:20}  {:10}  {:>9}  {}\n",
        "Type", "Entity", "Deadline", "Days left", "Reason"
    ));
    output.push_str(&"-".repeat(70));
    output.push('\n');

    for p in pending {
        let days = if p.can_delete {
            "ready".to_string()
        } else {
            p.days_remaining.to_string()
        };
        output.push_str(&format!(
            "{:10}  {:20}  {:10}  {:>9}  {}\n",
            p.mark.entity_type.as_str(),
            truncate(&p.mark.entity_id, 20),
            p.mark.deadline.format("%Y-%m-%d"),
            days,
            p.mark.reason.as_deref().unwrap_or("")
        ));
    }
    output
}

pub fn format_actor_summary(summary: &ActorSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!("Actor:         {}\n", summary.actor_id));
    output.push_str(&format!("Records:       {}\n", summary.record_count));
    output.push_str(&format!(
        "Last activity: {}\n",
        summary
            .last_activity
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    ));
    output.push_str(&format!("Storage:       ~{}\n", format_size(summary.estimated_bytes)));
    output
}
