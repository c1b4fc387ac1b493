//! Audit log display formatting

use crate::audit::{AuditLogRecord, ChangeDiff, QueueStats};

use super::truncate;

/// Format a single record as a table row
pub fn format_record_row(record: &AuditLogRecord) -> String {
    let changes = record
        .change_diff
        .as_ref()
        .map(|d| d.fields().cloned().collect::<Vec<_>>().join(","))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{:19}  {:8}  {:10}  {:16}  {:24}  {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.action.as_str(),
        record.entity_type.as_str(),
        truncate(&record.entity_id, 16),
        truncate(&record.actor_label(), 24),
        truncate(&changes, 40)
    )
}

/// Format records as a table, in the order given
pub fn format_history_table(records: &[AuditLogRecord]) -> String {
    if records.is_empty() {
        return "No audit records found.\n".to_string();
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:19}  {:8}  {:10}  {:16}  {:24}  {}\n",
        "Timestamp", "Action", "Type", "Entity", "Actor", "Fields"
    ));
    output.push_str(&"-".repeat(100));
    output.push('\n');

    for record in records {
        output.push_str(&format_record_row(record));
        output.push('\n');
    }

    output.push_str(&format!("\n{} record(s)\n", records.len()));
    output
}

/// Full details of one record
pub fn format_record_details(record: &AuditLogRecord) -> String {
    let mut output = String::new();

    output.push_str(&format!("Record:    {}\n", record.id));
    output.push_str(&format!(
        "Time:      {}\n",
        record.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!("Action:    {}\n", record.action));
    output.push_str(&format!("Entity:    {} {}\n", record.entity_type, record.entity_id));
    output.push_str(&format!("Actor:     {} ({})\n", record.actor_label(), record.actor_role));

    if let Some(ip) = &record.ip_address {
        output.push_str(&format!("IP:        {}\n", ip));
    }
    if let Some(reason) = &record.reason {
        output.push_str(&format!("Reason:    {}\n", reason));
    }
    if !record.tags.is_empty() {
        output.push_str(&format!("Tags:      {}\n", record.tags.join(", ")));
    }

    match &record.change_diff {
        Some(diff) => {
            output.push_str("Changes:\n");
            output.push_str(&format_diff(diff));
        }
        None => output.push_str("Changes:   (none)\n"),
    }

    output
}

/// One line per changed field
pub fn format_diff(diff: &ChangeDiff) -> String {
    let width = diff.fields().map(|f| f.len()).max().unwrap_or(0);
    let show = |v: &Option<serde_json::Value>| match v {
        Some(value) => crate::audit::format_value(value),
        None => "(absent)".to_string(),
    };

    let mut output = String::new();
    for (field, change) in diff.iter() {
        output.push_str(&format!(
            "  {:width$}  {} -> {}\n",
            field,
            show(&change.before),
            show(&change.after),
            width = width
        ));
    }
    output
}

pub fn format_queue_stats(stats: &QueueStats) -> String {
    let mut output = String::new();
    output.push_str("Audit Queue\n");
    output.push_str("===========\n");
    output.push_str(&format!(
        "Mode:          {}\n",
        if stats.batching_enabled { "batched" } else { "realtime" }
    ));
    output.push_str(&format!(
        "Buffered:      {} / {}{}\n",
        stats.queue_size,
        stats.batch_size,
        if stats.is_full { " (full)" } else { "" }
    ));
    output.push_str(&format!("Interval:      {} ms\n", stats.batch_interval_ms));
    output.push_str(&format!("Timer pending: {}\n", if stats.timer_pending { "yes" } else { "no" }));
    output.push_str(&format!("Written:       {}\n", stats.records_written));
    output.push_str(&format!("Flushes:       {}\n", stats.flushes));
    output.push_str(&format!("Dead letters:  {}\n", stats.dead_letters));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{compute_diff, AuditEntry};
    use crate::models::{ActorContext, EntityState, EntityType};
    use chrono::Utc;
    use serde_json::json;

    fn record() -> AuditLogRecord {
        let entry = AuditEntry::update(
            EntityType::Member,
            "member-42",
            EntityState::from_value(json!({"name": "A", "age": 3})).unwrap(),
            EntityState::from_value(json!({"name": "B", "age": 3})).unwrap(),
        )
        .with_reason("typo");
        let diff = compute_diff(entry.before.as_ref(), entry.after.as_ref(), entry.action);
        AuditLogRecord::from_entry(
            entry,
            diff,
            &ActorContext::new("u-1", "ops@example.com", "admin"),
            Utc::now(),
        )
    }

    #[test]
    fn test_history_table() {
        let output = format_history_table(&[record()]);
        assert!(output.contains("Timestamp"));
        assert!(output.contains("member-42"));
        assert!(output.contains("ops@example.com"));
        assert!(output.contains("1 record(s)"));
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(format_history_table(&[]), "No audit records found.\n");
    }

    #[test]
    fn test_record_details() {
        let output = format_record_details(&record());
        assert!(output.contains("Reason:    typo"));
        assert!(output.contains("\"A\" -> \"B\""));
        assert!(!output.contains("age"));
    }
}
