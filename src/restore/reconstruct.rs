//! Rebuilding an entity state from its audit log
//!
//! Used for entities that have never been snapshotted. Version `n` refers
//! to the state right after the entity's `n`-th log record, counting from 1
//! at the oldest record still in the live log.
//!
//! Two anchors can produce a full state:
//!
//! - a create record at or before the target, replayed forward
//! - a delete record after the target, whose diff holds the full final
//!   state, unwound backward

use tracing::debug;

use crate::audit::AuditLogRecord;
use crate::error::{AuditError, AuditResult};
use crate::models::{AuditAction, EntityState};

/// Reconstruct the state at `target_version`
///
/// `window` holds the entity's newest records, oldest first, and `total` is
/// the number of records the entity has in the log overall.
pub fn reconstruct_from_log(
    window: &[AuditLogRecord],
    total: usize,
    target_version: u32,
) -> AuditResult<EntityState> {
    let target = target_version as usize;
    let first = total.saturating_sub(window.len()) + 1;

    let not_found = |why: &str| {
        let (entity_type, entity_id) = window
            .first()
            .map(|r| (r.entity_type.to_string(), r.entity_id.clone()))
            .unwrap_or_else(|| ("entity".to_string(), "?".to_string()));
        AuditError::NotFound {
            entity_type: format!("{} history", entity_type),
            identifier: format!("{}@v{} ({})", entity_id, target_version, why),
        }
    };

    if window.is_empty() || target == 0 || target > total {
        return Err(not_found("no such version"));
    }
    if target < first {
        return Err(not_found("outside the search window"));
    }

    // Position of the target record inside the window
    let target_idx = target - first;

    if window[target_idx].action == AuditAction::Delete {
        return Err(not_found("entity was deleted at this version"));
    }

    if let Some(anchor) = (0..=target_idx).rev().find(|&i| is_full_capture(&window[i])) {
        debug!(anchor = anchor + first, target, "Reconstructing forward from create");
        return Ok(replay_forward(&window[anchor..=target_idx]));
    }

    if let Some(anchor) = (target_idx + 1..window.len()).find(|&i| window[i].action == AuditAction::Delete) {
        debug!(anchor = anchor + first, target, "Reconstructing backward from delete");
        return Ok(unwind_backward(&window[anchor], &window[target_idx + 1..anchor]));
    }

    Err(not_found("no create or delete record to anchor on"))
}

/// Records whose diff holds the entity's complete initial state
fn is_full_capture(record: &AuditLogRecord) -> bool {
    match record.action {
        AuditAction::Create => true,
        AuditAction::Import => record
            .change_diff
            .as_ref()
            .is_some_and(|d| d.is_initial_capture()),
        _ => false,
    }
}

fn replay_forward(records: &[AuditLogRecord]) -> EntityState {
    let mut state = EntityState::new();
    for record in records {
        if record.action == AuditAction::Delete {
            state = EntityState::new();
            continue;
        }
        if let Some(diff) = &record.change_diff {
            diff.apply_forward(&mut state);
        }
    }
    state
}

fn unwind_backward(delete: &AuditLogRecord, between: &[AuditLogRecord]) -> EntityState {
    let mut state = delete
        .change_diff
        .as_ref()
        .map(|d| d.before_state())
        .unwrap_or_default();
    for record in between.iter().rev() {
        if let Some(diff) = &record.change_diff {
            diff.apply_backward(&mut state);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{compute_diff, AuditEntry};
    use crate::models::{ActorContext, EntityType};
    use chrono::Utc;
    use serde_json::json;

    fn state(value: serde_json::Value) -> EntityState {
        EntityState::from_value(value).unwrap()
    }

    fn rec(entry: AuditEntry) -> AuditLogRecord {
        let diff = compute_diff(entry.before.as_ref(), entry.after.as_ref(), entry.action);
        AuditLogRecord::from_entry(entry, diff, &ActorContext::system(), Utc::now())
    }

    /// create A, update B, update C, delete
    fn lifecycle() -> Vec<AuditLogRecord> {
        let t = EntityType::Member;
        vec![
            rec(AuditEntry::create(t, "m", state(json!({"name": "A", "group_id": 1})))),
            rec(AuditEntry::update(
                t,
                "m",
                state(json!({"name": "A", "group_id": 1})),
                state(json!({"name": "B", "group_id": 1})),
            )),
            rec(AuditEntry::update(
                t,
                "m",
                state(json!({"name": "B", "group_id": 1})),
                state(json!({"name": "C", "group_id": 2})),
            )),
            rec(AuditEntry::delete(t, "m", state(json!({"name": "C", "group_id": 2})))),
        ]
    }

    #[test]
    fn test_forward_from_create() {
        let log = lifecycle();
        assert_eq!(
            reconstruct_from_log(&log, 4, 1).unwrap(),
            state(json!({"name": "A", "group_id": 1}))
        );
        assert_eq!(
            reconstruct_from_log(&log, 4, 3).unwrap(),
            state(json!({"name": "C", "group_id": 2}))
        );
    }

    #[test]
    fn test_backward_from_delete_when_create_outside_window() {
        let log = lifecycle();
        // Only the newest three records are visible
        let window = &log[1..];
        assert_eq!(
            reconstruct_from_log(window, 4, 2).unwrap(),
            state(json!({"name": "B", "group_id": 1}))
        );
        assert_eq!(
            reconstruct_from_log(window, 4, 3).unwrap(),
            state(json!({"name": "C", "group_id": 2}))
        );
    }

    #[test]
    fn test_target_outside_window() {
        let log = lifecycle();
        let err = reconstruct_from_log(&log[2..], 4, 1).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("outside the search window"));
    }

    #[test]
    fn test_deleted_version_not_found() {
        let log = lifecycle();
        assert!(reconstruct_from_log(&log, 4, 4).unwrap_err().is_not_found());
        assert!(reconstruct_from_log(&log, 4, 5).unwrap_err().is_not_found());
        assert!(reconstruct_from_log(&log, 4, 0).unwrap_err().is_not_found());
    }

    #[test]
    fn test_no_anchor() {
        let log = lifecycle();
        // Updates only: neither a create before nor a delete after
        let err = reconstruct_from_log(&log[1..3], 3, 2).unwrap_err();
        assert!(err.to_string().contains("no create or delete"));
    }

    #[test]
    fn test_recreated_after_delete() {
        let t = EntityType::Event;
        let mut log = vec![
            rec(AuditEntry::create(t, "e", state(json!({"status": "draft"})))),
            rec(AuditEntry::delete(t, "e", state(json!({"status": "draft"})))),
            rec(AuditEntry::restore(t, "e", EntityState::new(), state(json!({"status": "draft"})))),
        ];
        log.push(rec(AuditEntry::update(
            t,
            "e",
            state(json!({"status": "draft"})),
            state(json!({"status": "live"})),
        )));

        assert_eq!(
            reconstruct_from_log(&log, 4, 4).unwrap(),
            state(json!({"status": "live"}))
        );
        assert_eq!(
            reconstruct_from_log(&log, 4, 3).unwrap(),
            state(json!({"status": "draft"}))
        );
    }
}
