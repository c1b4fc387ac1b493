//! Field-level diff computation for audit logging
//!
//! Produces the `change_diff` stored on every audit log record. The capture
//! rule depends on the action:
//!
//! - create: every field of `after`, with no prior value
//! - delete: every field of `before`, with no new value
//! - update / restore: only fields whose values differ structurally
//! - import: create rule when there is no prior state, update rule otherwise

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{AuditAction, EntityState};

/// Before/after pair for one field
///
/// `None` means "no value" (the field did not exist on that side). An
/// explicit JSON null is `Some(Value::Null)`; the two serialize differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub before: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub after: Option<Value>,
}

/// A present key always deserializes to `Some`, even when its value is null
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl FieldChange {
    pub fn new(before: Option<Value>, after: Option<Value>) -> Self {
        Self { before, after }
    }
}

/// Field name to before/after mapping for one change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeDiff(BTreeMap<String, FieldChange>);

impl ChangeDiff {
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.get(field)
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when no field had a prior value (a full initial-state capture)
    pub fn is_initial_capture(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(|c| c.before.is_none())
    }

    /// State made only of the `before` side of every field
    pub fn before_state(&self) -> EntityState {
        self.0
            .iter()
            .filter_map(|(k, c)| c.before.clone().map(|v| (k.clone(), v)))
            .collect()
    }

    /// State made only of the `after` side of every field
    pub fn after_state(&self) -> EntityState {
        self.0
            .iter()
            .filter_map(|(k, c)| c.after.clone().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Move a state forward across this change
    pub fn apply_forward(&self, state: &mut EntityState) {
        for (field, change) in &self.0 {
            match &change.after {
                Some(value) => {
                    state.insert(field.clone(), value.clone());
                }
                None => {
                    state.remove(field);
                }
            }
        }
    }

    /// Move a state backward across this change
    pub fn apply_backward(&self, state: &mut EntityState) {
        for (field, change) in &self.0 {
            match &change.before {
                Some(value) => {
                    state.insert(field.clone(), value.clone());
                }
                None => {
                    state.remove(field);
                }
            }
        }
    }

    /// One-line human-readable description of the change
    pub fn summary(&self) -> String {
        self.0
            .iter()
            .map(|(field, change)| match (&change.before, &change.after) {
                (Some(b), Some(a)) => format!("{}: {} -> {}", field, format_value(b), format_value(a)),
                (None, Some(a)) => format!("{}: (added) -> {}", field, format_value(a)),
                (Some(b), None) => format!("{}: {} -> (removed)", field, format_value(b)),
                (None, None) => format!("{}: (none)", field),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<(String, FieldChange)> for ChangeDiff {
    fn from_iter<I: IntoIterator<Item = (String, FieldChange)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Compute the change set between two entity states
///
/// Returns `None` when there is nothing to capture, which callers use as
/// the "nothing to log" signal. Missing states are treated as empty.
pub fn compute_diff(
    before: Option<&EntityState>,
    after: Option<&EntityState>,
    action: AuditAction,
) -> Option<ChangeDiff> {
    let diff = match action {
        AuditAction::Create => capture_after(after),
        AuditAction::Delete => capture_before(before),
        AuditAction::Import if before.is_none() => capture_after(after),
        AuditAction::Update | AuditAction::Restore | AuditAction::Import => {
            changed_fields(before, after)
        }
    };

    if diff.is_empty() {
        None
    } else {
        Some(diff)
    }
}

fn capture_after(after: Option<&EntityState>) -> ChangeDiff {
    after
        .map(|state| {
            state
                .iter()
                .map(|(k, v)| (k.clone(), FieldChange::new(None, Some(v.clone()))))
                .collect()
        })
        .unwrap_or_default()
}

fn capture_before(before: Option<&EntityState>) -> ChangeDiff {
    before
        .map(|state| {
            state
                .iter()
                .map(|(k, v)| (k.clone(), FieldChange::new(Some(v.clone()), None)))
                .collect()
        })
        .unwrap_or_default()
}

fn changed_fields(before: Option<&EntityState>, after: Option<&EntityState>) -> ChangeDiff {
    let empty = EntityState::new();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);

    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let b = before.get(key);
            let a = after.get(key);
            // serde_json::Value equality is structural for arrays and objects
            if b == a {
                None
            } else {
                Some((key.clone(), FieldChange::new(b.cloned(), a.cloned())))
            }
        })
        .collect()
}

/// Format a JSON value for human-readable display
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if s.chars().count() > 50 {
                let head: String = s.chars().take(47).collect();
                format!("\"{}...\"", head)
            } else {
                format!("\"{}\"", s)
            }
        }
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) => format!("{{{} fields}}", obj.len()),
    }
}
