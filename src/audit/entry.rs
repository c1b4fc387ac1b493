//! Audit entry data structures
//!
//! `AuditEntry` is what a mutation hands to the logger. `AuditLogRecord` is
//! what ends up in the log store once the entry has been diffed, stamped
//! and attributed to an actor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuditError, AuditResult};
use crate::models::{ActorContext, AuditAction, EntityState, EntityType};

use super::diff::ChangeDiff;

/// A caller-supplied description of a change, before persistence
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub before: Option<EntityState>,
    pub after: Option<EntityState>,
    pub reason: Option<String>,
    pub tags: Vec<String>,
}

impl AuditEntry {
    fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        action: AuditAction,
        before: Option<EntityState>,
        after: Option<EntityState>,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            action,
            before,
            after,
            reason: None,
            tags: Vec::new(),
        }
    }

    /// Entry for a newly created entity
    pub fn create(entity_type: EntityType, entity_id: impl Into<String>, after: EntityState) -> Self {
        Self::new(entity_type, entity_id, AuditAction::Create, None, Some(after))
    }

    pub fn update(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        before: EntityState,
        after: EntityState,
    ) -> Self {
        Self::new(entity_type, entity_id, AuditAction::Update, Some(before), Some(after))
    }

    /// Entry for a removed entity; the final state is captured in full
    pub fn delete(entity_type: EntityType, entity_id: impl Into<String>, before: EntityState) -> Self {
        Self::new(entity_type, entity_id, AuditAction::Delete, Some(before), None)
    }

    /// Entry for a bulk import; `before` is the state being overwritten, if any
    pub fn import(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        before: Option<EntityState>,
        after: EntityState,
    ) -> Self {
        Self::new(entity_type, entity_id, AuditAction::Import, before, Some(after))
    }

    pub fn restore(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        before: EntityState,
        after: EntityState,
    ) -> Self {
        Self::new(entity_type, entity_id, AuditAction::Restore, Some(before), Some(after))
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Reject entries that cannot be attributed to an entity or that lack
    /// the state their action requires
    pub fn validate(&self) -> AuditResult<()> {
        if self.entity_id.trim().is_empty() {
            return Err(AuditError::Validation(
                "Audit entry is missing an entity id".into(),
            ));
        }

        let shape_ok = match self.action {
            AuditAction::Create | AuditAction::Import => self.after.is_some(),
            AuditAction::Delete => self.before.is_some(),
            AuditAction::Update | AuditAction::Restore => {
                self.before.is_some() || self.after.is_some()
            }
        };
        if !shape_ok {
            return Err(AuditError::Validation(format!(
                "{} entry for {} {} has no state to record",
                self.action, self.entity_type, self.entity_id
            )));
        }

        Ok(())
    }
}

/// The persisted, append-only representation of a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogRecord {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: AuditAction,
    /// `None` only when the change had no capturable fields
    pub change_diff: Option<ChangeDiff>,
    pub actor_id: Option<String>,
    pub actor_email: Option<String>,
    pub actor_role: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_anonymized: bool,
}

impl AuditLogRecord {
    /// Build a record stamped with the given time
    pub fn from_entry(
        entry: AuditEntry,
        change_diff: Option<ChangeDiff>,
        actor: &ActorContext,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            action: entry.action,
            change_diff,
            actor_id: actor.actor_id.clone(),
            actor_email: actor.actor_email.clone(),
            actor_role: actor.actor_role.clone(),
            timestamp,
            ip_address: actor.ip_address.clone(),
            user_agent: actor.user_agent.clone(),
            reason: entry.reason,
            tags: entry.tags,
            is_anonymized: false,
        }
    }

    /// Strip actor-identifying fields. Returns false if already anonymized.
    pub fn anonymize(&mut self) -> bool {
        if self.is_anonymized {
            return false;
        }
        self.actor_id = None;
        self.actor_email = None;
        self.ip_address = None;
        self.is_anonymized = true;
        true
    }

    pub fn has_tag(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.tags.iter().any(|t| t.to_lowercase().contains(&needle))
    }

    /// Format the record for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {} {} by {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.action.as_str().to_uppercase(),
            self.entity_type,
            self.entity_id,
            self.actor_label()
        );

        if let Some(reason) = &self.reason {
            output.push_str(&format!(" ({})", reason));
        }

        if let Some(diff) = &self.change_diff {
            output.push_str(&format!("\n  Changes: {}", diff.summary()));
        }

        output
    }

    /// Who made the change, as shown to operators
    pub fn actor_label(&self) -> String {
        if self.is_anonymized {
            return "[anonymized]".to_string();
        }
        self.actor_email
            .clone()
            .or_else(|| self.actor_id.clone())
            .unwrap_or_else(|| self.actor_role.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::compute_diff;
    use serde_json::json;

    fn state(value: serde_json::Value) -> EntityState {
        EntityState::from_value(value).unwrap()
    }

    fn record_for(entry: AuditEntry) -> AuditLogRecord {
        let diff = compute_diff(entry.before.as_ref(), entry.after.as_ref(), entry.action);
        let actor = ActorContext::new("u-1", "ops@example.com", "admin")
            .with_request(Some("192.168.1.4".into()), None);
        AuditLogRecord::from_entry(entry, diff, &actor, Utc::now())
    }

    #[test]
    fn test_create_entry() {
        let entry = AuditEntry::create(EntityType::Member, "member-42", state(json!({"name": "A"})));
        assert_eq!(entry.action, AuditAction::Create);
        assert!(entry.before.is_none());
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_id() {
        let entry = AuditEntry::create(EntityType::Member, "  ", EntityState::new());
        assert!(entry.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_validate_rejects_missing_state() {
        let mut entry = AuditEntry::delete(EntityType::Event, "17", EntityState::new());
        entry.before = None;
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_reason_and_tags() {
        let entry = AuditEntry::restore(EntityType::Member, "m", EntityState::new(), EntityState::new())
            .with_reason("Restored to version 2 from audit trail")
            .with_tags(["restore", "v2"]);
        assert_eq!(entry.tags, vec!["restore", "v2"]);
        assert!(entry.reason.unwrap().contains("version 2"));
    }

    #[test]
    fn test_record_carries_actor() {
        let record = record_for(AuditEntry::create(EntityType::Member, "m", state(json!({"a": 1}))));
        assert_eq!(record.actor_id.as_deref(), Some("u-1"));
        assert_eq!(record.ip_address.as_deref(), Some("192.168.1.4"));
        assert!(!record.is_anonymized);
    }

    #[test]
    fn test_anonymize_is_one_way() {
        let mut record = record_for(AuditEntry::update(
            EntityType::Member,
            "m",
            state(json!({"a": 1})),
            state(json!({"a": 2})),
        ));
        let diff = record.change_diff.clone();

        assert!(record.anonymize());
        assert!(record.actor_id.is_none());
        assert!(record.actor_email.is_none());
        assert!(record.ip_address.is_none());
        assert_eq!(record.action, AuditAction::Update);
        assert_eq!(record.change_diff, diff);

        assert!(!record.anonymize());
        assert!(record.is_anonymized);
    }

    #[test]
    fn test_serialization_uses_snake_case_fields() {
        let record = record_for(AuditEntry::create(EntityType::Event, "e-1", state(json!({"x": 1}))));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["entity_type"], "event");
        assert_eq!(json["action"], "create");
        assert_eq!(json["change_diff"], json!({"x": {"after": 1}}));
        assert_eq!(json["is_anonymized"], false);

        let back: AuditLogRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_tag_match_is_case_insensitive_substring() {
        let entry = AuditEntry::create(EntityType::Member, "m", state(json!({"a": 1})))
            .with_tags(["Restore", "v12"]);
        let record = record_for(entry);
        assert!(record.has_tag("rest"));
        assert!(record.has_tag("V1"));
        assert!(!record.has_tag("import"));
    }

    #[test]
    fn test_human_readable_format() {
        let record = record_for(AuditEntry::create(EntityType::Member, "member-42", state(json!({"name": "A"}))));
        let formatted = record.format_human_readable();
        assert!(formatted.contains("CREATE member member-42"));
        assert!(formatted.contains("ops@example.com"));
        assert!(formatted.contains("name: (added) -> \"A\""));
    }
}
