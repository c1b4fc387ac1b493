//! Query filters for the audit log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AuditAction, EntityType};

use super::entry::AuditLogRecord;

/// Result ordering by timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Filter over audit log records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub actor_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub tag: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of one entity
    pub fn for_entity(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self::new().entity_type(entity_type).entity_id(entity_id)
    }

    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Inclusive lower bound
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Exclusive upper bound
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn matches(&self, record: &AuditLogRecord) -> bool {
        if self.entity_type.is_some_and(|t| t != record.entity_type) {
            return false;
        }
        if self.entity_id.as_deref().is_some_and(|id| id != record.entity_id) {
            return false;
        }
        if self.action.is_some_and(|a| a != record.action) {
            return false;
        }
        if let Some(actor) = &self.actor_id {
            if record.actor_id.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }
        if self.since.is_some_and(|since| record.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.timestamp >= until) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !record.has_tag(tag) {
                return false;
            }
        }
        true
    }

    /// Filter, order and truncate a slice of records held in insertion order
    ///
    /// Records with equal timestamps keep their insertion order for
    /// oldest-first, and reverse insertion order for newest-first.
    pub fn apply<'a, I>(&self, records: I, limit: Option<usize>) -> Vec<AuditLogRecord>
    where
        I: DoubleEndedIterator<Item = &'a AuditLogRecord>,
    {
        let mut matched: Vec<AuditLogRecord> = match self.order {
            SortOrder::OldestFirst => records.filter(|r| self.matches(r)).cloned().collect(),
            SortOrder::NewestFirst => records.rev().filter(|r| self.matches(r)).cloned().collect(),
        };

        match self.order {
            SortOrder::OldestFirst => matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
            SortOrder::NewestFirst => matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        }

        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEntry;
    use crate::models::{ActorContext, EntityState};
    use chrono::Duration;
    use serde_json::json;

    fn record(
        entity_type: EntityType,
        id: &str,
        action: AuditAction,
        actor: &str,
        at: DateTime<Utc>,
    ) -> AuditLogRecord {
        let state = EntityState::from_value(json!({"name": id})).unwrap();
        let entry = match action {
            AuditAction::Delete => AuditEntry::delete(entity_type, id, state),
            _ => AuditEntry::create(entity_type, id, state),
        };
        let mut entry = entry;
        entry.action = action;
        AuditLogRecord::from_entry(entry, None, &ActorContext::new(actor, "x@example.com", "admin"), at)
    }

    fn sample() -> (Vec<AuditLogRecord>, DateTime<Utc>) {
        let t0 = Utc::now();
        let records = vec![
            record(EntityType::Member, "m-1", AuditAction::Create, "u-1", t0),
            record(EntityType::Member, "m-1", AuditAction::Update, "u-2", t0 + Duration::seconds(1)),
            record(EntityType::Event, "e-1", AuditAction::Create, "u-1", t0 + Duration::seconds(2)),
            record(EntityType::Member, "m-2", AuditAction::Delete, "u-1", t0 + Duration::seconds(3)),
        ];
        (records, t0)
    }

    #[test]
    fn test_default_is_newest_first() {
        let (records, _) = sample();
        let out = AuditFilter::new().apply(records.iter(), None);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].entity_id, "m-2");
        assert_eq!(out[3].action, AuditAction::Create);
    }

    #[test]
    fn test_entity_filter_with_limit() {
        let (records, _) = sample();
        let out = AuditFilter::for_entity(EntityType::Member, "m-1").apply(records.iter(), Some(1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, AuditAction::Update);
    }

    #[test]
    fn test_actor_and_action_filters() {
        let (records, _) = sample();
        let out = AuditFilter::new()
            .actor_id("u-1")
            .action(AuditAction::Create)
            .order(SortOrder::OldestFirst)
            .apply(records.iter(), None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].entity_id, "m-1");
        assert_eq!(out[1].entity_id, "e-1");
    }

    #[test]
    fn test_time_range_is_half_open() {
        let (records, t0) = sample();
        let out = AuditFilter::new()
            .since(t0 + Duration::seconds(1))
            .until(t0 + Duration::seconds(3))
            .apply(records.iter(), None);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let t0 = Utc::now();
        let records: Vec<_> = (0..3)
            .map(|i| record(EntityType::Member, &format!("m-{}", i), AuditAction::Create, "u", t0))
            .collect();

        let newest = AuditFilter::new().apply(records.iter(), None);
        assert_eq!(newest[0].entity_id, "m-2");

        let oldest = AuditFilter::new().order(SortOrder::OldestFirst).apply(records.iter(), None);
        assert_eq!(oldest[0].entity_id, "m-0");
    }
}
