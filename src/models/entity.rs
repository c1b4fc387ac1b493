//! Entity types, entity state payloads and field policies
//!
//! Entity payloads are JSON object maps keyed by field name. They are kept
//! ordered so that diffs, snapshots and log lines serialize deterministically.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AuditError, AuditResult};

/// Types of entities that can be audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Member,
    Event,
    User,
    Settings,
    Attendance,
}

impl EntityType {
    /// All known entity types
    pub const ALL: [EntityType; 5] = [
        EntityType::Member,
        EntityType::Event,
        EntityType::User,
        EntityType::Settings,
        EntityType::Attendance,
    ];

    /// Lowercase name used in paths and persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Member => "member",
            EntityType::Event => "event",
            EntityType::User => "user",
            EntityType::Settings => "settings",
            EntityType::Attendance => "attendance",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| AuditError::Validation(format!("Unknown entity type: {}", s)))
    }
}

/// Full state of an entity as a field map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityState(BTreeMap<String, Value>);

impl EntityState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from a JSON value, which must be an object
    pub fn from_value(value: Value) -> AuditResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(AuditError::Validation(format!(
                "Entity state must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Serialize any value into an entity state
    pub fn from_serializable<T: Serialize>(value: &T) -> AuditResult<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Convert to a JSON object value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect::<Map<String, Value>>())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the listed fields, returning the names that were dropped
    fn retain_fields(&mut self, allowed: &[String]) -> Vec<String> {
        let dropped: Vec<String> = self
            .0
            .keys()
            .filter(|k| !allowed.iter().any(|a| a == *k))
            .cloned()
            .collect();
        for key in &dropped {
            self.0.remove(key);
        }
        dropped
    }
}

impl FromIterator<(String, Value)> for EntityState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl TryFrom<Value> for EntityState {
    type Error = AuditError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Per-entity-type field allow-lists
///
/// Entity types without an allow-list are passed through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPolicy {
    #[serde(default)]
    pub allow_lists: BTreeMap<EntityType, Vec<String>>,
}

impl FieldPolicy {
    /// A policy with no restrictions
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Column lists of the attendance application's member, event and attendance tables
    pub fn attendance_defaults() -> Self {
        let mut allow_lists = BTreeMap::new();
        allow_lists.insert(
            EntityType::Member,
            to_strings(&[
                "member_id",
                "first_name",
                "middle_name",
                "last_name",
                "group_id",
                "metadata",
                "created_at",
                "deletion_requested_at",
                "deletion_reason",
                "can_be_permanently_deleted",
            ]),
        );
        allow_lists.insert(
            EntityType::Event,
            to_strings(&[
                "event_id",
                "event_type_id",
                "event_name",
                "event_date",
                "start_datetime",
                "end_datetime",
                "status",
                "is_custom",
                "description",
                "metadata",
                "created_at",
            ]),
        );
        allow_lists.insert(
            EntityType::Attendance,
            to_strings(&[
                "present_id",
                "scan_id",
                "member_id",
                "event_id",
                "scan_datetime",
                "created_at",
            ]),
        );
        Self { allow_lists }
    }

    /// Restrict an entity type to the given fields
    pub fn with_allow_list(mut self, entity_type: EntityType, fields: &[&str]) -> Self {
        self.allow_lists.insert(entity_type, to_strings(fields));
        self
    }

    pub fn allow_list(&self, entity_type: EntityType) -> Option<&[String]> {
        self.allow_lists.get(&entity_type).map(Vec::as_slice)
    }

    /// Strip fields that are not allowed for the entity type
    pub fn sanitize(&self, entity_type: EntityType, mut state: EntityState) -> EntityState {
        if let Some(allowed) = self.allow_list(entity_type) {
            let dropped = state.retain_fields(allowed);
            if !dropped.is_empty() {
                warn!(
                    entity_type = %entity_type,
                    fields = ?dropped,
                    "Dropped fields outside the allow-list"
                );
            }
        }
        state
    }
}

fn to_strings(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}
