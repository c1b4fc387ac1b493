//! Soft-deletion marks
//!
//! An entity marked for deletion stays live until its grace deadline has
//! passed and someone purges it. Marks are kept in `deletions.json`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};
use crate::models::EntityType;

use super::file_io::{read_json, write_json_atomic};

/// A pending deletion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionMark {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub requested_at: DateTime<Utc>,
    pub reason: Option<String>,
    /// Earliest time the entity may be permanently deleted
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DeletionData {
    marks: Vec<DeletionMark>,
}

/// Registry of deletion marks, optionally persisted
#[derive(Debug)]
pub struct DeletionRegistry {
    path: Option<PathBuf>,
    marks: RwLock<BTreeMap<String, DeletionMark>>,
}

impl DeletionRegistry {
    /// Load the registry from disk
    pub fn open(path: PathBuf) -> AuditResult<Self> {
        let data: DeletionData = read_json(&path)?;
        Ok(Self {
            path: Some(path),
            marks: RwLock::new(
                data.marks
                    .into_iter()
                    .map(|m| (m.entity_id.clone(), m))
                    .collect(),
            ),
        })
    }

    /// A registry that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            marks: RwLock::new(BTreeMap::new()),
        }
    }

    fn save(&self, marks: &BTreeMap<String, DeletionMark>) -> AuditResult<()> {
        if let Some(path) = &self.path {
            let data = DeletionData {
                marks: marks.values().cloned().collect(),
            };
            write_json_atomic(path, &data)?;
        }
        Ok(())
    }

    /// Record a mark, replacing any earlier mark for the same entity
    pub fn insert(&self, mark: DeletionMark) -> AuditResult<()> {
        let mut marks = self.marks.write().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire write lock: {}", e))
        })?;
        marks.insert(mark.entity_id.clone(), mark);
        self.save(&marks)
    }

    /// Remove and return the mark for an entity
    pub fn remove(&self, entity_id: &str) -> AuditResult<Option<DeletionMark>> {
        let mut marks = self.marks.write().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire write lock: {}", e))
        })?;
        let removed = marks.remove(entity_id);
        if removed.is_some() {
            self.save(&marks)?;
        }
        Ok(removed)
    }

    pub fn get(&self, entity_id: &str) -> AuditResult<Option<DeletionMark>> {
        let marks = self.marks.read().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire read lock: {}", e))
        })?;
        Ok(marks.get(entity_id).cloned())
    }

    /// All marks, earliest deadline first
    pub fn all(&self) -> AuditResult<Vec<DeletionMark>> {
        let marks = self.marks.read().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire read lock: {}", e))
        })?;
        let mut all: Vec<_> = marks.values().cloned().collect();
        all.sort_by(|a, b| a.deadline.cmp(&b.deadline));
        Ok(all)
    }
}
