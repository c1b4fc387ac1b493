//! Live entity storage
//!
//! The audit engine does not own entity data; it reads and overwrites it
//! through this seam. `JsonEntityStore` keeps one JSON file per entity type
//! under the data directory.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};
use crate::models::{EntityState, EntityType};

use super::file_io::{read_json, write_json_atomic};

/// Access to the live state of entities
pub trait EntityStore: Send + Sync + fmt::Debug {
    /// Current state, or `None` if the entity does not exist
    fn load(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<Option<EntityState>>;

    /// Overwrite the entity with `state`, creating it if needed
    fn replace(&self, entity_type: EntityType, entity_id: &str, state: &EntityState) -> AuditResult<()>;

    /// Delete the entity, returning its last state
    fn remove(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<Option<EntityState>>;

    /// Ids of every entity of a type, sorted
    fn list_ids(&self, entity_type: EntityType) -> AuditResult<Vec<String>>;
}

/// Serializable entity table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EntityTable {
    entities: BTreeMap<String, EntityState>,
}

fn read_lock_err<E: fmt::Display>(e: E) -> AuditError {
    AuditError::Storage(format!("Failed to acquire read lock: {}", e))
}

fn write_lock_err<E: fmt::Display>(e: E) -> AuditError {
    AuditError::Storage(format!("Failed to acquire write lock: {}", e))
}

/// Entity store backed by `data/<entity_type>.json`
///
/// Tables are loaded on first use and written through on every change.
pub struct JsonEntityStore {
    data_dir: PathBuf,
    tables: RwLock<HashMap<EntityType, EntityTable>>,
}

impl JsonEntityStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn table_path(&self, entity_type: EntityType) -> PathBuf {
        self.data_dir.join(format!("{}.json", entity_type))
    }

    fn ensure_loaded(&self, entity_type: EntityType) -> AuditResult<()> {
        {
            let tables = self.tables.read().map_err(read_lock_err)?;
            if tables.contains_key(&entity_type) {
                return Ok(());
            }
        }

        let table: EntityTable = read_json(self.table_path(entity_type))?;
        let mut tables = self.tables.write().map_err(write_lock_err)?;
        tables.entry(entity_type).or_insert(table);
        Ok(())
    }

    fn with_table_mut<T>(
        &self,
        entity_type: EntityType,
        f: impl FnOnce(&mut EntityTable) -> T,
    ) -> AuditResult<T> {
        self.ensure_loaded(entity_type)?;
        let mut tables = self.tables.write().map_err(write_lock_err)?;
        let table = tables.entry(entity_type).or_default();
        let out = f(table);
        write_json_atomic(self.table_path(entity_type), table)
            .map_err(|e| AuditError::Persistence(format!("Failed to save {} data: {}", entity_type, e)))?;
        Ok(out)
    }
}

impl fmt::Debug for JsonEntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonEntityStore")
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl EntityStore for JsonEntityStore {
    fn load(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<Option<EntityState>> {
        self.ensure_loaded(entity_type)?;
        let tables = self.tables.read().map_err(read_lock_err)?;
        Ok(tables
            .get(&entity_type)
            .and_then(|t| t.entities.get(entity_id))
            .cloned())
    }

    fn replace(&self, entity_type: EntityType, entity_id: &str, state: &EntityState) -> AuditResult<()> {
        self.with_table_mut(entity_type, |table| {
            table.entities.insert(entity_id.to_string(), state.clone());
        })
    }

    fn remove(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<Option<EntityState>> {
        self.with_table_mut(entity_type, |table| table.entities.remove(entity_id))
    }

    fn list_ids(&self, entity_type: EntityType) -> AuditResult<Vec<String>> {
        self.ensure_loaded(entity_type)?;
        let tables = self.tables.read().map_err(read_lock_err)?;
        Ok(tables
            .get(&entity_type)
            .map(|t| t.entities.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory entity store
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    data: RwLock<HashMap<(EntityType, String), EntityState>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryEntityStore {
    fn load(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<Option<EntityState>> {
        let data = self.data.read().map_err(read_lock_err)?;
        Ok(data.get(&(entity_type, entity_id.to_string())).cloned())
    }

    fn replace(&self, entity_type: EntityType, entity_id: &str, state: &EntityState) -> AuditResult<()> {
        let mut data = self.data.write().map_err(write_lock_err)?;
        data.insert((entity_type, entity_id.to_string()), state.clone());
        Ok(())
    }

    fn remove(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<Option<EntityState>> {
        let mut data = self.data.write().map_err(write_lock_err)?;
        Ok(data.remove(&(entity_type, entity_id.to_string())))
    }

    fn list_ids(&self, entity_type: EntityType) -> AuditResult<Vec<String>> {
        let data = self.data.read().map_err(read_lock_err)?;
        let mut ids: Vec<String> = data
            .keys()
            .filter(|(t, _)| *t == entity_type)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn state(value: serde_json::Value) -> EntityState {
        EntityState::from_value(value).unwrap()
    }

    #[test]
    fn test_json_store_crud() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonEntityStore::new(temp_dir.path().join("data"));

        assert!(store.load(EntityType::Member, "m-1").unwrap().is_none());

        store.replace(EntityType::Member, "m-1", &state(json!({"name": "A"}))).unwrap();
        store.replace(EntityType::Member, "m-2", &state(json!({"name": "Z"}))).unwrap();
        assert_eq!(store.list_ids(EntityType::Member).unwrap(), vec!["m-1", "m-2"]);
        assert!(temp_dir.path().join("data").join("member.json").exists());

        // Full overwrite drops fields missing from the new state
        store.replace(EntityType::Member, "m-1", &state(json!({"first_name": "B"}))).unwrap();
        let loaded = store.load(EntityType::Member, "m-1").unwrap().unwrap();
        assert_eq!(loaded, state(json!({"first_name": "B"})));

        let removed = store.remove(EntityType::Member, "m-1").unwrap();
        assert!(removed.is_some());
        assert!(store.remove(EntityType::Member, "m-1").unwrap().is_none());
    }

    #[test]
    fn test_json_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");

        JsonEntityStore::new(data_dir.clone())
            .replace(EntityType::Event, "17", &state(json!({"event_name": "Sunday"})))
            .unwrap();

        let reopened = JsonEntityStore::new(data_dir);
        let event = reopened.load(EntityType::Event, "17").unwrap().unwrap();
        assert_eq!(event.get("event_name"), Some(&json!("Sunday")));
    }

    #[test]
    fn test_memory_store_types_are_separate() {
        let store = MemoryEntityStore::new();
        store.replace(EntityType::Member, "1", &state(json!({"a": 1}))).unwrap();
        store.replace(EntityType::Event, "1", &state(json!({"b": 2}))).unwrap();

        assert_eq!(store.list_ids(EntityType::Member).unwrap(), vec!["1"]);
        assert_eq!(
            store.load(EntityType::Event, "1").unwrap().unwrap().get("b"),
            Some(&json!(2))
        );
    }
}
