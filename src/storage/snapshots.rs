//! Versioned entity snapshots
//!
//! Every `(entity_type, entity_id)` pair has its own version sequence
//! starting at 1. Version numbers are assigned under a per-entity lock so
//! concurrent snapshots of the same entity never collide, and are never
//! reused: pruning, even down to zero versions, keeps the high-water mark.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuditError, AuditResult};
use crate::models::{EntityState, EntityType};

use super::file_io::{read_json, read_json_required, write_json_atomic};

/// A full-state capture of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub version_number: u32,
    pub snapshot_data: EntityState,
    pub created_at: DateTime<Utc>,
}

/// Store of versioned entity snapshots
pub trait SnapshotStore: Send + Sync + fmt::Debug {
    /// Capture `state` as the next version, returning its number
    fn create_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        state: &EntityState,
    ) -> AuditResult<u32>;

    /// A specific version, or `NotFound`
    fn get_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        version: u32,
    ) -> AuditResult<EntitySnapshot>;

    /// Highest version ever issued for the entity, pruned ones included.
    /// Zero if it was never snapshotted.
    fn latest_version(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<u32>;

    /// All versions of an entity, newest first
    fn list_versions(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> AuditResult<Vec<EntitySnapshot>>;

    /// Keep the newest `keep` versions and delete the rest, returning the
    /// removed version numbers
    fn prune(&self, entity_type: EntityType, entity_id: &str, keep: usize) -> AuditResult<Vec<u32>>;
}

type EntityKey = (EntityType, String);

/// Per-entity high-water mark, stored next to the version files
#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotHead {
    latest_version: u32,
}

fn lock_err<E: fmt::Display>(e: E) -> AuditError {
    AuditError::Storage(format!("Failed to acquire snapshot lock: {}", e))
}

/// Snapshot store writing one JSON file per version
///
/// Layout: `<root>/<entity_type>/<entity_id>/v000001.json`
pub struct FileSnapshotStore {
    root: PathBuf,
    entity_locks: Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
}

impl FileSnapshotStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    fn entity_dir(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<PathBuf> {
        validate_path_component(entity_id)?;
        Ok(self.root.join(entity_type.as_str()).join(entity_id))
    }

    fn version_file(dir: &Path, version: u32) -> PathBuf {
        dir.join(format!("v{:06}.json", version))
    }

    fn head_file(dir: &Path) -> PathBuf {
        dir.join("head.json")
    }

    /// Directories written before the head file existed fall back to the
    /// highest version on disk
    fn read_latest(dir: &Path) -> AuditResult<u32> {
        let head: SnapshotHead = read_json(Self::head_file(dir))?;
        let on_disk = Self::existing_versions(dir)?.last().copied().unwrap_or(0);
        Ok(head.latest_version.max(on_disk))
    }

    fn entity_lock(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<Arc<Mutex<()>>> {
        let mut locks = self.entity_locks.lock().map_err(lock_err)?;
        Ok(locks
            .entry((entity_type, entity_id.to_string()))
            .or_default()
            .clone())
    }

    /// Version numbers present on disk, ascending
    fn existing_versions(dir: &Path) -> AuditResult<Vec<u32>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(dir)
            .map_err(|e| AuditError::Io(format!("Failed to read snapshot directory: {}", e)))?
        {
            let entry =
                entry.map_err(|e| AuditError::Io(format!("Failed to read directory entry: {}", e)))?;
            if let Some(version) = parse_version_file_name(&entry.file_name().to_string_lossy()) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

impl fmt::Debug for FileSnapshotStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSnapshotStore")
            .field("root", &self.root)
            .finish()
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn create_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        state: &EntityState,
    ) -> AuditResult<u32> {
        let dir = self.entity_dir(entity_type, entity_id)?;
        let lock = self.entity_lock(entity_type, entity_id)?;
        let _guard = lock.lock().map_err(lock_err)?;

        let version = Self::read_latest(&dir)? + 1;

        let snapshot = EntitySnapshot {
            entity_type,
            entity_id: entity_id.to_string(),
            version_number: version,
            snapshot_data: state.clone(),
            created_at: Utc::now(),
        };
        write_json_atomic(Self::version_file(&dir, version), &snapshot)
            .map_err(|e| AuditError::Persistence(format!("Failed to write snapshot: {}", e)))?;
        write_json_atomic(Self::head_file(&dir), &SnapshotHead { latest_version: version })
            .map_err(|e| AuditError::Persistence(format!("Failed to write snapshot head: {}", e)))?;

        debug!(entity_type = %entity_type, entity_id, version, "Created snapshot");
        Ok(version)
    }

    fn get_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        version: u32,
    ) -> AuditResult<EntitySnapshot> {
        let path = Self::version_file(&self.entity_dir(entity_type, entity_id)?, version);
        if !path.exists() {
            return Err(AuditError::snapshot_not_found(entity_type, entity_id, version));
        }
        read_json_required(path)
    }

    fn latest_version(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<u32> {
        let dir = self.entity_dir(entity_type, entity_id)?;
        if !dir.exists() {
            return Ok(0);
        }
        Self::read_latest(&dir)
    }

    fn list_versions(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> AuditResult<Vec<EntitySnapshot>> {
        let dir = self.entity_dir(entity_type, entity_id)?;
        Self::existing_versions(&dir)?
            .into_iter()
            .rev()
            .map(|v| read_json_required(Self::version_file(&dir, v)))
            .collect()
    }

    fn prune(&self, entity_type: EntityType, entity_id: &str, keep: usize) -> AuditResult<Vec<u32>> {
        let dir = self.entity_dir(entity_type, entity_id)?;
        let lock = self.entity_lock(entity_type, entity_id)?;
        let _guard = lock.lock().map_err(lock_err)?;

        let mut removed = Vec::new();
        for version in Self::existing_versions(&dir)?.into_iter().rev().skip(keep) {
            fs::remove_file(Self::version_file(&dir, version))
                .map_err(|e| AuditError::Io(format!("Failed to delete old snapshot: {}", e)))?;
            removed.push(version);
        }
        removed.sort_unstable();

        if !removed.is_empty() {
            debug!(entity_type = %entity_type, entity_id, removed = removed.len(), "Pruned snapshots");
        }
        Ok(removed)
    }
}

/// Parse `v000012.json` into 12
fn parse_version_file_name(name: &str) -> Option<u32> {
    name.strip_prefix('v')?.strip_suffix(".json")?.parse().ok()
}

/// Entity ids become directory names, so they must not escape the root
fn validate_path_component(entity_id: &str) -> AuditResult<()> {
    if entity_id.is_empty()
        || entity_id == "."
        || entity_id.contains("..")
        || entity_id.contains('/')
        || entity_id.contains('\\')
    {
        return Err(AuditError::Validation(format!(
            "Entity id cannot be used as a snapshot key: {:?}",
            entity_id
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryVersions {
    latest: u32,
    versions: BTreeMap<u32, EntitySnapshot>,
}

/// In-memory snapshot store
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<EntityKey, MemoryVersions>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn create_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        state: &EntityState,
    ) -> AuditResult<u32> {
        let mut all = self.snapshots.lock().map_err(lock_err)?;
        let entry = all.entry((entity_type, entity_id.to_string())).or_default();
        let version = entry.latest + 1;
        entry.latest = version;
        entry.versions.insert(
            version,
            EntitySnapshot {
                entity_type,
                entity_id: entity_id.to_string(),
                version_number: version,
                snapshot_data: state.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(version)
    }

    fn get_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        version: u32,
    ) -> AuditResult<EntitySnapshot> {
        let all = self.snapshots.lock().map_err(lock_err)?;
        all.get(&(entity_type, entity_id.to_string()))
            .and_then(|entry| entry.versions.get(&version))
            .cloned()
            .ok_or_else(|| AuditError::snapshot_not_found(entity_type, entity_id, version))
    }

    fn latest_version(&self, entity_type: EntityType, entity_id: &str) -> AuditResult<u32> {
        let all = self.snapshots.lock().map_err(lock_err)?;
        Ok(all
            .get(&(entity_type, entity_id.to_string()))
            .map_or(0, |entry| entry.latest))
    }

    fn list_versions(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> AuditResult<Vec<EntitySnapshot>> {
        let all = self.snapshots.lock().map_err(lock_err)?;
        Ok(all
            .get(&(entity_type, entity_id.to_string()))
            .map(|entry| entry.versions.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    fn prune(&self, entity_type: EntityType, entity_id: &str, keep: usize) -> AuditResult<Vec<u32>> {
        let mut all = self.snapshots.lock().map_err(lock_err)?;
        let Some(entry) = all.get_mut(&(entity_type, entity_id.to_string())) else {
            return Ok(Vec::new());
        };

        let mut removed: Vec<u32> = entry.versions.keys().rev().skip(keep).copied().collect();
        removed.sort_unstable();
        for version in &removed {
            entry.versions.remove(version);
        }
        Ok(removed)
    }
}
