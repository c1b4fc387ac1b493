//! Point-in-time restore
//!
//! Resolves a target version from the snapshot store (or, failing that,
//! from the audit log), overwrites the live entity with it and audits the
//! restoration like any other change.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{compute_diff, AuditEntry, AuditFilter, AuditLogRecord, AuditLogger, ChangeDiff};
use crate::config::RestoreConfig;
use crate::error::{AuditError, AuditResult};
use crate::models::{ActorContext, AuditAction, EntityState, EntityType};
use crate::storage::{AuditLogStore, EntitySnapshot, EntityStore, SnapshotStore};

use super::access::{AccessPolicy, RestoreOperation};
use super::reconstruct::reconstruct_from_log;

/// Where a target state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreSource {
    Snapshot,
    AuditLog,
}

impl std::fmt::Display for RestoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestoreSource::Snapshot => write!(f, "snapshot"),
            RestoreSource::AuditLog => write!(f, "audit log"),
        }
    }
}

/// Result of a restore operation
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub target_version: u32,
    pub source: RestoreSource,
    /// The state now live
    pub restored_state: EntityState,
    /// Differences between the previous live state and the restored one
    pub diff_applied: Option<ChangeDiff>,
    /// Id of the queued restore audit record
    pub audit_record_id: Option<Uuid>,
    /// Snapshot version capturing the restored state, if one was taken
    pub new_snapshot_version: Option<u32>,
}

impl RestoreOutcome {
    pub fn changed_fields(&self) -> usize {
        self.diff_applied.as_ref().map_or(0, ChangeDiff::len)
    }

    /// Get a summary of what was restored
    pub fn summary(&self) -> String {
        format!(
            "Restored {} {} to version {} from {} ({} field(s) changed)",
            self.entity_type,
            self.entity_id,
            self.target_version,
            self.source,
            self.changed_fields()
        )
    }
}

/// What a restore would change, without changing it
#[derive(Debug, Clone, Serialize)]
pub struct RestorePreview {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub target_version: u32,
    pub source: RestoreSource,
    /// `None` when the entity does not currently exist
    pub current_state: Option<EntityState>,
    pub target_state: EntityState,
    pub diff: Option<ChangeDiff>,
    pub changed_fields: Vec<String>,
}

/// Snapshots and log records of one entity, newest first
#[derive(Debug, Clone, Serialize)]
pub struct VersionHistory {
    pub snapshots: Vec<EntitySnapshot>,
    pub audit_logs: Vec<AuditLogRecord>,
    pub version_count: usize,
}

/// Restores entities to earlier versions
#[derive(Debug)]
pub struct RestoreEngine {
    snapshots: Arc<dyn SnapshotStore>,
    log_store: Arc<dyn AuditLogStore>,
    entities: Arc<dyn EntityStore>,
    logger: Arc<AuditLogger>,
    policy: Arc<dyn AccessPolicy>,
    config: RwLock<RestoreConfig>,
}

impl RestoreEngine {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        log_store: Arc<dyn AuditLogStore>,
        entities: Arc<dyn EntityStore>,
        logger: Arc<AuditLogger>,
        policy: Arc<dyn AccessPolicy>,
        config: RestoreConfig,
    ) -> Self {
        Self {
            snapshots,
            log_store,
            entities,
            logger,
            policy,
            config: RwLock::new(config),
        }
    }

    pub fn reload(&self, config: RestoreConfig) -> AuditResult<()> {
        *self.config.write().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire write lock: {}", e))
        })? = config;
        Ok(())
    }

    fn config(&self) -> AuditResult<RestoreConfig> {
        self.config
            .read()
            .map(|c| c.clone())
            .map_err(|e| AuditError::Storage(format!("Failed to acquire read lock: {}", e)))
    }

    /// Restore an entity to `target_version`
    pub fn restore(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        target_version: u32,
        actor: &ActorContext,
    ) -> AuditResult<RestoreOutcome> {
        self.policy.authorize(RestoreOperation::Restore, actor)?;
        self.apply_version(entity_type, entity_id, target_version, actor)
    }

    /// Show what restoring `target_version` would change
    pub fn preview_restore(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        target_version: u32,
        actor: &ActorContext,
    ) -> AuditResult<RestorePreview> {
        self.policy.authorize(RestoreOperation::Preview, actor)?;

        let (target_state, source) = self.resolve_target(entity_type, entity_id, target_version)?;
        let current_state = self.entities.load(entity_type, entity_id)?;
        let diff = compute_diff(
            Some(&current_state.clone().unwrap_or_default()),
            Some(&target_state),
            AuditAction::Update,
        );
        let changed_fields = diff
            .as_ref()
            .map(|d| d.fields().cloned().collect())
            .unwrap_or_default();

        Ok(RestorePreview {
            entity_type,
            entity_id: entity_id.to_string(),
            target_version,
            source,
            current_state,
            target_state,
            diff,
            changed_fields,
        })
    }

    /// Restore the second-newest snapshot
    pub fn undo_last_change(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        actor: &ActorContext,
    ) -> AuditResult<RestoreOutcome> {
        self.policy.authorize(RestoreOperation::Undo, actor)?;

        let versions = self.snapshots.list_versions(entity_type, entity_id)?;
        let Some(previous) = versions.get(1) else {
            return Err(AuditError::CannotUndo {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
                versions: versions.len(),
            });
        };

        self.apply_version(entity_type, entity_id, previous.version_number, actor)
    }

    pub fn version_history(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        limit: Option<usize>,
        actor: &ActorContext,
    ) -> AuditResult<VersionHistory> {
        self.policy.authorize(RestoreOperation::History, actor)?;

        let snapshots = self.snapshots.list_versions(entity_type, entity_id)?;
        let audit_logs = self
            .log_store
            .query(&AuditFilter::for_entity(entity_type, entity_id), limit)?;

        Ok(VersionHistory {
            version_count: snapshots.len(),
            snapshots,
            audit_logs,
        })
    }

    /// Snapshot first, audit log reconstruction second
    ///
    /// Once an entity has been snapshotted its versions are snapshot
    /// numbers, so a missing one (pruned or never issued) is `NotFound`
    /// rather than reinterpreted as a log position.
    fn resolve_target(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        version: u32,
    ) -> AuditResult<(EntityState, RestoreSource)> {
        match self.snapshots.get_snapshot(entity_type, entity_id, version) {
            Ok(snapshot) => Ok((snapshot.snapshot_data, RestoreSource::Snapshot)),
            Err(e) if e.is_not_found() => {
                let latest = self.snapshots.latest_version(entity_type, entity_id)?;
                if latest > 0 {
                    let why = if version <= latest { "pruned" } else { "not yet taken" };
                    return Err(AuditError::NotFound {
                        entity_type: format!("{} snapshot", entity_type),
                        identifier: format!("{}@v{} ({})", entity_id, version, why),
                    });
                }

                let window_size = self.config()?.search_window;
                let (window, total) = self
                    .log_store
                    .recent_window(&AuditFilter::for_entity(entity_type, entity_id), window_size)?;

                let state = reconstruct_from_log(&window, total, version)?;
                Ok((state, RestoreSource::AuditLog))
            }
            Err(e) => Err(e),
        }
    }

    fn apply_version(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        version: u32,
        actor: &ActorContext,
    ) -> AuditResult<RestoreOutcome> {
        let (target_state, source) = self.resolve_target(entity_type, entity_id, version)?;

        // A missing entity is restored from empty, which recreates it
        let current_state = self.entities.load(entity_type, entity_id)?.unwrap_or_default();
        let diff = compute_diff(Some(&current_state), Some(&target_state), AuditAction::Update);

        self.entities
            .replace(entity_type, entity_id, &target_state)
            .map_err(|e| match e {
                AuditError::Persistence(_) => e,
                other => AuditError::Persistence(other.to_string()),
            })?;

        let entry = AuditEntry::restore(entity_type, entity_id, current_state, target_state.clone())
            .with_reason(format!("Restored to version {} from audit trail", version))
            .with_tags(["restore".to_string(), format!("v{}", version)]);
        let logged = self.logger.log_change(entry, actor);
        if !logged.queued {
            warn!(entity_type = %entity_type, entity_id, version, "Restore applied but not audited");
        }

        let new_snapshot_version = if self.config()?.snapshot_after_restore {
            match self.snapshots.create_snapshot(entity_type, entity_id, &target_state) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(entity_type = %entity_type, entity_id, error = %e, "Failed to snapshot restored state");
                    None
                }
            }
        } else {
            None
        };

        info!(
            entity_type = %entity_type,
            entity_id,
            version,
            source = %source,
            "Restored entity"
        );

        Ok(RestoreOutcome {
            entity_type,
            entity_id: entity_id.to_string(),
            target_version: version,
            source,
            restored_state: target_state,
            diff_applied: diff,
            audit_record_id: logged.record_id,
            new_snapshot_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditQueue;
    use crate::config::AuditConfig;
    use crate::restore::{AllowAll, RoleAccessPolicy};
    use crate::storage::{MemoryAuditLogStore, MemoryEntityStore, MemorySnapshotStore};
    use serde_json::json;

    struct Fixture {
        engine: RestoreEngine,
        snapshots: Arc<MemorySnapshotStore>,
        log: Arc<MemoryAuditLogStore>,
        entities: Arc<MemoryEntityStore>,
        logger: Arc<AuditLogger>,
    }

    fn fixture(policy: Arc<dyn AccessPolicy>) -> Fixture {
        let config = AuditConfig::default();
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let log = Arc::new(MemoryAuditLogStore::new());
        let entities = Arc::new(MemoryEntityStore::new());
        let queue = Arc::new(AuditQueue::new(log.clone(), config.batching.clone()));
        let logger = Arc::new(AuditLogger::new(queue, &config));
        let engine = RestoreEngine::new(
            snapshots.clone(),
            log.clone(),
            entities.clone(),
            logger.clone(),
            policy,
            config.restore.clone(),
        );
        Fixture {
            engine,
            snapshots,
            log,
            entities,
            logger,
        }
    }

    fn state(value: serde_json::Value) -> EntityState {
        EntityState::from_value(value).unwrap()
    }

    fn admin() -> ActorContext {
        ActorContext::new("u-1", "admin@example.com", "admin")
    }

    #[tokio::test]
    async fn test_restore_from_snapshot() {
        let f = fixture(Arc::new(AllowAll));
        let t = EntityType::Member;
        f.snapshots.create_snapshot(t, "m", &state(json!({"name": "A"}))).unwrap();
        f.entities.replace(t, "m", &state(json!({"name": "B", "extra": 1}))).unwrap();

        let outcome = f.engine.restore(t, "m", 1, &admin()).unwrap();
        assert_eq!(outcome.source, RestoreSource::Snapshot);
        assert_eq!(outcome.changed_fields(), 2);
        assert_eq!(outcome.new_snapshot_version, Some(2));

        // Full overwrite, not a patch
        assert_eq!(f.entities.load(t, "m").unwrap().unwrap(), state(json!({"name": "A"})));

        f.logger.queue().force_flush().await.unwrap();
        let record = &f.log.all().unwrap()[0];
        assert_eq!(record.action, AuditAction::Restore);
        assert_eq!(record.tags, vec!["restore", "v1"]);
        assert_eq!(record.reason.as_deref(), Some("Restored to version 1 from audit trail"));
        assert_eq!(Some(record.id), outcome.audit_record_id);
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let f = fixture(Arc::new(AllowAll));
        let t = EntityType::Event;
        f.snapshots.create_snapshot(t, "e", &state(json!({"status": "draft"}))).unwrap();
        f.entities.replace(t, "e", &state(json!({"status": "live"}))).unwrap();

        let preview = f.engine.preview_restore(t, "e", 1, &admin()).unwrap();
        assert_eq!(preview.changed_fields, vec!["status"]);
        assert_eq!(preview.current_state, Some(state(json!({"status": "live"}))));

        assert_eq!(f.entities.load(t, "e").unwrap().unwrap(), state(json!({"status": "live"})));
        assert!(f.logger.queue().is_empty());
        assert_eq!(f.snapshots.list_versions(t, "e").unwrap().len(), 1);
    }

    #[test]
    fn test_undo_requires_two_versions() {
        let f = fixture(Arc::new(AllowAll));
        let t = EntityType::Member;

        let err = f.engine.undo_last_change(t, "m", &admin()).unwrap_err();
        assert!(matches!(err, AuditError::CannotUndo { versions: 0, .. }));

        f.snapshots.create_snapshot(t, "m", &state(json!({"name": "A"}))).unwrap();
        let err = f.engine.undo_last_change(t, "m", &admin()).unwrap_err();
        assert!(matches!(err, AuditError::CannotUndo { versions: 1, .. }));
    }

    #[test]
    fn test_undo_restores_previous_snapshot() {
        let f = fixture(Arc::new(AllowAll));
        let t = EntityType::Member;
        f.snapshots.create_snapshot(t, "m", &state(json!({"name": "A"}))).unwrap();
        f.snapshots.create_snapshot(t, "m", &state(json!({"name": "B"}))).unwrap();
        f.entities.replace(t, "m", &state(json!({"name": "B"}))).unwrap();

        let outcome = f.engine.undo_last_change(t, "m", &admin()).unwrap();
        assert_eq!(outcome.target_version, 1);
        assert_eq!(f.entities.load(t, "m").unwrap().unwrap(), state(json!({"name": "A"})));
    }

    #[tokio::test]
    async fn test_restore_falls_back_to_audit_log() {
        let f = fixture(Arc::new(AllowAll));
        let t = EntityType::Attendance;
        let actor = admin();

        f.logger.log_change(AuditEntry::create(t, "p-1", state(json!({"scan_id": 5}))), &actor);
        f.logger.log_change(
            AuditEntry::update(t, "p-1", state(json!({"scan_id": 5})), state(json!({"scan_id": 6}))),
            &actor,
        );
        f.logger.queue().force_flush().await.unwrap();
        f.entities.replace(t, "p-1", &state(json!({"scan_id": 6}))).unwrap();

        let outcome = f.engine.restore(t, "p-1", 1, &actor).unwrap();
        assert_eq!(outcome.source, RestoreSource::AuditLog);
        assert_eq!(outcome.restored_state, state(json!({"scan_id": 5})));
    }

    #[test]
    fn test_missing_version_not_found() {
        let f = fixture(Arc::new(AllowAll));
        let err = f.engine.restore(EntityType::Member, "ghost", 3, &admin()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pruned_version_not_read_from_log() {
        let f = fixture(Arc::new(AllowAll));
        let t = EntityType::Member;
        let actor = admin();

        // Log and snapshot numbering disagree once a delete is involved
        f.logger.log_change(AuditEntry::create(t, "m", state(json!({"name": "A"}))), &actor);
        f.logger.log_change(AuditEntry::delete(t, "m", state(json!({"name": "A"}))), &actor);
        f.logger.log_change(AuditEntry::create(t, "m", state(json!({"name": "B"}))), &actor);
        f.logger.queue().force_flush().await.unwrap();
        for name in ["A", "B", "C"] {
            f.snapshots.create_snapshot(t, "m", &state(json!({"name": name}))).unwrap();
        }
        f.snapshots.prune(t, "m", 1).unwrap();

        let err = f.engine.restore(t, "m", 2, &actor).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("pruned"));

        let err = f.engine.preview_restore(t, "m", 9, &actor).unwrap_err();
        assert!(err.is_not_found());
        assert!(f.entities.load(t, "m").unwrap().is_none());
    }

    #[test]
    fn test_restore_recreates_deleted_entity() {
        let f = fixture(Arc::new(AllowAll));
        let t = EntityType::Member;
        f.snapshots.create_snapshot(t, "m", &state(json!({"name": "A"}))).unwrap();

        let outcome = f.engine.restore(t, "m", 1, &admin()).unwrap();
        assert_eq!(outcome.changed_fields(), 1);
        assert!(f.entities.load(t, "m").unwrap().is_some());
    }

    #[test]
    fn test_policy_enforced() {
        let f = fixture(Arc::new(RoleAccessPolicy::default()));
        let staff = ActorContext::new("u-9", "staff@example.com", "staff");
        f.snapshots
            .create_snapshot(EntityType::Member, "m", &state(json!({"name": "A"})))
            .unwrap();

        let err = f.engine.restore(EntityType::Member, "m", 1, &staff).unwrap_err();
        assert!(matches!(err, AuditError::PermissionDenied(_)));
        assert!(f.entities.load(EntityType::Member, "m").unwrap().is_none());

        let err = f
            .engine
            .version_history(EntityType::Member, "m", None, &staff)
            .unwrap_err();
        assert!(matches!(err, AuditError::PermissionDenied(_)));
    }

    #[test]
    fn test_version_history() {
        let f = fixture(Arc::new(AllowAll));
        let t = EntityType::Member;
        f.snapshots.create_snapshot(t, "m", &state(json!({"name": "A"}))).unwrap();
        f.snapshots.create_snapshot(t, "m", &state(json!({"name": "B"}))).unwrap();

        let history = f.engine.version_history(t, "m", Some(10), &admin()).unwrap();
        assert_eq!(history.version_count, 2);
        assert_eq!(history.snapshots[0].version_number, 2);
        assert!(history.audit_logs.is_empty());
    }
}
