//! Audited entity mutations
//!
//! Business-layer writes go through `AuditedEntities` so that every change
//! lands in the live store, the audit trail and (for critical entity types)
//! the snapshot store. Audit and snapshot failures are logged and never
//! fail the mutation itself.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use crate::audit::{AuditEntry, AuditLogger, LogOutcome};
use crate::config::SnapshotConfig;
use crate::error::{AuditError, AuditResult};
use crate::models::{ActorContext, AuditAction, EntityState, EntityType};
use crate::storage::{EntityStore, SnapshotStore};

/// What an audited mutation did
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub action: AuditAction,
    pub queued: bool,
    pub record_id: Option<uuid::Uuid>,
    pub snapshot_version: Option<u32>,
}

impl MutationOutcome {
    fn new(action: AuditAction, logged: LogOutcome, snapshot_version: Option<u32>) -> Self {
        Self {
            action,
            queued: logged.queued,
            record_id: logged.record_id,
            snapshot_version,
        }
    }
}

#[derive(Debug)]
pub struct AuditedEntities {
    entities: Arc<dyn EntityStore>,
    snapshots: Arc<dyn SnapshotStore>,
    logger: Arc<AuditLogger>,
    config: RwLock<SnapshotConfig>,
}

impl AuditedEntities {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        snapshots: Arc<dyn SnapshotStore>,
        logger: Arc<AuditLogger>,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            entities,
            snapshots,
            logger,
            config: RwLock::new(config),
        }
    }

    pub fn reload(&self, config: SnapshotConfig) -> AuditResult<()> {
        *self.config.write().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire write lock: {}", e))
        })? = config;
        Ok(())
    }

    /// Create or overwrite an entity
    pub fn upsert(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        state: EntityState,
        actor: &ActorContext,
    ) -> AuditResult<MutationOutcome> {
        self.write(entity_type, entity_id, state, actor, None)
    }

    /// Like `upsert`, but recorded as a bulk import
    pub fn import(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        state: EntityState,
        actor: &ActorContext,
    ) -> AuditResult<MutationOutcome> {
        self.write(entity_type, entity_id, state, actor, Some(AuditAction::Import))
    }

    /// Remove an entity, capturing its final state in the audit trail
    pub fn delete(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        actor: &ActorContext,
    ) -> AuditResult<MutationOutcome> {
        let before = self
            .entities
            .remove(entity_type, entity_id)?
            .ok_or_else(|| AuditError::entity_not_found(entity_type, entity_id))?;

        let logged = self
            .logger
            .log_change(AuditEntry::delete(entity_type, entity_id, before), actor);
        Ok(MutationOutcome::new(AuditAction::Delete, logged, None))
    }

    fn write(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        state: EntityState,
        actor: &ActorContext,
        action: Option<AuditAction>,
    ) -> AuditResult<MutationOutcome> {
        if entity_id.trim().is_empty() {
            return Err(AuditError::Validation("Entity id cannot be empty".into()));
        }

        let before = self.entities.load(entity_type, entity_id)?;
        let unchanged = before.as_ref() == Some(&state);
        self.entities.replace(entity_type, entity_id, &state)?;

        let entry = match (action, before) {
            (Some(AuditAction::Import), before) => {
                AuditEntry::import(entity_type, entity_id, before, state.clone())
            }
            (_, Some(before)) => AuditEntry::update(entity_type, entity_id, before, state.clone()),
            (_, None) => AuditEntry::create(entity_type, entity_id, state.clone()),
        };
        let action = entry.action;
        let logged = self.logger.log_change(entry, actor);

        // Consecutive snapshots never hold the same state
        let snapshot_version = if unchanged {
            debug!(entity_type = %entity_type, entity_id, "State unchanged, no snapshot taken");
            None
        } else {
            self.snapshot_if_critical(entity_type, entity_id, &state)
        };
        Ok(MutationOutcome::new(action, logged, snapshot_version))
    }

    fn snapshot_if_critical(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        state: &EntityState,
    ) -> Option<u32> {
        let config = match self.config.read() {
            Ok(config) => config.clone(),
            Err(e) => {
                warn!(error = %e, "Snapshot settings unavailable");
                return None;
            }
        };
        if !config.is_critical(entity_type) {
            return None;
        }

        let version = match self.snapshots.create_snapshot(entity_type, entity_id, state) {
            Ok(version) => version,
            Err(e) => {
                warn!(entity_type = %entity_type, entity_id, error = %e, "Failed to snapshot entity");
                return None;
            }
        };

        if let Some(keep) = config.keep_versions {
            match self.snapshots.prune(entity_type, entity_id, keep) {
                Ok(removed) if !removed.is_empty() => {
                    debug!(entity_type = %entity_type, entity_id, removed = removed.len(), "Pruned old versions");
                }
                Ok(_) => {}
                Err(e) => warn!(entity_type = %entity_type, entity_id, error = %e, "Failed to prune snapshots"),
            }
        }

        Some(version)
    }
}
