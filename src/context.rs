//! Application-lifetime owner of the audit engine
//!
//! `AuditContext` is constructed once, owns every store plus the queue,
//! and is passed to whatever serves requests. Nothing in the crate keeps
//! module-level state.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::audit::{AuditFilter, AuditLogRecord, AuditLogger, AuditQueue, FlushReport};
use crate::audited::AuditedEntities;
use crate::compliance::ComplianceManager;
use crate::config::{AuditConfig, RollcallPaths};
use crate::error::{AuditError, AuditResult};
use crate::models::{ActorContext, EntityType};
use crate::restore::{
    AccessPolicy, RestoreEngine, RestoreOutcome, RestorePreview, RoleAccessPolicy, VersionHistory,
};
use crate::storage::{
    AuditLogStore, DeletionRegistry, EntityStore, FileSnapshotStore, JsonEntityStore,
    JsonlAuditLogStore, MemoryAuditLogStore, MemoryEntityStore, MemorySnapshotStore, SnapshotStore,
};

/// Everything the engine needs, wired together
#[derive(Debug)]
pub struct AuditContext {
    paths: Option<RollcallPaths>,
    config: RwLock<AuditConfig>,
    log_store: Arc<dyn AuditLogStore>,
    snapshots: Arc<dyn SnapshotStore>,
    entities: Arc<dyn EntityStore>,
    logger: Arc<AuditLogger>,
    restore: RestoreEngine,
    audited: AuditedEntities,
    compliance: ComplianceManager,
}

struct Stores {
    log_store: Arc<dyn AuditLogStore>,
    snapshots: Arc<dyn SnapshotStore>,
    entities: Arc<dyn EntityStore>,
    deletions: Arc<DeletionRegistry>,
}

impl AuditContext {
    /// File-backed context rooted at `paths`
    pub fn open(paths: RollcallPaths, config: AuditConfig) -> AuditResult<Self> {
        config.validate()?;
        paths.ensure_directories()?;

        let stores = Stores {
            log_store: Arc::new(JsonlAuditLogStore::new(paths.audit_log(), paths.archive_dir())),
            snapshots: Arc::new(FileSnapshotStore::new(paths.snapshot_dir())),
            entities: Arc::new(JsonEntityStore::new(paths.data_dir())),
            deletions: Arc::new(DeletionRegistry::open(paths.deletions_file())?),
        };

        info!(base_dir = %paths.base_dir().display(), "Opened audit context");
        Ok(Self::build(Some(paths), config, stores, Arc::new(RoleAccessPolicy::default())))
    }

    /// Context over in-memory stores
    pub fn in_memory(config: AuditConfig) -> AuditResult<Self> {
        config.validate()?;
        let stores = Stores {
            log_store: Arc::new(MemoryAuditLogStore::new()),
            snapshots: Arc::new(MemorySnapshotStore::new()),
            entities: Arc::new(MemoryEntityStore::new()),
            deletions: Arc::new(DeletionRegistry::in_memory()),
        };
        Ok(Self::build(None, config, stores, Arc::new(RoleAccessPolicy::default())))
    }

    fn build(
        paths: Option<RollcallPaths>,
        config: AuditConfig,
        stores: Stores,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        let queue = Arc::new(AuditQueue::new(stores.log_store.clone(), config.batching.clone()));
        let logger = Arc::new(AuditLogger::new(queue.clone(), &config));

        let restore = RestoreEngine::new(
            stores.snapshots.clone(),
            stores.log_store.clone(),
            stores.entities.clone(),
            logger.clone(),
            policy,
            config.restore.clone(),
        );
        let audited = AuditedEntities::new(
            stores.entities.clone(),
            stores.snapshots.clone(),
            logger.clone(),
            config.snapshots.clone(),
        );
        let compliance = ComplianceManager::new(
            stores.log_store.clone(),
            queue,
            stores.snapshots.clone(),
            stores.entities.clone(),
            stores.deletions,
            config.retention.clone(),
        );

        Self {
            paths,
            config: RwLock::new(config),
            log_store: stores.log_store,
            snapshots: stores.snapshots,
            entities: stores.entities,
            logger,
            restore,
            audited,
            compliance,
        }
    }

    pub fn paths(&self) -> Option<&RollcallPaths> {
        self.paths.as_ref()
    }

    pub fn config(&self) -> AuditResult<AuditConfig> {
        self.config
            .read()
            .map(|c| c.clone())
            .map_err(|e| AuditError::Storage(format!("Failed to acquire read lock: {}", e)))
    }

    /// Push new settings into every component
    pub fn reload(&self, config: AuditConfig) -> AuditResult<()> {
        config.validate()?;

        self.queue().reload(config.batching.clone())?;
        self.logger.reload(&config);
        self.restore.reload(config.restore.clone())?;
        self.audited.reload(config.snapshots.clone())?;
        self.compliance.reload(config.retention.clone())?;

        *self.config.write().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire write lock: {}", e))
        })? = config;

        info!("Reloaded audit configuration");
        Ok(())
    }

    pub fn logger(&self) -> &AuditLogger {
        &self.logger
    }

    pub fn queue(&self) -> &AuditQueue {
        self.logger.queue()
    }

    pub fn audited(&self) -> &AuditedEntities {
        &self.audited
    }

    pub fn restore_engine(&self) -> &RestoreEngine {
        &self.restore
    }

    pub fn entities(&self) -> &dyn EntityStore {
        self.entities.as_ref()
    }

    pub fn snapshots(&self) -> &dyn SnapshotStore {
        self.snapshots.as_ref()
    }

    /// The compliance manager, when GDPR features are switched on
    pub fn compliance(&self) -> AuditResult<&ComplianceManager> {
        if self.config()?.retention.gdpr_enabled {
            Ok(&self.compliance)
        } else {
            Err(AuditError::Config(
                "GDPR features are disabled (set retention.gdpr_enabled)".into(),
            ))
        }
    }

    /// Persisted records about one entity, newest first
    pub fn get_audit_history(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        limit: Option<usize>,
    ) -> AuditResult<Vec<AuditLogRecord>> {
        self.log_store
            .query(&AuditFilter::for_entity(entity_type, entity_id), limit)
    }

    pub fn get_all_audit_logs(
        &self,
        filter: &AuditFilter,
        limit: Option<usize>,
    ) -> AuditResult<Vec<AuditLogRecord>> {
        self.log_store.query(filter, limit)
    }

    /// Drain the queue so reads and restores see every record
    pub async fn flush(&self) -> AuditResult<FlushReport> {
        self.queue().force_flush().await
    }

    pub async fn restore(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        target_version: u32,
        actor: &ActorContext,
    ) -> AuditResult<RestoreOutcome> {
        self.flush().await?;
        self.restore.restore(entity_type, entity_id, target_version, actor)
    }

    pub async fn preview_restore(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        target_version: u32,
        actor: &ActorContext,
    ) -> AuditResult<RestorePreview> {
        self.flush().await?;
        self.restore
            .preview_restore(entity_type, entity_id, target_version, actor)
    }

    pub async fn undo_last_change(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        actor: &ActorContext,
    ) -> AuditResult<RestoreOutcome> {
        self.flush().await?;
        self.restore.undo_last_change(entity_type, entity_id, actor)
    }

    pub async fn version_history(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        limit: Option<usize>,
        actor: &ActorContext,
    ) -> AuditResult<VersionHistory> {
        self.flush().await?;
        self.restore
            .version_history(entity_type, entity_id, limit, actor)
    }

    /// Flush everything still buffered; call before the process exits
    pub async fn shutdown(&self) -> AuditResult<FlushReport> {
        let report = self.flush().await?;
        let dead = self.queue().dead_letters()?.len();
        if dead > 0 {
            warn!(dead_letters = dead, "Shutting down with undelivered audit records");
        }
        Ok(report)
    }
}
