//! GDPR anonymization, soft deletion and log retention

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::audit::{AuditFilter, AuditQueue, SortOrder};
use crate::config::RetentionConfig;
use crate::error::{AuditError, AuditResult};
use crate::models::EntityType;
use crate::storage::{
    AnonymizeTarget, ArchiveReport, AuditLogStore, DeletionMark, DeletionRegistry, EntityStore,
    SnapshotStore,
};

/// Rough on-disk size of one audit record, used for storage estimates
pub const ESTIMATED_RECORD_BYTES: u64 = 300;

/// A deletion request and where it stands
#[derive(Debug, Clone, Serialize)]
pub struct PendingDeletion {
    pub mark: DeletionMark,
    /// Whole days until the grace window ends, never negative
    pub days_remaining: i64,
    pub can_delete: bool,
}

/// What the audit trail holds about one actor
#[derive(Debug, Clone, Serialize)]
pub struct ActorSummary {
    pub actor_id: String,
    pub record_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub estimated_bytes: u64,
}

/// Result of a permanent deletion
#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_removed: bool,
    pub snapshots_removed: usize,
    pub records_anonymized: usize,
}

/// Data-protection operations on top of the audit log
///
/// Passes that rewrite or count records drain the audit queue first, so
/// records still buffered at call time are covered too.
#[derive(Debug)]
pub struct ComplianceManager {
    log_store: Arc<dyn AuditLogStore>,
    queue: Arc<AuditQueue>,
    snapshots: Arc<dyn SnapshotStore>,
    entities: Arc<dyn EntityStore>,
    deletions: Arc<DeletionRegistry>,
    config: RwLock<RetentionConfig>,
}

impl ComplianceManager {
    pub fn new(
        log_store: Arc<dyn AuditLogStore>,
        queue: Arc<AuditQueue>,
        snapshots: Arc<dyn SnapshotStore>,
        entities: Arc<dyn EntityStore>,
        deletions: Arc<DeletionRegistry>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            log_store,
            queue,
            snapshots,
            entities,
            deletions,
            config: RwLock::new(config),
        }
    }

    pub fn reload(&self, config: RetentionConfig) -> AuditResult<()> {
        *self.config.write().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire write lock: {}", e))
        })? = config;
        Ok(())
    }

    fn config(&self) -> AuditResult<RetentionConfig> {
        self.config
            .read()
            .map(|c| c.clone())
            .map_err(|e| AuditError::Storage(format!("Failed to acquire read lock: {}", e)))
    }

    async fn drain_queue(&self) -> AuditResult<()> {
        let report = self.queue.force_flush().await?;
        if report.dead_lettered > 0 || !self.queue.is_empty() {
            warn!(
                dead_lettered = report.dead_lettered,
                buffered = self.queue.len(),
                "Audit records not persisted before compliance pass"
            );
        }
        Ok(())
    }

    /// Strip actor details from every record about an entity
    ///
    /// Diffs and actions are kept. Returns how many records changed.
    pub async fn anonymize(&self, entity_id: &str) -> AuditResult<usize> {
        self.drain_queue().await?;
        self.anonymize_persisted(entity_id)
    }

    fn anonymize_persisted(&self, entity_id: &str) -> AuditResult<usize> {
        let changed = self
            .log_store
            .anonymize(&AnonymizeTarget::Entity(entity_id.to_string()))?;
        info!(entity_id, records = changed, "Anonymized audit records for entity");
        Ok(changed)
    }

    /// Strip actor details from every record written by an actor
    pub async fn anonymize_actor(&self, actor_id: &str) -> AuditResult<usize> {
        self.drain_queue().await?;
        let changed = self
            .log_store
            .anonymize(&AnonymizeTarget::Actor(actor_id.to_string()))?;
        info!(actor_id, records = changed, "Anonymized audit records for actor");
        Ok(changed)
    }

    /// Request deletion of an entity after the configured grace period
    pub fn mark_for_deletion(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        reason: Option<String>,
    ) -> AuditResult<DeletionMark> {
        if self.entities.load(entity_type, entity_id)?.is_none() {
            return Err(AuditError::entity_not_found(entity_type, entity_id));
        }

        let grace_days = self.config()?.deletion_grace_days;
        let requested_at = Utc::now();
        let mark = DeletionMark {
            entity_type,
            entity_id: entity_id.to_string(),
            requested_at,
            reason,
            deadline: requested_at + Duration::days(i64::from(grace_days)),
        };
        self.deletions.insert(mark.clone())?;

        info!(
            entity_type = %entity_type,
            entity_id,
            deadline = %mark.deadline,
            "Marked entity for deletion"
        );
        Ok(mark)
    }

    /// Cancel a pending deletion
    pub fn recover(&self, entity_id: &str) -> AuditResult<DeletionMark> {
        let mark = self.deletions.remove(entity_id)?.ok_or_else(|| AuditError::NotFound {
            entity_type: "Deletion request".into(),
            identifier: entity_id.to_string(),
        })?;
        info!(entity_id, "Recovered entity from pending deletion");
        Ok(mark)
    }

    pub async fn permanently_delete(&self, entity_id: &str) -> AuditResult<PurgeReport> {
        self.permanently_delete_at(entity_id, Utc::now()).await
    }

    /// Erase a marked entity once its grace window has passed
    ///
    /// Removes the live entity and its snapshots, anonymizes its audit
    /// records and clears the mark.
    pub async fn permanently_delete_at(
        &self,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> AuditResult<PurgeReport> {
        let mark = self.deletions.get(entity_id)?.ok_or_else(|| AuditError::NotFound {
            entity_type: "Deletion request".into(),
            identifier: entity_id.to_string(),
        })?;

        if now <= mark.deadline {
            return Err(AuditError::GracePeriodActive {
                entity_id: entity_id.to_string(),
                deadline: mark.deadline,
            });
        }

        self.drain_queue().await?;

        let entity_removed = self.entities.remove(mark.entity_type, entity_id)?.is_some();
        if !entity_removed {
            warn!(entity_type = %mark.entity_type, entity_id, "Entity already gone at permanent deletion");
        }
        let snapshots_removed = self.snapshots.prune(mark.entity_type, entity_id, 0)?.len();
        let records_anonymized = self.anonymize_persisted(entity_id)?;
        self.deletions.remove(entity_id)?;

        info!(
            entity_type = %mark.entity_type,
            entity_id,
            snapshots_removed,
            records_anonymized,
            "Permanently deleted entity"
        );

        Ok(PurgeReport {
            entity_type: mark.entity_type,
            entity_id: entity_id.to_string(),
            entity_removed,
            snapshots_removed,
            records_anonymized,
        })
    }

    pub fn pending_deletions(&self) -> AuditResult<Vec<PendingDeletion>> {
        self.pending_deletions_at(Utc::now())
    }

    /// Every deletion mark, earliest deadline first
    pub fn pending_deletions_at(&self, now: DateTime<Utc>) -> AuditResult<Vec<PendingDeletion>> {
        Ok(self
            .deletions
            .all()?
            .into_iter()
            .map(|mark| {
                let remaining = mark.deadline - now;
                // Round partial days up so "1 day left" lasts until the deadline
                let days_remaining = if remaining > Duration::zero() {
                    (remaining.num_seconds() + 86_399) / 86_400
                } else {
                    0
                };
                PendingDeletion {
                    can_delete: now > mark.deadline,
                    days_remaining,
                    mark,
                }
            })
            .collect())
    }

    /// Summarise what the audit trail holds about an actor
    pub async fn actor_summary(&self, actor_id: &str) -> AuditResult<ActorSummary> {
        self.drain_queue().await?;
        let filter = AuditFilter::new().actor_id(actor_id);
        let record_count = self.log_store.count(&filter)?;
        let last_activity = self
            .log_store
            .query(&filter.order(SortOrder::NewestFirst), Some(1))?
            .first()
            .map(|r| r.timestamp);

        Ok(ActorSummary {
            actor_id: actor_id.to_string(),
            record_count,
            last_activity,
            estimated_bytes: record_count as u64 * ESTIMATED_RECORD_BYTES,
        })
    }

    pub fn archive(&self, retention_days: u32) -> AuditResult<ArchiveReport> {
        self.archive_at(retention_days, Utc::now())
    }

    /// Move records older than `retention_days` out of the live log
    pub fn archive_at(&self, retention_days: u32, now: DateTime<Utc>) -> AuditResult<ArchiveReport> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let report = self.log_store.archive_before(cutoff)?;
        info!(
            archived = report.archived,
            remaining = report.remaining,
            retention_days,
            "Archived audit records"
        );
        Ok(report)
    }

    /// Archive with the configured retention window
    pub fn archive_expired(&self) -> AuditResult<ArchiveReport> {
        let days = self.config()?.retention_days;
        self.archive(days)
    }
}
