//! Producer side of the audit trail
//!
//! `AuditLogger::log_change` is what business mutations call. It never
//! fails: problems are logged and reported through `LogOutcome::queued`,
//! so a mutation's own success never depends on the audit trail.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::models::{ActorContext, AuditAction, FieldPolicy};

use super::diff::compute_diff;
use super::entry::{AuditEntry, AuditLogRecord};
use super::queue::AuditQueue;

/// Result of handing an entry to the logger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOutcome {
    pub queued: bool,
    pub record_id: Option<Uuid>,
}

impl LogOutcome {
    fn skipped() -> Self {
        Self {
            queued: false,
            record_id: None,
        }
    }
}

#[derive(Debug, Clone)]
struct LoggerSettings {
    enabled: bool,
    skip_noop_updates: bool,
    field_policy: FieldPolicy,
}

impl From<&AuditConfig> for LoggerSettings {
    fn from(config: &AuditConfig) -> Self {
        Self {
            enabled: config.enabled,
            skip_noop_updates: config.skip_noop_updates,
            field_policy: config.field_policy.clone(),
        }
    }
}

/// Turns audit entries into records and hands them to the queue
#[derive(Debug)]
pub struct AuditLogger {
    queue: Arc<AuditQueue>,
    settings: RwLock<LoggerSettings>,
}

impl AuditLogger {
    pub fn new(queue: Arc<AuditQueue>, config: &AuditConfig) -> Self {
        Self {
            queue,
            settings: RwLock::new(LoggerSettings::from(config)),
        }
    }

    pub fn queue(&self) -> &Arc<AuditQueue> {
        &self.queue
    }

    /// Apply new toggles and field policy
    pub fn reload(&self, config: &AuditConfig) {
        match self.settings.write() {
            Ok(mut settings) => *settings = LoggerSettings::from(config),
            Err(e) => error!(error = %e, "Failed to reload audit logger settings"),
        }
    }

    /// Record a change made by `actor`
    pub fn log_change(&self, entry: AuditEntry, actor: &ActorContext) -> LogOutcome {
        if let Err(e) = entry.validate() {
            warn!(error = %e, "Rejected malformed audit entry");
            return LogOutcome::skipped();
        }

        let settings = match self.settings.read() {
            Ok(settings) => settings.clone(),
            Err(e) => {
                error!(error = %e, "Audit logger settings unavailable");
                return LogOutcome::skipped();
            }
        };

        if !settings.enabled {
            return LogOutcome::skipped();
        }

        let mut entry = entry;
        let policy = &settings.field_policy;
        let entity_type = entry.entity_type;
        entry.before = entry.before.take().map(|s| policy.sanitize(entity_type, s));
        entry.after = entry.after.take().map(|s| policy.sanitize(entity_type, s));

        let change_diff = compute_diff(entry.before.as_ref(), entry.after.as_ref(), entry.action);

        if change_diff.is_none() && entry.action == AuditAction::Update && settings.skip_noop_updates {
            debug!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                "Skipped no-op update"
            );
            return LogOutcome::skipped();
        }

        let record = AuditLogRecord::from_entry(entry, change_diff, actor, Utc::now());
        let record_id = record.id;
        let (entity_type, entity_id) = (record.entity_type, record.entity_id.clone());

        match self.queue.enqueue(record) {
            Ok(_) => LogOutcome {
                queued: true,
                record_id: Some(record_id),
            },
            Err(e) => {
                error!(
                    entity_type = %entity_type,
                    entity_id = %entity_id,
                    error = %e,
                    "Failed to queue audit record"
                );
                LogOutcome::skipped()
            }
        }
    }
}
