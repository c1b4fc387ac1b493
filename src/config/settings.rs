//! Audit configuration
//!
//! Toggles for the audit trail, batching, snapshots, restore and retention.
//! Every field has a serde default so partial config files load cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::RollcallPaths;
use crate::error::AuditError;
use crate::models::{EntityType, FieldPolicy};

/// Queue batching settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// When false every enqueue is flushed immediately
    pub enabled: bool,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    /// Extra attempts for a failed batch write
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub retry_backoff_ms: u64,
    /// Fall back to single-record writes when the batch write keeps failing
    pub fallback_to_realtime: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 50,
            batch_interval_ms: 30_000,
            max_retries: 3,
            retry_backoff_ms: 250,
            fallback_to_realtime: true,
        }
    }
}

impl BatchConfig {
    /// Number of buffered records that triggers an immediate flush
    pub fn effective_batch_size(&self) -> usize {
        if self.enabled {
            self.batch_size.max(1)
        } else {
            1
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Snapshot settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Entity types snapshotted after every create and update
    pub critical_entities: Vec<EntityType>,
    /// Keep at most this many versions per entity
    pub keep_versions: Option<usize>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            critical_entities: vec![EntityType::Member, EntityType::Event],
            keep_versions: None,
        }
    }
}

impl SnapshotConfig {
    pub fn is_critical(&self, entity_type: EntityType) -> bool {
        self.critical_entities.contains(&entity_type)
    }
}

/// Restore settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// How many of an entity's newest log records reconstruction may read
    pub search_window: usize,
    /// Snapshot the restored state as a new version
    pub snapshot_after_restore: bool,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            search_window: 50,
            snapshot_after_restore: true,
        }
    }
}

/// Retention and GDPR settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub gdpr_enabled: bool,
    pub retention_days: u32,
    pub deletion_grace_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            gdpr_enabled: false,
            retention_days: 90,
            deletion_grace_days: 30,
        }
    }
}

/// Complete audit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Schema version for migration support
    pub schema_version: u32,
    /// Master switch for the audit trail
    pub enabled: bool,
    /// Drop updates whose diff is empty instead of logging them
    pub skip_noop_updates: bool,
    pub batching: BatchConfig,
    pub snapshots: SnapshotConfig,
    pub restore: RestoreConfig,
    pub retention: RetentionConfig,
    pub field_policy: FieldPolicy,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            enabled: true,
            skip_noop_updates: true,
            batching: BatchConfig::default(),
            snapshots: SnapshotConfig::default(),
            restore: RestoreConfig::default(),
            retention: RetentionConfig::default(),
            field_policy: FieldPolicy::default(),
        }
    }
}

impl AuditConfig {
    /// Load config from disk, or return defaults if the file doesn't exist
    pub fn load_or_create(paths: &RollcallPaths) -> Result<Self, AuditError> {
        let config_path = paths.config_file();

        if !config_path.exists() {
            // Caller decides when to persist
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .map_err(|e| AuditError::Io(format!("Failed to read config file: {}", e)))?;

        let config: AuditConfig = serde_json::from_str(&contents)
            .map_err(|e| AuditError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self, paths: &RollcallPaths) -> Result<(), AuditError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AuditError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(paths.config_file(), contents)
            .map_err(|e| AuditError::Io(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        if self.batching.batch_size == 0 {
            return Err(AuditError::Config("batching.batch_size must be at least 1".into()));
        }
        if self.batching.enabled && self.batching.batch_interval_ms == 0 {
            return Err(AuditError::Config(
                "batching.batch_interval_ms must be positive when batching is enabled".into(),
            ));
        }
        if self.restore.search_window == 0 {
            return Err(AuditError::Config("restore.search_window must be at least 1".into()));
        }
        if self.snapshots.keep_versions == Some(0) {
            return Err(AuditError::Config(
                "snapshots.keep_versions must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}
