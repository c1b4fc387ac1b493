//! Error types for the rollcall audit engine
//!
//! A single error hierarchy covers the producer path, the stores, the
//! restore engine and the retention module. Producer-side failures are
//! recovered locally by the logger; restore and compliance failures are
//! returned to the caller.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The main error type for rollcall operations
#[derive(Error, Debug)]
pub enum AuditError {
    /// Malformed audit entry or invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// A store rejected a write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Snapshot, log history or entity not found
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    /// Undo requested without enough version history
    #[error("Cannot undo {entity_type} {entity_id}: {versions} version(s) available, need at least 2")]
    CannotUndo {
        entity_type: String,
        entity_id: String,
        versions: usize,
    },

    /// The access policy refused the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Permanent deletion attempted before the grace window ended
    #[error("Grace period active for {entity_id}: can delete after {deadline}")]
    GracePeriodActive {
        entity_id: String,
        deadline: DateTime<Utc>,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Storage errors (locks, corrupt files)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuditError {
    /// Create a "not found" error for a snapshot version
    pub fn snapshot_not_found(entity_type: impl ToString, entity_id: &str, version: u32) -> Self {
        Self::NotFound {
            entity_type: format!("{} snapshot", entity_type.to_string()),
            identifier: format!("{}@v{}", entity_id, version),
        }
    }

    /// Create a "not found" error for an entity
    pub fn entity_not_found(entity_type: impl ToString, entity_id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            identifier: entity_id.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for rollcall operations
pub type AuditResult<T> = Result<T, AuditError>;
