//! Configuration module for rollcall
//!
//! - XDG-compliant path resolution
//! - Audit configuration persistence

pub mod paths;
pub mod settings;

pub use paths::RollcallPaths;
pub use settings::{AuditConfig, BatchConfig, RestoreConfig, RetentionConfig, SnapshotConfig};
