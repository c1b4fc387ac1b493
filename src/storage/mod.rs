//! Storage layer for rollcall
//!
//! Provides the audit log, snapshot, live-entity and deletion-mark stores.
//! Every store has a file-backed implementation with atomic writes and an
//! in-memory one for tests and embedding.

pub mod audit_log;
pub mod deletions;
pub mod entities;
pub mod file_io;
pub mod snapshots;

pub use audit_log::{
    AnonymizeTarget, ArchiveReport, AuditLogStore, JsonlAuditLogStore, MemoryAuditLogStore,
};
pub use deletions::{DeletionMark, DeletionRegistry};
pub use entities::{EntityStore, JsonEntityStore, MemoryEntityStore};
pub use file_io::{read_json, write_json_atomic};
pub use snapshots::{EntitySnapshot, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
