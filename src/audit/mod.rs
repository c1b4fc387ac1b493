//! Audit logging system for rollcall
//!
//! Records every create, update, delete, import and restore as a field-level
//! diff in an append-only log.
//!
//! # Architecture
//!
//! - `compute_diff`: builds the `ChangeDiff` for an action from the
//!   before/after states.
//! - `AuditEntry`: the change as described by the caller.
//! - `AuditLogRecord`: the persisted form, stamped and attributed.
//! - `AuditLogger`: validates entries, diffs them and enqueues records.
//! - `AuditQueue`: batches records and flushes them to an `AuditLogStore`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rollcall::audit::{AuditEntry, AuditLogger};
//! use rollcall::models::{ActorContext, EntityType};
//!
//! let entry = AuditEntry::update(EntityType::Member, "member-42", before, after);
//! let outcome = logger.log_change(entry, &ActorContext::system());
//! assert!(outcome.queued);
//! ```

mod diff;
mod entry;
mod logger;
mod query;
mod queue;


pub use diff::{compute_diff, format_value, ChangeDiff, FieldChange};
pub use entry::{AuditEntry, AuditLogRecord};
pub use logger::{AuditLogger, LogOutcome};
pub use query::{AuditFilter, SortOrder};
pub use queue::{AuditQueue, DeadLetter, EnqueueOutcome, FlushReport, QueueStats};
