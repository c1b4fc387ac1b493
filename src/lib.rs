//! rollcall - audit trail and point-in-time recovery
//!
//! Tracks every change to member, event and attendance records in an
//! append-only audit log, keeps versioned snapshots of critical entities and
//! restores any entity to an earlier version.
//!
//! # Architecture
//!
//! - `audit`: diff engine, audit records, the batching queue and the producer
//! - `storage`: audit log, snapshot, live entity and deletion stores
//! - `restore`: restore, preview, undo and version history
//! - `compliance`: GDPR anonymization, soft deletion and archival
//! - `audited`: entity writes that are logged and snapshotted
//! - `context`: the application-lifetime owner of all of the above
//! - `config`: paths and `AuditConfig`
//! - `cli`, `display`: the operator command line
//!
//! # Example
//!
//! ```rust,ignore
//! use rollcall::config::{AuditConfig, RollcallPaths};
//! use rollcall::context::AuditContext;
//!
//! let paths = RollcallPaths::new()?;
//! let config = AuditConfig::load_or_create(&paths)?;
//! let ctx = AuditContext::open(paths, config)?;
//!
//! ctx.audited().upsert(EntityType::Member, "member-42", state, &actor)?;
//! ctx.undo_last_change(EntityType::Member, "member-42", &actor).await?;
//! ctx.shutdown().await?;
//! ```

pub mod audit;
pub mod audited;
pub mod cli;
pub mod compliance;
pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod models;
pub mod restore;
pub mod storage;

pub use context::AuditContext;
pub use error::{AuditError, AuditResult};
