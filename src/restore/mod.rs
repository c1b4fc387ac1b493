//! Point-in-time recovery for rollcall
//!
//! - `RestoreEngine`: restore, preview, undo and version history
//! - `reconstruct_from_log`: rebuilds a version from the audit log when no
//!   snapshot exists
//! - `AccessPolicy`: the authorization seam every operation goes through
//!
//! # Example
//!
//! ```rust,ignore
//! let preview = engine.preview_restore(EntityType::Member, "member-42", 3, &actor)?;
//! println!("{} field(s) will change", preview.changed_fields.len());
//!
//! let outcome = engine.restore(EntityType::Member, "member-42", 3, &actor)?;
//! println!("{}", outcome.summary());
//! ```

mod access;
mod engine;
mod reconstruct;

pub use access::{AccessPolicy, AllowAll, RestoreOperation, RoleAccessPolicy};
pub use engine::{RestoreEngine, RestoreOutcome, RestorePreview, RestoreSource, VersionHistory};
pub use reconstruct::reconstruct_from_log;
