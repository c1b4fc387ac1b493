//! Data-protection support for rollcall
//!
//! Anonymization of historical records, time-boxed soft deletion and
//! archival of records past the retention window. The module sits on top
//! of the stores and can be switched off without touching the audit core.

mod manager;

pub use manager::{
    ActorSummary, ComplianceManager, PendingDeletion, PurgeReport, ESTIMATED_RECORD_BYTES,
};
