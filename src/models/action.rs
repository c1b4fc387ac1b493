//! Audited actions and the identity of whoever performed them

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// Types of operations that can be audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// Entity was created
    Create,
    /// Entity was updated
    Update,
    /// Entity was deleted
    Delete,
    /// Entity was brought in by a bulk import
    Import,
    /// Entity was rolled back to a prior version
    Restore,
}

impl AuditAction {
    pub const ALL: [AuditAction; 5] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Import,
        AuditAction::Restore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Import => "import",
            AuditAction::Restore => "restore",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == lower)
            .ok_or_else(|| AuditError::Validation(format!("Unknown audit action: {}", s)))
    }
}

/// Who performed a change, as resolved by the session layer
///
/// The engine never looks this up itself; callers pass it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: Option<String>,
    pub actor_email: Option<String>,
    pub actor_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl ActorContext {
    /// An identified actor
    pub fn new(
        actor_id: impl Into<String>,
        actor_email: impl Into<String>,
        actor_role: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            actor_email: Some(actor_email.into()),
            actor_role: actor_role.into(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// The actor used when no session is available
    pub fn system() -> Self {
        Self {
            actor_id: None,
            actor_email: Some("system".to_string()),
            actor_role: "system".to_string(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Attach request metadata
    pub fn with_request(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn is_system(&self) -> bool {
        self.actor_id.is_none()
    }
}

impl Default for ActorContext {
    fn default() -> Self {
        Self::system()
    }
}
