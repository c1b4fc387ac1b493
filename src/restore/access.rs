//! Authorization seam for restore operations

use std::fmt;

use crate::error::{AuditError, AuditResult};
use crate::models::ActorContext;

/// Restore-side operations subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOperation {
    Restore,
    Preview,
    Undo,
    History,
}

impl fmt::Display for RestoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreOperation::Restore => "restore",
            RestoreOperation::Preview => "preview",
            RestoreOperation::Undo => "undo",
            RestoreOperation::History => "version history",
        };
        f.write_str(name)
    }
}

/// Decides whether an actor may perform a restore operation
pub trait AccessPolicy: Send + Sync + fmt::Debug {
    fn authorize(&self, operation: RestoreOperation, actor: &ActorContext) -> AuditResult<()>;
}

/// Role-based policy
///
/// Restore, preview and history need a privileged role. Undo needs an
/// identified actor.
#[derive(Debug, Clone)]
pub struct RoleAccessPolicy {
    privileged_roles: Vec<String>,
}

impl Default for RoleAccessPolicy {
    fn default() -> Self {
        Self::new(["admin", "developer"])
    }
}

impl RoleAccessPolicy {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            privileged_roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    fn is_privileged(&self, role: &str) -> bool {
        self.privileged_roles
            .iter()
            .any(|r| r.eq_ignore_ascii_case(role))
    }
}

impl AccessPolicy for RoleAccessPolicy {
    fn authorize(&self, operation: RestoreOperation, actor: &ActorContext) -> AuditResult<()> {
        match operation {
            RestoreOperation::Undo => {
                if actor.actor_id.is_none() {
                    return Err(AuditError::PermissionDenied(
                        "undo requires an identified user".into(),
                    ));
                }
            }
            _ => {
                if !self.is_privileged(&actor.actor_role) {
                    return Err(AuditError::PermissionDenied(format!(
                        "{} requires one of the roles: {}",
                        operation,
                        self.privileged_roles.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Policy that permits everything, for embedding behind an external check
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self, _operation: RestoreOperation, _actor: &ActorContext) -> AuditResult<()> {
        Ok(())
    }
}
