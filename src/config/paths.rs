//! Path management for rollcall
//!
//! ## Path Resolution Order
//!
//! 1. `ROLLCALL_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/rollcall` or `~/.config/rollcall`
//! 3. Windows: `%APPDATA%\rollcall`

use std::path::PathBuf;

use crate::error::AuditError;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "ROLLCALL_DATA_DIR";

/// Manages all paths used by rollcall
#[derive(Debug, Clone)]
pub struct RollcallPaths {
    base_dir: PathBuf,
}

impl RollcallPaths {
    /// Resolve the base directory from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, AuditError> {
        let base_dir = match std::env::var(DATA_DIR_ENV) {
            Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };

        Ok(Self { base_dir })
    }

    /// Use a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Directory holding the audit log and its archives
    pub fn audit_dir(&self) -> PathBuf {
        self.base_dir.join("audit")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.audit_dir().join("audit.log")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.audit_dir().join("archive")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.base_dir.join("snapshots")
    }

    /// Live entity tables (`data/<entity_type>.json`)
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    pub fn deletions_file(&self) -> PathBuf {
        self.base_dir.join("deletions.json")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), AuditError> {
        for (dir, what) in [
            (self.base_dir.clone(), "base"),
            (self.audit_dir(), "audit"),
            (self.snapshot_dir(), "snapshot"),
            (self.data_dir(), "data"),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| AuditError::Io(format!("Failed to create {} directory: {}", what, e)))?;
        }
        Ok(())
    }

    /// Check if a config file has been written
    pub fn is_initialized(&self) -> bool {
        self.config_file().exists()
    }
}

#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, AuditError> {
    let config_base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) => PathBuf::from(xdg),
        Err(_) => {
            let home = std::env::var("HOME")
                .map_err(|_| AuditError::Config("HOME environment variable not set".into()))?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(config_base.join("rollcall"))
}

#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, AuditError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| AuditError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("rollcall"))
}
