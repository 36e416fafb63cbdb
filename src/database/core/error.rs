//! Lifecycle error types.
//! One error enum covering handle, migration, integrity and backup operations.

use std::path::PathBuf;

use rusqlite::ErrorCode;

use crate::database::lifecycle::TransitionKind;

/// Boxed cause carried by failures that originate in schema-owner code.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    // Descriptor / schema input
    #[error("Invalid database descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid migration set: {0}")]
    InvalidMigrationSet(String),

    // Opening
    #[error("Failed to open database at {path}: {message}")]
    Open {
        path: String,
        message: String,
        /// SQLite result code when SQLite itself refused the file
        code: Option<ErrorCode>,
    },

    #[error("Database handle is closed")]
    HandleClosed,

    // Integrity
    #[error("Integrity check could not run: {0}")]
    IntegrityCheck(String),

    // Migration
    #[error("{kind} migration from v{from_version} to v{to_version} failed: {cause}")]
    Migration {
        kind: TransitionKind,
        from_version: u32,
        to_version: u32,
        #[source]
        cause: BoxedCause,
    },

    #[error("Downgrade from v{from} to v{to} is not supported without a downgrade policy")]
    UnsupportedDowngrade { from: u32, to: u32 },

    // Backup
    #[error("Failed to write backup {path}: {message}")]
    BackupWrite { path: PathBuf, message: String },

    #[error("Operation '{0}' is not supported for in-memory databases")]
    UnsupportedForInMemory(&'static str),

    #[error("No backup store is configured for database '{0}'")]
    NoBackupConfigured(String),

    #[error("No populated backup found at {0}")]
    NoBackupAvailable(PathBuf),

    #[error("Unreadable backup manifest {path}: {message}")]
    BackupManifest { path: PathBuf, message: String },

    // Storage
    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl LifecycleError {
    /// Stable, machine-readable code for each variant.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidDescriptor(_) => "INVALID_DESCRIPTOR",
            Self::InvalidMigrationSet(_) => "INVALID_MIGRATION_SET",
            Self::Open { .. } => "OPEN_FAILED",
            Self::HandleClosed => "HANDLE_CLOSED",
            Self::IntegrityCheck(_) => "INTEGRITY_CHECK_FAILED",
            Self::Migration { .. } => "MIGRATION_FAILED",
            Self::UnsupportedDowngrade { .. } => "UNSUPPORTED_DOWNGRADE",
            Self::BackupWrite { .. } => "BACKUP_WRITE_FAILED",
            Self::UnsupportedForInMemory(_) => "UNSUPPORTED_FOR_IN_MEMORY",
            Self::NoBackupConfigured(_) => "NO_BACKUP_CONFIGURED",
            Self::NoBackupAvailable(_) => "NO_BACKUP_AVAILABLE",
            Self::BackupManifest { .. } => "BACKUP_MANIFEST_INVALID",
            Self::Sqlite(_) => "STORAGE_ERROR",
        }
    }

    /// Whether SQLite reported the file as corrupt or not a database
    pub fn is_corruption(&self) -> bool {
        let code = match self {
            Self::Open { code, .. } => *code,
            Self::Sqlite(e) => e.sqlite_error_code(),
            _ => None,
        };
        is_corruption_code(code)
    }

    pub(crate) fn open(path: impl std::fmt::Display, message: impl std::fmt::Display) -> Self {
        Self::Open {
            path: path.to_string(),
            message: message.to_string(),
            code: None,
        }
    }

    pub(crate) fn open_sqlite(path: impl std::fmt::Display, context: &str, e: rusqlite::Error) -> Self {
        Self::Open {
            path: path.to_string(),
            message: format!("{}: {}", context, e),
            code: e.sqlite_error_code(),
        }
    }

    pub(crate) fn backup_write(path: &std::path::Path, message: impl std::fmt::Display) -> Self {
        Self::BackupWrite {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

pub(crate) fn is_corruption_code(code: Option<ErrorCode>) -> bool {
    matches!(code, Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase))
}
