//! Database module
//!
//! This module provides all database functionality for dbkeeper, organized into:
//!
//! - **core**: Core database infrastructure (SQLite handles, descriptors, `user_version` bookkeeping)
//! - **lifecycle**: Opening, migrating, checking, backing up and restoring a database
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/             # Foundation
//! │   ├── connection    # SQLite DatabaseHandle wrapper (primary/backup role)
//! │   ├── descriptor    # Name, declared version, location
//! │   ├── schema        # PRAGMA user_version management
//! │   ├── fs            # Atomic copy / write helpers
//! │   └── error         # LifecycleError
//! │
//! └── lifecycle/        # State machines
//!     ├── migration     # MigrationSet, Schema, MigrationRunner
//!     ├── factory       # HandleFactory (open routine)
//!     ├── integrity     # IntegrityChecker
//!     ├── backup        # BackupStore (temp- copy + manifest)
//!     ├── listener      # Single lifecycle listener
//!     └── coordinator   # LifecycleCoordinator
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbkeeper::database::{
//!     CoordinatorOptions, DatabaseDescriptor, LifecycleCoordinator, MigrationSet, Schema,
//!     SqlMigration,
//! };
//!
//! let descriptor = DatabaseDescriptor::new("notes", 2, "~/.dbkeeper")?;
//! let schema = Schema::from_sql("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);")
//!     .with_migrations(MigrationSet::new(vec![Box::new(SqlMigration::new(
//!         2,
//!         "ALTER TABLE notes ADD COLUMN created_at INTEGER;",
//!     ))])?);
//!
//! let mut keeper = LifecycleCoordinator::new(descriptor, schema, CoordinatorOptions::default());
//! keeper.get_primary()?.execute("INSERT INTO notes (body) VALUES ('hello')")?;
//! keeper.backup_now()?;
//!
//! if !keeper.check_integrity()? {
//!     keeper.restore_from_backup()?;
//! }
//! ```

pub mod core;
pub mod lifecycle;

// =============================================================================
// Core Types
// =============================================================================

pub use core::{
    ConnectionOptions, DatabaseDescriptor, DatabaseHandle, JournalMode, LifecycleError,
    LifecycleResult, Role, SchemaManager, SchemaStatus, BACKUP_PREFIX, DEFAULT_EXTENSION,
};

// =============================================================================
// Lifecycle Types
// =============================================================================

pub use lifecycle::{
    BackupManifest, BackupStore, CheckKind, CoordinatorOptions, DowngradePolicy, FnMigration,
    HandleFactory, IntegrityChecker, IntegrityReport, LifecycleCoordinator, LifecycleEvent,
    LifecycleListener, Migration, MigrationRunner, MigrationSet, OpenedHandle, RecordingListener,
    Schema, SqlMigration, Transition, TransitionKind,
};
