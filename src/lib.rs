#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! dbkeeper - SQLite database lifecycle manager
//!
//! dbkeeper owns a primary SQLite database and keeps it usable: it creates
//! the schema on first open, upgrades (or refuses to downgrade) it on later
//! opens, checks it for corruption, and keeps a `temp-` backup copy that can
//! be swapped in atomically when the primary goes bad. It can be used as both
//! a command-line application and a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none)  | Library: lifecycle, config, database info | `rusqlite`, `config` |
//! | `cli`   | The `dbkeeper` binary | `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! dbkeeper = { version = "0.1", default-features = false }
//!
//! # Default (CLI binary)
//! dbkeeper = "0.1"
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: All database functionality
//!   - `core`: SQLite handles, descriptors, `user_version` bookkeeping, errors
//!   - `lifecycle`: handle factory, migration runner, integrity checker,
//!     backup store and the coordinator tying them together
//!
//! - **[`config`]**: Configuration management and database status reporting
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dbkeeper::{
//!     CoordinatorOptions, DatabaseDescriptor, LifecycleCoordinator, MigrationSet, Schema,
//!     SqlMigration,
//! };
//!
//! let schema = Schema::from_sql("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);")
//!     .with_migrations(MigrationSet::new(vec![
//!         Box::new(SqlMigration::new(2, "ALTER TABLE notes ADD COLUMN pinned INTEGER DEFAULT 0;")),
//!     ])?);
//!
//! let descriptor = DatabaseDescriptor::new("notes", 2, "/var/lib/notes")?;
//! let mut keeper = LifecycleCoordinator::new(descriptor, schema, CoordinatorOptions::default());
//!
//! let handle = keeper.get_primary()?;
//! handle.execute("INSERT INTO notes (body) VALUES ('first')")?;
//!
//! keeper.backup_now()?;
//! if !keeper.check_integrity()? {
//!     keeper.restore_from_backup()?;
//! }
//! ```

pub mod config;
pub mod database;

// =============================================================================
// Configuration
// =============================================================================

pub use config::KeeperConfig;

pub use config::{format_size, get_database_info, DatabaseInfo, DatabaseStatus};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

// Core database types
pub use database::{
    ConnectionOptions, DatabaseDescriptor, DatabaseHandle, JournalMode, LifecycleError,
    LifecycleResult, Role, SchemaManager, SchemaStatus,
};

// Lifecycle
pub use database::{
    BackupManifest, BackupStore, CheckKind, CoordinatorOptions, DowngradePolicy, FnMigration,
    HandleFactory, IntegrityChecker, IntegrityReport, LifecycleCoordinator, LifecycleEvent,
    LifecycleListener, Migration, MigrationRunner, MigrationSet, OpenedHandle, RecordingListener,
    Schema, SqlMigration, Transition, TransitionKind,
};
