//! Database lifecycle
//!
//! The pieces that take a descriptor from "nothing on disk" to an open,
//! migrated handle and keep it recoverable:
//! - `HandleFactory`: opens handles and runs the schema state machine
//! - `MigrationRunner`: Create / Upgrade / Downgrade / NoOp keyed on `user_version`
//! - `IntegrityChecker`: `quick_check` / `integrity_check`
//! - `BackupStore`: the `temp-` copy and its manifest
//! - `LifecycleCoordinator`: owns all of the above for one database

mod backup;
mod coordinator;
mod factory;
mod integrity;
mod listener;
mod migration;

pub use backup::{BackupManifest, BackupStore};
pub use coordinator::{CoordinatorOptions, LifecycleCoordinator};
pub use factory::{HandleFactory, OpenedHandle};
pub use integrity::{CheckKind, IntegrityChecker, IntegrityReport};
pub use listener::{LifecycleEvent, LifecycleListener, RecordingListener};
pub use migration::{
    DowngradePolicy, FnMigration, Migration, MigrationRunner, MigrationSet, Schema, SqlMigration,
    Transition, TransitionKind,
};
