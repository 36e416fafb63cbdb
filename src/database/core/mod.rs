//! Core database infrastructure
//!
//! This module provides the foundational database components used by the lifecycle layer:
//! - `DatabaseHandle`: SQLite connection wrapper with an explicit open/closed state
//! - `DatabaseDescriptor`: identity, declared version and location of a database
//! - `SchemaManager`: `user_version` bookkeeping
//! - `LifecycleError`: the error type shared by every operation

mod connection;
mod descriptor;
mod error;
pub mod fs;
mod schema;

pub use connection::{ConnectionOptions, DatabaseHandle, JournalMode, Role};
pub use descriptor::{DatabaseDescriptor, BACKUP_PREFIX, DEFAULT_EXTENSION};
pub use error::{BoxedCause, LifecycleError, LifecycleResult};
pub(crate) use error::is_corruption_code;
pub use schema::{SchemaManager, SchemaStatus};
