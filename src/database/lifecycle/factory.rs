//! Handle factory
//!
//! Turns a descriptor into an open, migrated `DatabaseHandle`. The open
//! routine runs the schema state machine synchronously and hands the
//! resulting [`Transition`] back to the caller, so nothing about the open
//! sequence happens behind the caller's back.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::database::core::{
    fs, ConnectionOptions, DatabaseDescriptor, DatabaseHandle, LifecycleError, LifecycleResult, Role,
    SchemaManager,
};

use super::migration::{MigrationRunner, Transition};

/// A freshly opened handle and the transition its open ran
#[derive(Debug)]
pub struct OpenedHandle {
    pub handle: DatabaseHandle,
    pub transition: Transition,
}

/// Opens handles with a fixed set of connection options
#[derive(Debug, Clone, Default)]
pub struct HandleFactory {
    options: ConnectionOptions,
}

impl HandleFactory {
    pub fn new(options: ConnectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Open a new connection for `descriptor` and bring its schema to the
    /// declared version
    ///
    /// If the database file did not exist before the call and anything fails,
    /// the file is removed again so the directory looks as it did before.
    pub fn open_or_create(
        &self,
        descriptor: &DatabaseDescriptor,
        role: Role,
        runner: &MigrationRunner,
    ) -> LifecycleResult<OpenedHandle> {
        let path = descriptor.file_path();
        let existed = match &path {
            Some(p) => self.prepare_file(descriptor, p)?,
            None => false,
        };
        if let (Some(p), true) = (&path, existed) {
            refuse_downgrade_before_open(p, descriptor, runner)?;
        }

        let result = DatabaseHandle::open(path.as_deref(), role, &self.options).and_then(|mut handle| {
            let run = handle
                .connection()
                .and_then(|conn| runner.run(conn, descriptor.version(), self.options.transactional_migrations));
            match run {
                Ok(transition) => Ok(OpenedHandle { handle, transition }),
                Err(e) => {
                    if let Err(close_err) = handle.close() {
                        warn!(error = %close_err, "Failed to close handle after failed open");
                    }
                    Err(e)
                }
            }
        });

        match result {
            Ok(opened) => {
                info!(
                    database = descriptor.name(),
                    role = %role,
                    transition = %opened.transition.kind,
                    version = descriptor.version(),
                    "Opened database"
                );
                Ok(opened)
            }
            Err(e) => {
                if let (Some(p), false) = (&path, existed) {
                    if let Err(cleanup) = fs::remove_database_files(p) {
                        warn!(path = %p.display(), error = %cleanup, "Failed to remove database after failed open");
                    }
                }
                Err(e)
            }
        }
    }

    /// Return the handle in `slot` if it is still open, otherwise open a new
    /// one into the slot
    ///
    /// The transition is `None` when the cached handle was reused.
    pub fn open_or_reuse<'s>(
        &self,
        slot: &'s mut Option<DatabaseHandle>,
        descriptor: &DatabaseDescriptor,
        role: Role,
        runner: &MigrationRunner,
    ) -> LifecycleResult<(&'s DatabaseHandle, Option<Transition>)> {
        let reusable = slot.as_ref().is_some_and(DatabaseHandle::is_open);

        let transition = if reusable {
            None
        } else {
            if slot.is_some() {
                debug!(database = descriptor.name(), role = %role, "Cached handle was closed, reopening");
            }
            let opened = self.open_or_create(descriptor, role, runner)?;
            *slot = Some(opened.handle);
            Some(opened.transition)
        };

        let handle = slot.as_ref().ok_or(LifecycleError::HandleClosed)?;
        Ok((handle, transition))
    }

    /// Make sure the directory exists and seed the file if needed
    ///
    /// Returns whether the database file existed before this call.
    fn prepare_file(&self, descriptor: &DatabaseDescriptor, path: &Path) -> LifecycleResult<bool> {
        std::fs::create_dir_all(descriptor.directory()).map_err(|e| {
            LifecycleError::open(
                descriptor.directory().display(),
                format!("failed to create storage directory: {}", e),
            )
        })?;

        if path.exists() {
            return Ok(true);
        }

        if let Some(seed) = descriptor.seed() {
            info!(seed = %seed.display(), path = %path.display(), "Seeding database from prepackaged file");
            fs::atomic_copy(seed, path).map_err(|e| {
                LifecycleError::open(path.display(), format!("failed to copy seed '{}': {}", seed.display(), e))
            })?;
        }
        Ok(false)
    }
}

/// Turn away an unsupported downgrade using a read-only connection
///
/// The read-write open sets the journal mode, which rewrites the file header
/// when it differs. A refused downgrade must leave the file as it was, so the
/// version is read first. A file that cannot be read here is left for the
/// regular open to report.
fn refuse_downgrade_before_open(
    path: &Path,
    descriptor: &DatabaseDescriptor,
    runner: &MigrationRunner,
) -> LifecycleResult<()> {
    let on_disk = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(LifecycleError::from)
        .and_then(|conn| {
            let version = SchemaManager::new(&conn).version()?;
            Ok(version)
        });
    match on_disk {
        Ok(version) => runner.check_downgrade(version, descriptor.version()),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not read schema version before open");
            Ok(())
        }
    }
}
