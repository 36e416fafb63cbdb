//! Backup store
//!
//! One backup file per primary database, living next to it as
//! `temp-<file name>`. A JSON manifest beside the backup file records the last
//! successful capture; a backup without a manifest is treated as empty.
//!
//! Both capture and restore move whole files with an atomic copy
//! (temp file, fsync, rename), so the destination is either the old bytes or
//! the new bytes, never a mix.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::core::{
    fs, DatabaseDescriptor, DatabaseHandle, LifecycleError, LifecycleResult, Role, SchemaManager,
};

use super::factory::HandleFactory;
use super::migration::MigrationRunner;

const MANIFEST_EXTENSION: &str = "json";

/// Record of the last successful capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// File name of the database that was captured
    pub source: String,
    /// File name of the backup copy
    pub file_name: String,
    pub schema_version: u32,
    pub size_bytes: u64,
    pub captured_at: DateTime<Utc>,
}

/// Secondary copy of a primary database
#[derive(Debug)]
pub struct BackupStore {
    descriptor: DatabaseDescriptor,
    handle: Option<DatabaseHandle>,
}

impl BackupStore {
    /// Backup store for `primary`; nothing is touched on disk until first use
    pub fn new(primary: &DatabaseDescriptor) -> Self {
        Self {
            descriptor: primary.backup_descriptor(),
            handle: None,
        }
    }

    pub fn descriptor(&self) -> &DatabaseDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.descriptor.file_path()
    }

    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.path().map(|p| manifest_path_for(&p))
    }

    pub fn is_open(&self) -> bool {
        self.handle.as_ref().is_some_and(DatabaseHandle::is_open)
    }

    /// Open (creating if needed) the backup database under the backup role
    ///
    /// The backup is migrated with the same runner as the primary but never
    /// reports transitions to a listener.
    pub fn ensure_created(
        &mut self,
        factory: &HandleFactory,
        runner: &MigrationRunner,
    ) -> LifecycleResult<&DatabaseHandle> {
        if self.descriptor.is_in_memory() {
            return Err(LifecycleError::UnsupportedForInMemory("backup"));
        }
        let (handle, _) = factory.open_or_reuse(&mut self.handle, &self.descriptor, Role::Backup, runner)?;
        Ok(handle)
    }

    /// Copy the primary's current contents into the backup file
    ///
    /// The primary stays open. Its WAL is checkpointed first so the main file
    /// holds every committed page. The backup handle is reopened afterwards.
    pub fn capture_from(
        &mut self,
        primary: &DatabaseHandle,
        factory: &HandleFactory,
        runner: &MigrationRunner,
    ) -> LifecycleResult<BackupManifest> {
        if self.descriptor.is_in_memory() {
            return Err(LifecycleError::UnsupportedForInMemory("backup"));
        }
        let (source, dest) = match (primary.path(), self.path()) {
            (Some(source), Some(dest)) => (source.to_path_buf(), dest),
            _ => return Err(LifecycleError::UnsupportedForInMemory("backup")),
        };

        let schema_version = SchemaManager::new(primary.connection()?).version()?;
        primary
            .checkpoint()
            .map_err(|e| LifecycleError::backup_write(&dest, format!("checkpoint of primary failed: {}", e)))?;

        self.close()?;
        let size_bytes = fs::atomic_copy(&source, &dest).map_err(|e| LifecycleError::backup_write(&dest, e))?;

        let manifest = BackupManifest {
            source: file_name_of(&source),
            file_name: file_name_of(&dest),
            schema_version,
            size_bytes,
            captured_at: Utc::now(),
        };
        let manifest_path = manifest_path_for(&dest);
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| LifecycleError::backup_write(&manifest_path, e))?;
        fs::atomic_write(&manifest_path, &json).map_err(|e| LifecycleError::backup_write(&manifest_path, e))?;

        info!(
            backup = %dest.display(),
            version = schema_version,
            size_bytes,
            "Captured backup"
        );

        self.ensure_created(factory, runner)?;
        Ok(manifest)
    }

    /// Replace the primary database file with the backup contents
    ///
    /// The primary handle in `primary_slot` is closed and the slot left empty;
    /// the next open of the primary sees the restored bytes.
    pub fn restore_into(
        &mut self,
        primary_slot: &mut Option<DatabaseHandle>,
        primary: &DatabaseDescriptor,
    ) -> LifecycleResult<()> {
        if self.descriptor.is_in_memory() || primary.is_in_memory() {
            return Err(LifecycleError::UnsupportedForInMemory("restore"));
        }
        let (source, dest) = match (self.path(), primary.file_path()) {
            (Some(source), Some(dest)) => (source, dest),
            _ => return Err(LifecycleError::UnsupportedForInMemory("restore")),
        };
        if !self.is_populated() {
            return Err(LifecycleError::NoBackupAvailable(source));
        }

        if let Some(handle) = primary_slot.as_mut() {
            handle.close()?;
        }
        *primary_slot = None;
        self.close()?;

        fs::atomic_copy(&source, &dest).map_err(|e| LifecycleError::backup_write(&dest, e))?;
        info!(backup = %source.display(), primary = %dest.display(), "Restored primary from backup");
        Ok(())
    }

    /// Whether a completed capture is on disk
    pub fn is_populated(&self) -> bool {
        match (self.path(), self.manifest_path()) {
            (Some(db), Some(manifest)) => db.exists() && manifest.exists(),
            _ => false,
        }
    }

    /// Manifest of the last capture, if any
    pub fn manifest(&self) -> LifecycleResult<Option<BackupManifest>> {
        let Some(path) = self.manifest_path() else {
            return Ok(None);
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LifecycleError::BackupManifest {
                    path,
                    message: e.to_string(),
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LifecycleError::BackupManifest {
                path,
                message: e.to_string(),
            })
    }

    pub fn close(&mut self) -> LifecycleResult<()> {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.close() {
                warn!(error = %e, "Failed to close backup handle");
                self.handle = Some(handle);
                return Err(e);
            }
        }
        Ok(())
    }
}

fn manifest_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(MANIFEST_EXTENSION);
    db_path.with_file_name(name)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::lifecycle::migration::Schema;

    fn runner() -> MigrationRunner {
        MigrationRunner::new(Schema::from_sql(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);",
        ))
    }

    #[test]
    fn test_manifest_path() {
        assert_eq!(
            manifest_path_for(Path::new("/data/temp-notes.db")),
            PathBuf::from("/data/temp-notes.db.json")
        );
    }

    #[test]
    fn test_in_memory_is_unsupported() {
        let primary = DatabaseDescriptor::in_memory("notes", 1).unwrap();
        let mut store = BackupStore::new(&primary);
        let factory = HandleFactory::default();

        let result = store.ensure_created(&factory, &runner());
        assert!(matches!(result, Err(LifecycleError::UnsupportedForInMemory(_))));

        let mut slot = None;
        let result = store.restore_into(&mut slot, &primary);
        assert!(matches!(result, Err(LifecycleError::UnsupportedForInMemory(_))));
    }

    #[test]
    fn test_restore_without_capture_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let primary = DatabaseDescriptor::new("notes", 1, dir.path()).unwrap();
        let factory = HandleFactory::default();
        let runner = runner();
        let mut store = BackupStore::new(&primary);

        // Backup file exists but was never populated by a capture
        store.ensure_created(&factory, &runner).unwrap();
        assert!(dir.path().join("temp-notes.db").exists());
        assert!(!store.is_populated());

        let mut slot = None;
        let result = store.restore_into(&mut slot, &primary);
        assert!(matches!(result, Err(LifecycleError::NoBackupAvailable(_))));
    }

    #[test]
    fn test_capture_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let primary = DatabaseDescriptor::new("notes", 1, dir.path()).unwrap();
        let factory = HandleFactory::default();
        let runner = runner();
        let mut store = BackupStore::new(&primary);

        let mut slot = None;
        {
            let (handle, _) = factory
                .open_or_reuse(&mut slot, &primary, Role::Primary, &runner)
                .unwrap();
            handle
                .execute("INSERT INTO notes (body) VALUES ('before backup')")
                .unwrap();
        }

        let manifest = store
            .capture_from(slot.as_ref().unwrap(), &factory, &runner)
            .unwrap();
        assert_eq!(manifest.file_name, "temp-notes.db");
        assert_eq!(manifest.source, "notes.db");
        assert_eq!(manifest.schema_version, 1);
        assert!(manifest.size_bytes > 0);
        assert_eq!(store.manifest().unwrap(), Some(manifest));
        assert!(store.is_open());

        slot.as_ref()
            .unwrap()
            .execute("INSERT INTO notes (body) VALUES ('after backup')")
            .unwrap();

        store.restore_into(&mut slot, &primary).unwrap();
        assert!(slot.is_none());
        assert!(!store.is_open());

        let (handle, _) = factory
            .open_or_reuse(&mut slot, &primary, Role::Primary, &runner)
            .unwrap();
        assert_eq!(handle.table_count("notes").unwrap(), 1);
    }
}
