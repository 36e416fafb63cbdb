//! Lifecycle coordinator
//!
//! Owns the primary handle and (optionally) the backup store for one
//! descriptor, and ties the open routine, integrity checking, backup capture
//! and restore together. All mutating methods take `&mut self`; a coordinator
//! is meant to be owned by a single writer.

use std::fmt;

use tracing::{debug, info};

use crate::database::core::{
    ConnectionOptions, DatabaseDescriptor, DatabaseHandle, LifecycleError, LifecycleResult, Role,
};

use super::backup::{BackupManifest, BackupStore};
use super::factory::HandleFactory;
use super::integrity::{CheckKind, IntegrityChecker, IntegrityReport};
use super::listener::{notify, LifecycleListener};
use super::migration::{MigrationRunner, Schema, Transition};

/// Knobs for a [`LifecycleCoordinator`]
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub connection: ConnectionOptions,
    pub integrity: CheckKind,
    /// Keep a `temp-` backup next to the primary
    pub backup_enabled: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            integrity: CheckKind::Quick,
            backup_enabled: true,
        }
    }
}

pub struct LifecycleCoordinator {
    descriptor: DatabaseDescriptor,
    factory: HandleFactory,
    runner: MigrationRunner,
    checker: IntegrityChecker,
    primary: Option<DatabaseHandle>,
    backup: Option<BackupStore>,
    listener: Option<Box<dyn LifecycleListener>>,
    last_transition: Option<Transition>,
}

impl LifecycleCoordinator {
    /// Nothing is opened until the first call that needs the primary.
    pub fn new(descriptor: DatabaseDescriptor, schema: Schema, options: CoordinatorOptions) -> Self {
        let backup = options.backup_enabled.then(|| BackupStore::new(&descriptor));
        Self {
            factory: HandleFactory::new(options.connection),
            runner: MigrationRunner::new(schema),
            checker: IntegrityChecker::new(options.integrity),
            primary: None,
            backup,
            listener: None,
            last_transition: None,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &DatabaseDescriptor {
        &self.descriptor
    }

    /// The primary handle, opening and migrating it on first access
    ///
    /// A cached open handle is returned as is. When a new handle is opened the
    /// listener sees the transition before this returns.
    pub fn get_primary(&mut self) -> LifecycleResult<&DatabaseHandle> {
        let Self {
            descriptor,
            factory,
            runner,
            primary,
            listener,
            last_transition,
            ..
        } = self;

        let (handle, transition) = factory.open_or_reuse(primary, descriptor, Role::Primary, runner)?;
        if let Some(transition) = transition {
            if let Some(listener) = listener.as_deref_mut() {
                notify(listener, handle, &transition);
            }
            *last_transition = Some(transition);
        }
        Ok(handle)
    }

    pub fn is_primary_open(&self) -> bool {
        self.primary.as_ref().is_some_and(DatabaseHandle::is_open)
    }

    /// Transition run by the most recent primary open
    pub fn last_transition(&self) -> Option<&Transition> {
        self.last_transition.as_ref()
    }

    /// Run the configured integrity check against the primary
    ///
    /// A `false` result is advisory; nothing is restored automatically.
    pub fn check_integrity(&mut self) -> LifecycleResult<bool> {
        Ok(self.integrity_report()?.ok)
    }

    /// Like [`check_integrity`](Self::check_integrity) but keeps the output
    ///
    /// A primary that SQLite refuses to open as corrupt yields a failed
    /// report. Any other failure to open it is an `IntegrityCheck` error.
    pub fn integrity_report(&mut self) -> LifecycleResult<IntegrityReport> {
        let checker = self.checker;
        match self.get_primary() {
            Ok(handle) => checker.report(handle),
            Err(e) if e.is_corruption() => Ok(checker.unopenable(&e)),
            Err(e) => Err(LifecycleError::IntegrityCheck(format!("could not open primary: {}", e))),
        }
    }

    /// The backup handle, creating the backup database if needed
    pub fn ensure_backup(&mut self) -> LifecycleResult<&DatabaseHandle> {
        self.reject_in_memory("backup")?;
        let Self {
            descriptor,
            factory,
            runner,
            backup,
            ..
        } = self;
        let store = backup
            .as_mut()
            .ok_or_else(|| LifecycleError::NoBackupConfigured(descriptor.name().to_string()))?;
        store.ensure_created(factory, runner)
    }

    /// Overwrite the backup with the primary's current contents
    pub fn backup_now(&mut self) -> LifecycleResult<BackupManifest> {
        self.reject_in_memory("backup")?;
        if self.backup.is_none() {
            return Err(LifecycleError::NoBackupConfigured(self.descriptor.name().to_string()));
        }
        self.get_primary()?;

        let Self {
            descriptor,
            factory,
            runner,
            primary,
            backup,
            ..
        } = self;
        let primary = primary.as_ref().ok_or(LifecycleError::HandleClosed)?;
        let store = backup
            .as_mut()
            .ok_or_else(|| LifecycleError::NoBackupConfigured(descriptor.name().to_string()))?;
        store.capture_from(primary, factory, runner)
    }

    /// Replace the primary file with the last captured backup
    ///
    /// The primary is closed; the next [`get_primary`](Self::get_primary)
    /// reopens the restored file and runs the state machine against it.
    pub fn restore_from_backup(&mut self) -> LifecycleResult<()> {
        self.reject_in_memory("restore")?;
        let Self {
            descriptor,
            primary,
            backup,
            ..
        } = self;
        let store = backup
            .as_mut()
            .ok_or_else(|| LifecycleError::NoBackupConfigured(descriptor.name().to_string()))?;

        store.restore_into(primary, descriptor)?;
        info!(database = descriptor.name(), "Primary closed after restore, next access reopens it");
        Ok(())
    }

    /// Manifest of the last capture; `None` when never captured or backups are disabled
    pub fn backup_manifest(&self) -> LifecycleResult<Option<BackupManifest>> {
        match &self.backup {
            Some(store) => store.manifest(),
            None => Ok(None),
        }
    }

    /// Replace the listener; the previous one is dropped
    pub fn set_listener(&mut self, listener: Option<Box<dyn LifecycleListener>>) {
        self.listener = listener;
    }

    /// Close the primary and backup handles. Safe to call repeatedly.
    pub fn close(&mut self) -> LifecycleResult<()> {
        if let Some(mut handle) = self.primary.take() {
            if let Err(e) = handle.close() {
                self.primary = Some(handle);
                return Err(e);
            }
            debug!(database = self.descriptor.name(), "Closed primary handle");
        }
        if let Some(store) = self.backup.as_mut() {
            store.close()?;
        }
        Ok(())
    }

    fn reject_in_memory(&self, operation: &'static str) -> LifecycleResult<()> {
        if self.descriptor.is_in_memory() {
            return Err(LifecycleError::UnsupportedForInMemory(operation));
        }
        Ok(())
    }
}

impl fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("descriptor", &self.descriptor)
            .field("primary_open", &self.is_primary_open())
            .field("backup", &self.backup)
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::lifecycle::listener::{LifecycleEvent, RecordingListener};
    use crate::database::lifecycle::migration::TransitionKind;

    fn schema() -> Schema {
        Schema::from_sql("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT);")
    }

    #[test]
    fn test_lazy_open() {
        let descriptor = DatabaseDescriptor::in_memory("kv", 1).unwrap();
        let mut coordinator = LifecycleCoordinator::new(descriptor, schema(), CoordinatorOptions::default());
        assert!(!coordinator.is_primary_open());
        assert!(coordinator.last_transition().is_none());

        coordinator.get_primary().unwrap();
        assert!(coordinator.is_primary_open());
        assert_eq!(coordinator.last_transition().unwrap().kind, TransitionKind::Create);
    }

    #[test]
    fn test_backup_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = DatabaseDescriptor::new("kv", 1, dir.path()).unwrap();
        let options = CoordinatorOptions {
            backup_enabled: false,
            ..Default::default()
        };
        let mut coordinator = LifecycleCoordinator::new(descriptor, schema(), options);

        assert!(matches!(
            coordinator.backup_now(),
            Err(LifecycleError::NoBackupConfigured(_))
        ));
        assert!(matches!(
            coordinator.restore_from_backup(),
            Err(LifecycleError::NoBackupConfigured(_))
        ));
        assert_eq!(coordinator.backup_manifest().unwrap(), None);
    }

    #[test]
    fn test_in_memory_checked_before_backup_config() {
        let descriptor = DatabaseDescriptor::in_memory("kv", 1).unwrap();
        let options = CoordinatorOptions {
            backup_enabled: false,
            ..Default::default()
        };
        let mut coordinator = LifecycleCoordinator::new(descriptor, schema(), options);
        assert!(matches!(
            coordinator.restore_from_backup(),
            Err(LifecycleError::UnsupportedForInMemory("restore"))
        ));
    }

    #[test]
    fn test_replaced_listener_sees_nothing() {
        let descriptor = DatabaseDescriptor::in_memory("kv", 1).unwrap();
        let mut coordinator = LifecycleCoordinator::new(descriptor, schema(), CoordinatorOptions::default());

        let old = RecordingListener::new();
        let new = RecordingListener::new();
        coordinator.set_listener(Some(Box::new(old.clone())));
        coordinator.set_listener(Some(Box::new(new.clone())));
        coordinator.get_primary().unwrap();

        assert!(old.events().is_empty());
        assert_eq!(new.events(), vec![LifecycleEvent::Create, LifecycleEvent::Open]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = DatabaseDescriptor::new("kv", 1, dir.path()).unwrap();
        let mut coordinator = LifecycleCoordinator::new(descriptor, schema(), CoordinatorOptions::default());

        coordinator.get_primary().unwrap();
        coordinator.ensure_backup().unwrap();
        coordinator.close().unwrap();
        coordinator.close().unwrap();
        assert!(!coordinator.is_primary_open());
    }

    #[test]
    fn test_integrity_on_fresh_primary() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = DatabaseDescriptor::new("kv", 1, dir.path()).unwrap();
        let mut coordinator = LifecycleCoordinator::new(descriptor, schema(), CoordinatorOptions::default());

        assert!(coordinator.check_integrity().unwrap());
        let report = coordinator.integrity_report().unwrap();
        assert_eq!(report.kind, CheckKind::Quick);
        assert!(report.ok);
    }
}
