//! End-to-end lifecycle tests against on-disk databases.
//!
//! Each test drives a `LifecycleCoordinator` the way an application would:
//! declare a version, open, write, close, and open again under a different
//! declaration.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dbkeeper::{
    ConnectionOptions, CoordinatorOptions, DatabaseDescriptor, DowngradePolicy, FnMigration,
    JournalMode, LifecycleCoordinator, LifecycleError, LifecycleEvent, Migration, MigrationSet,
    RecordingListener, Schema, SchemaManager, SqlMigration, TransitionKind,
};

const NOTES_SQL: &str = "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);";

fn notes_schema() -> Schema {
    Schema::from_sql(NOTES_SQL)
}

fn open(dir: &Path, version: u32, schema: Schema) -> LifecycleCoordinator {
    let descriptor = DatabaseDescriptor::new("notes", version, dir).unwrap();
    LifecycleCoordinator::new(descriptor, schema, CoordinatorOptions::default())
}

fn on_disk_version(keeper: &mut LifecycleCoordinator) -> u32 {
    let handle = keeper.get_primary().unwrap();
    SchemaManager::new(handle.connection().unwrap())
        .version()
        .unwrap()
}

/// Step that appends its target to `log` and adds a marker table
fn logging_step(target: u32, log: &Arc<Mutex<Vec<u32>>>) -> Box<dyn Migration> {
    let log = Arc::clone(log);
    Box::new(FnMigration::new(target, move |conn| {
        log.lock().unwrap().push(target);
        conn.execute_batch(&format!("CREATE TABLE step_{} (id INTEGER);", target))?;
        Ok(())
    }))
}

#[test]
fn reopen_keeps_declared_version() {
    let dir = tempfile::tempdir().unwrap();

    let mut keeper = open(dir.path(), 1, notes_schema());
    assert_eq!(on_disk_version(&mut keeper), 1);
    assert_eq!(keeper.last_transition().unwrap().kind, TransitionKind::Create);
    keeper.close().unwrap();

    let mut keeper = open(dir.path(), 1, notes_schema());
    assert_eq!(on_disk_version(&mut keeper), 1);
    assert_eq!(keeper.last_transition().unwrap().kind, TransitionKind::NoOp);
}

#[test]
fn sparse_migrations_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    open(dir.path(), 1, notes_schema()).get_primary().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let steps = vec![
        logging_step(5, &log),
        logging_step(2, &log),
        logging_step(6, &log),
        logging_step(3, &log),
    ];
    let schema = notes_schema().with_migrations(MigrationSet::new(steps).unwrap());

    let mut keeper = open(dir.path(), 5, schema);
    let handle = keeper.get_primary().unwrap();
    assert!(handle.table_exists("step_5").unwrap());
    assert!(!handle.table_exists("step_6").unwrap());

    assert_eq!(*log.lock().unwrap(), vec![2, 3, 5]);
    let transition = keeper.last_transition().unwrap();
    assert_eq!(transition.kind, TransitionKind::Upgrade);
    assert_eq!(transition.applied, vec![2, 3, 5]);
    assert_eq!(transition.hops, vec![(1, 2), (2, 3), (3, 5)]);
    assert_eq!(on_disk_version(&mut keeper), 5);
}

#[test]
fn failed_step_keeps_last_good_version() {
    let dir = tempfile::tempdir().unwrap();
    open(dir.path(), 1, notes_schema()).get_primary().unwrap();

    let broken = MigrationSet::new(vec![
        Box::new(SqlMigration::new(2, "ALTER TABLE notes ADD COLUMN pinned INTEGER DEFAULT 0;")),
        Box::new(SqlMigration::new(3, "ALTER TABLE missing ADD COLUMN x INTEGER;")),
    ])
    .unwrap();
    let mut keeper = open(dir.path(), 3, notes_schema().with_migrations(broken));
    match keeper.get_primary() {
        Err(LifecycleError::Migration {
            kind,
            from_version,
            to_version,
            ..
        }) => {
            // The error names the hop that failed
            assert_eq!(kind, TransitionKind::Upgrade);
            assert_eq!(from_version, 2);
            assert_eq!(to_version, 3);
        }
        other => panic!("expected migration error, got {:?}", other.map(|h| h.generation())),
    }
    assert!(!keeper.is_primary_open());

    // Resume from v2 with the step fixed
    let fixed = MigrationSet::new(vec![
        Box::new(SqlMigration::new(2, "ALTER TABLE notes ADD COLUMN pinned INTEGER DEFAULT 0;")),
        Box::new(SqlMigration::new(3, "CREATE TABLE tags (name TEXT PRIMARY KEY);")),
    ])
    .unwrap();
    let mut keeper = open(dir.path(), 3, notes_schema().with_migrations(fixed));
    keeper.get_primary().unwrap();
    let transition = keeper.last_transition().unwrap();
    assert_eq!(transition.from_version, 2);
    assert_eq!(transition.hops, vec![(2, 3)]);
}

#[test]
fn downgrade_without_policy_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let options = CoordinatorOptions {
        connection: ConnectionOptions {
            journal_mode: JournalMode::Delete,
            ..Default::default()
        },
        ..Default::default()
    };
    let v3 = DatabaseDescriptor::new("notes", 3, dir.path()).unwrap();
    {
        let mut keeper = LifecycleCoordinator::new(v3.clone(), notes_schema(), options.clone());
        keeper
            .get_primary()
            .unwrap()
            .execute("INSERT INTO notes (body) VALUES ('kept')")
            .unwrap();
        keeper.close().unwrap();
    }
    let path = dir.path().join("notes.db");
    let before = std::fs::read(&path).unwrap();

    let mut keeper = LifecycleCoordinator::new(v3.at_version(1).unwrap(), notes_schema(), options);
    let result = keeper.get_primary().map(|_| ());
    assert!(matches!(
        result,
        Err(LifecycleError::UnsupportedDowngrade { from: 3, to: 1 })
    ));
    keeper.close().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn downgrade_hook_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    open(dir.path(), 3, notes_schema()).get_primary().unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    let schema = notes_schema().with_downgrade(DowngradePolicy::hook(move |_conn, from, to| {
        seen.lock().unwrap().push((from, to));
        Ok(())
    }));

    let recorder = RecordingListener::new();
    let mut keeper = open(dir.path(), 2, schema);
    keeper.set_listener(Some(Box::new(recorder.clone())));
    assert_eq!(on_disk_version(&mut keeper), 2);

    assert_eq!(*calls.lock().unwrap(), vec![(3, 2)]);
    assert_eq!(
        recorder.events(),
        vec![
            LifecycleEvent::Downgrade { from: 3, to: 2 },
            LifecycleEvent::Open
        ]
    );
}

#[test]
fn restore_after_corruption_is_byte_identical_to_backup() {
    let dir = tempfile::tempdir().unwrap();
    let mut keeper = open(dir.path(), 1, notes_schema());
    keeper
        .get_primary()
        .unwrap()
        .execute_batch(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000)
             INSERT INTO notes (body) SELECT printf('note number %d', x) FROM c;",
        )
        .unwrap();

    let manifest = keeper.backup_now().unwrap();
    assert_eq!(manifest.file_name, "temp-notes.db");
    let backup_path = dir.path().join("temp-notes.db");
    let snapshot = std::fs::read(&backup_path).unwrap();
    assert_eq!(snapshot.len() as u64, manifest.size_bytes);

    // Write after the backup, then scribble over the primary
    keeper
        .get_primary()
        .unwrap()
        .execute("INSERT INTO notes (body) VALUES ('lost on restore')")
        .unwrap();
    keeper.close().unwrap();

    let primary_path = dir.path().join("notes.db");
    let mut bytes = std::fs::read(&primary_path).unwrap();
    assert!(bytes.len() > 8192);
    for b in bytes.iter_mut().skip(4096) {
        *b = 0x5A;
    }
    std::fs::write(&primary_path, &bytes).unwrap();

    assert!(!keeper.check_integrity().unwrap());

    keeper.restore_from_backup().unwrap();
    assert!(!keeper.is_primary_open());
    assert_eq!(std::fs::read(&primary_path).unwrap(), snapshot);

    assert!(keeper.check_integrity().unwrap());
    assert_eq!(keeper.get_primary().unwrap().table_count("notes").unwrap(), 1000);
}

#[test]
fn restore_without_backup_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut keeper = open(dir.path(), 1, notes_schema());
    let generation = keeper.get_primary().unwrap().generation();

    assert!(matches!(
        keeper.restore_from_backup(),
        Err(LifecycleError::NoBackupAvailable(_))
    ));
    assert_eq!(keeper.get_primary().unwrap().generation(), generation);
}

#[test]
fn in_memory_restore_is_unsupported_and_writes_nothing() {
    let descriptor = DatabaseDescriptor::in_memory("scratch", 1).unwrap();
    let mut keeper = LifecycleCoordinator::new(descriptor, notes_schema(), CoordinatorOptions::default());
    keeper.get_primary().unwrap();

    assert!(matches!(
        keeper.restore_from_backup(),
        Err(LifecycleError::UnsupportedForInMemory(_))
    ));
    assert!(matches!(
        keeper.backup_now(),
        Err(LifecycleError::UnsupportedForInMemory(_))
    ));
    assert!(keeper.is_primary_open());
    assert!(!Path::new("scratch.db").exists());
    assert!(!Path::new("temp-scratch.db").exists());
    assert_eq!(keeper.backup_manifest().unwrap(), None);
}

#[test]
fn get_primary_twice_returns_cached_handle() {
    let dir = tempfile::tempdir().unwrap();
    let creations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&creations);
    let schema = Schema::new(move |conn| {
        counter.fetch_add(1, Ordering::SeqCst);
        conn.execute_batch(NOTES_SQL)?;
        Ok(())
    });

    let mut keeper = open(dir.path(), 1, schema);
    let first = keeper.get_primary().unwrap().generation();
    let second = keeper.get_primary().unwrap().generation();

    assert_eq!(first, second);
    assert_eq!(creations.load(Ordering::SeqCst), 1);
}

#[test]
fn listener_sees_create_then_each_upgrade_hop() {
    let dir = tempfile::tempdir().unwrap();
    let creations = Arc::new(AtomicUsize::new(0));

    let recorder = RecordingListener::new();
    {
        let counter = Arc::clone(&creations);
        let schema = Schema::new(move |conn| {
            counter.fetch_add(1, Ordering::SeqCst);
            conn.execute_batch(NOTES_SQL)?;
            Ok(())
        });
        let mut keeper = open(dir.path(), 1, schema);
        keeper.set_listener(Some(Box::new(recorder.clone())));
        keeper.get_primary().unwrap();
        keeper.close().unwrap();
    }
    assert_eq!(creations.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.events(), vec![LifecycleEvent::Create, LifecycleEvent::Open]);

    let recorder = RecordingListener::new();
    let migrations = MigrationSet::new(vec![
        Box::new(SqlMigration::new(2, "ALTER TABLE notes ADD COLUMN pinned INTEGER DEFAULT 0;")),
        Box::new(SqlMigration::new(3, "CREATE INDEX idx_notes_pinned ON notes(pinned);")),
    ])
    .unwrap();
    let counter = Arc::clone(&creations);
    let schema = Schema::new(move |conn| {
        counter.fetch_add(1, Ordering::SeqCst);
        conn.execute_batch(NOTES_SQL)?;
        Ok(())
    })
    .with_migrations(migrations);

    let mut keeper = open(dir.path(), 3, schema);
    keeper.set_listener(Some(Box::new(recorder.clone())));
    keeper.get_primary().unwrap();

    assert_eq!(creations.load(Ordering::SeqCst), 1);
    assert_eq!(
        recorder.events(),
        vec![
            LifecycleEvent::Upgrade { from: 1, to: 2 },
            LifecycleEvent::Upgrade { from: 2, to: 3 },
            LifecycleEvent::Open,
        ]
    );
}

#[test]
fn backup_is_created_next_to_primary_and_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut keeper = open(dir.path(), 1, notes_schema());
        keeper
            .get_primary()
            .unwrap()
            .execute("INSERT INTO notes (body) VALUES ('persisted')")
            .unwrap();
        keeper.backup_now().unwrap();
        keeper.close().unwrap();
    }
    assert!(dir.path().join("temp-notes.db").exists());
    assert!(dir.path().join("temp-notes.db.json").exists());

    // A new process finds the populated backup through its manifest
    let mut keeper = open(dir.path(), 1, notes_schema());
    let manifest = keeper.backup_manifest().unwrap().unwrap();
    assert_eq!(manifest.schema_version, 1);

    keeper.restore_from_backup().unwrap();
    assert_eq!(keeper.get_primary().unwrap().table_count("notes").unwrap(), 1);
}

#[test]
fn refused_downgrade_keeps_rollback_journal_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.db");
    {
        // Written outside dbkeeper, so it keeps SQLite's default rollback journal
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);
             INSERT INTO notes (body) VALUES ('from v3');
             PRAGMA user_version = 3;",
        )
        .unwrap();
    }
    let before = std::fs::read(&path).unwrap();

    let mut keeper = open(dir.path(), 1, notes_schema());
    assert!(matches!(
        keeper.get_primary().map(|_| ()),
        Err(LifecycleError::UnsupportedDowngrade { from: 3, to: 1 })
    ));
    keeper.close().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(!dir.path().join("notes.db-wal").exists());
}

#[test]
fn corrupt_header_reads_as_failed_check_then_restores() {
    let dir = tempfile::tempdir().unwrap();
    let mut keeper = open(dir.path(), 1, notes_schema());
    keeper
        .get_primary()
        .unwrap()
        .execute("INSERT INTO notes (body) VALUES ('backed up')")
        .unwrap();
    keeper.backup_now().unwrap();
    keeper.close().unwrap();

    let primary_path = dir.path().join("notes.db");
    let mut bytes = std::fs::read(&primary_path).unwrap();
    for b in bytes.iter_mut().take(100) {
        *b = 0x5A;
    }
    std::fs::write(&primary_path, &bytes).unwrap();

    assert!(!keeper.check_integrity().unwrap());
    let report = keeper.integrity_report().unwrap();
    assert!(!report.ok);
    assert!(!report.details.is_empty());
    assert!(!keeper.is_primary_open());

    keeper.restore_from_backup().unwrap();
    assert!(keeper.check_integrity().unwrap());
    assert_eq!(keeper.get_primary().unwrap().table_count("notes").unwrap(), 1);
}

#[test]
fn failed_capture_keeps_previous_backup_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let mut keeper = open(dir.path(), 1, notes_schema());
    keeper
        .get_primary()
        .unwrap()
        .execute("INSERT INTO notes (body) VALUES ('first capture')")
        .unwrap();
    let first = keeper.backup_now().unwrap();

    let backup_path = dir.path().join("temp-notes.db");
    let manifest_path = dir.path().join("temp-notes.db.json");
    let backup_bytes = std::fs::read(&backup_path).unwrap();
    let manifest_bytes = std::fs::read(&manifest_path).unwrap();

    keeper
        .get_primary()
        .unwrap()
        .execute("INSERT INTO notes (body) VALUES ('never captured')")
        .unwrap();

    // A directory in the way of the temporary copy makes the capture fail
    let blocker = dir.path().join(".temp-notes.db.partial");
    std::fs::create_dir(&blocker).unwrap();

    let err = keeper.backup_now().unwrap_err();
    assert!(matches!(err, LifecycleError::BackupWrite { .. }));
    assert_eq!(err.error_code(), "BACKUP_WRITE_FAILED");

    assert_eq!(std::fs::read(&backup_path).unwrap(), backup_bytes);
    assert_eq!(std::fs::read(&manifest_path).unwrap(), manifest_bytes);
    assert_eq!(keeper.backup_manifest().unwrap(), Some(first));

    // Once the path is clear the next capture goes through
    std::fs::remove_dir(&blocker).unwrap();
    let second = keeper.backup_now().unwrap();
    assert_eq!(keeper.backup_manifest().unwrap(), Some(second));
    keeper.restore_from_backup().unwrap();
    assert_eq!(keeper.get_primary().unwrap().table_count("notes").unwrap(), 2);
}
