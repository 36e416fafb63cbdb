//! Schema creation and migration
//!
//! The schema owner supplies a [`Schema`]: a creation routine, an ordered
//! [`MigrationSet`] and a [`DowngradePolicy`]. [`MigrationRunner`] compares
//! the on-disk `user_version` with the declared version and runs exactly one
//! of four transitions:
//!
//! | on disk            | transition  | what runs                                      |
//! |--------------------|-------------|------------------------------------------------|
//! | `0`                | `Create`    | creation routine, then fresh-install steps      |
//! | `< declared`       | `Upgrade`   | every step with target in `(on disk, declared]` |
//! | `> declared`       | `Downgrade` | the downgrade policy                            |
//! | `== declared`      | `NoOp`      | nothing                                         |
//!
//! Steps are sparse: a version without a registered step is skipped.

use std::fmt;
use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::database::core::{LifecycleError, LifecycleResult, SchemaManager, SchemaStatus};

/// One versioned schema transformation
pub trait Migration: Send + Sync {
    /// Version the schema is at once this step has been applied
    fn target_version(&self) -> u32;

    fn apply(&self, conn: &Connection) -> anyhow::Result<()>;

    /// Also run this step right after the creation routine on a brand-new file
    fn on_fresh_install(&self) -> bool {
        false
    }

    fn description(&self) -> &str {
        ""
    }
}

/// Migration step given as a SQL script
#[derive(Debug, Clone)]
pub struct SqlMigration {
    target: u32,
    sql: String,
    description: String,
    fresh_install: bool,
}

impl SqlMigration {
    pub fn new(target: u32, sql: &str) -> Self {
        Self {
            target,
            sql: sql.to_string(),
            description: String::new(),
            fresh_install: false,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Mark this step to run on fresh installs as well
    pub fn on_fresh_install(mut self) -> Self {
        self.fresh_install = true;
        self
    }
}

impl Migration for SqlMigration {
    fn target_version(&self) -> u32 {
        self.target
    }

    fn apply(&self, conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(&self.sql)?;
        Ok(())
    }

    fn on_fresh_install(&self) -> bool {
        self.fresh_install
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Migration step given as a closure
pub struct FnMigration<F> {
    target: u32,
    apply: F,
    fresh_install: bool,
}

impl<F> FnMigration<F>
where
    F: Fn(&Connection) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(target: u32, apply: F) -> Self {
        Self {
            target,
            apply,
            fresh_install: false,
        }
    }

    pub fn on_fresh_install(mut self) -> Self {
        self.fresh_install = true;
        self
    }
}

impl<F> Migration for FnMigration<F>
where
    F: Fn(&Connection) -> anyhow::Result<()> + Send + Sync,
{
    fn target_version(&self) -> u32 {
        self.target
    }

    fn apply(&self, conn: &Connection) -> anyhow::Result<()> {
        (self.apply)(conn)
    }

    fn on_fresh_install(&self) -> bool {
        self.fresh_install
    }
}

/// Migration steps sorted by strictly increasing target version
#[derive(Default)]
pub struct MigrationSet {
    steps: Vec<Box<dyn Migration>>,
}

impl fmt::Debug for MigrationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationSet")
            .field("targets", &self.targets())
            .finish()
    }
}

impl MigrationSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set from unordered steps
    ///
    /// Fails when a step targets version 0 or two steps share a target.
    pub fn new(mut steps: Vec<Box<dyn Migration>>) -> LifecycleResult<Self> {
        steps.sort_by_key(|step| step.target_version());

        if let Some(first) = steps.first() {
            if first.target_version() == 0 {
                return Err(LifecycleError::InvalidMigrationSet(
                    "migration target version must be positive".to_string(),
                ));
            }
        }
        for pair in steps.windows(2) {
            if pair[0].target_version() == pair[1].target_version() {
                return Err(LifecycleError::InvalidMigrationSet(format!(
                    "duplicate migration target version {}",
                    pair[0].target_version()
                )));
            }
        }

        Ok(Self { steps })
    }

    /// Load `NNNN_description.sql` files from a directory
    ///
    /// The leading number of each file name is the target version; files that
    /// do not end in `.sql` are ignored.
    pub fn from_sql_dir(dir: &Path) -> LifecycleResult<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            LifecycleError::InvalidMigrationSet(format!(
                "failed to read migrations directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut steps: Vec<Box<dyn Migration>> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let (target, description) = parse_migration_file_name(&stem).ok_or_else(|| {
                LifecycleError::InvalidMigrationSet(format!(
                    "migration file '{}' does not start with a version number",
                    path.display()
                ))
            })?;
            let sql = std::fs::read_to_string(&path).map_err(|e| {
                LifecycleError::InvalidMigrationSet(format!(
                    "failed to read migration file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            steps.push(Box::new(
                SqlMigration::new(target, &sql).with_description(description),
            ));
        }

        Self::new(steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Target versions in ascending order
    pub fn targets(&self) -> Vec<u32> {
        self.steps.iter().map(|s| s.target_version()).collect()
    }

    /// Steps with a target in `(from, to]`, ascending
    pub fn between(&self, from: u32, to: u32) -> impl Iterator<Item = &dyn Migration> {
        self.steps
            .iter()
            .map(|s| s.as_ref() as &dyn Migration)
            .filter(move |s| s.target_version() > from && s.target_version() <= to)
    }

    /// Steps marked for fresh installs with a target `<= to`, ascending
    pub fn fresh_install(&self, to: u32) -> impl Iterator<Item = &dyn Migration> {
        self.steps
            .iter()
            .map(|s| s.as_ref() as &dyn Migration)
            .filter(move |s| s.on_fresh_install() && s.target_version() <= to)
    }
}

fn parse_migration_file_name(stem: &str) -> Option<(u32, &str)> {
    let digits_end = stem
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(stem.len());
    let target: u32 = stem[..digits_end].parse().ok()?;
    let description = stem[digits_end..].trim_start_matches(['_', '-', ' ']);
    Some((target, description))
}

type CreateFn = Box<dyn Fn(&Connection) -> anyhow::Result<()> + Send + Sync>;
type DowngradeFn = Box<dyn Fn(&Connection, u32, u32) -> anyhow::Result<()> + Send + Sync>;

/// What happens when the file on disk is newer than the declared version
#[derive(Default)]
pub enum DowngradePolicy {
    /// Refuse with `UnsupportedDowngrade`, leaving the file untouched
    #[default]
    Fail,
    /// Drop every user object and run the creation routine again (destroys data)
    Recreate,
    /// Call the hook with `(conn, on_disk_version, declared_version)`
    Hook(DowngradeFn),
}

impl DowngradePolicy {
    pub fn hook<F>(f: F) -> Self
    where
        F: Fn(&Connection, u32, u32) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        DowngradePolicy::Hook(Box::new(f))
    }
}

impl fmt::Debug for DowngradePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DowngradePolicy::Fail => write!(f, "Fail"),
            DowngradePolicy::Recreate => write!(f, "Recreate"),
            DowngradePolicy::Hook(_) => write!(f, "Hook(..)"),
        }
    }
}

/// Everything the schema owner supplies
pub struct Schema {
    create: CreateFn,
    migrations: MigrationSet,
    downgrade: DowngradePolicy,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("migrations", &self.migrations)
            .field("downgrade", &self.downgrade)
            .finish()
    }
}

impl Schema {
    /// Schema created by running a closure on a brand-new database
    pub fn new<F>(create: F) -> Self
    where
        F: Fn(&Connection) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            create: Box::new(create),
            migrations: MigrationSet::empty(),
            downgrade: DowngradePolicy::Fail,
        }
    }

    /// Schema created by executing a SQL script
    pub fn from_sql(sql: &str) -> Self {
        let sql = sql.to_string();
        Self::new(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
    }

    pub fn with_migrations(mut self, migrations: MigrationSet) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_downgrade(mut self, policy: DowngradePolicy) -> Self {
        self.downgrade = policy;
        self
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    pub fn downgrade_policy(&self) -> &DowngradePolicy {
        &self.downgrade
    }
}

/// The four ways an open can move a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Create,
    Upgrade,
    Downgrade,
    NoOp,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Create => write!(f, "create"),
            TransitionKind::Upgrade => write!(f, "upgrade"),
            TransitionKind::Downgrade => write!(f, "downgrade"),
            TransitionKind::NoOp => write!(f, "noop"),
        }
    }
}

/// Outcome of one open sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub kind: TransitionKind,
    /// On-disk version before the open (0 for a new file)
    pub from_version: u32,
    /// Declared version, now also the on-disk version
    pub to_version: u32,
    /// Version hops of an upgrade, in the order they were applied
    pub hops: Vec<(u32, u32)>,
    /// Target versions of the migration steps that ran
    pub applied: Vec<u32>,
}

impl Transition {
    fn new(kind: TransitionKind, from_version: u32, to_version: u32) -> Self {
        Self {
            kind,
            from_version,
            to_version,
            hops: Vec::new(),
            applied: Vec::new(),
        }
    }
}

/// Drives the version state machine of a handle's connection
#[derive(Debug)]
pub struct MigrationRunner {
    schema: Schema,
}

impl MigrationRunner {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Which transition an open would run, without running it
    pub fn plan(&self, conn: &Connection, declared: u32) -> LifecycleResult<TransitionKind> {
        let kind = match SchemaManager::new(conn).check_status(declared)? {
            SchemaStatus::NotInitialized => TransitionKind::Create,
            SchemaStatus::Current => TransitionKind::NoOp,
            SchemaStatus::NeedsUpgrade { .. } => TransitionKind::Upgrade,
            SchemaStatus::NeedsDowngrade { .. } => TransitionKind::Downgrade,
        };
        Ok(kind)
    }

    /// Bring `conn` to `declared`
    ///
    /// With `transactional` set the whole transition commits or rolls back as
    /// one unit; otherwise each step is on its own and the version is stamped
    /// after every successful upgrade step.
    pub fn run(&self, conn: &Connection, declared: u32, transactional: bool) -> LifecycleResult<Transition> {
        let from = SchemaManager::new(conn).version()?;
        let kind = self.plan(conn, declared)?;

        if kind == TransitionKind::NoOp {
            debug!(version = declared, "Schema is current");
            return Ok(Transition::new(kind, from, declared));
        }
        self.check_downgrade(from, declared)?;

        if !transactional {
            return self.apply(conn, kind, from, declared);
        }

        // SQLite ignores `PRAGMA foreign_keys` inside a transaction, so a
        // recreate has to switch enforcement off before it begins.
        let recreate =
            kind == TransitionKind::Downgrade && matches!(self.schema.downgrade, DowngradePolicy::Recreate);
        let relax_fk = recreate
            && conn.pragma_query_value(None, "foreign_keys", |row| row.get::<_, bool>(0))?;
        if relax_fk {
            conn.pragma_update(None, "foreign_keys", false)?;
        }

        let result = conn.unchecked_transaction().map_err(LifecycleError::from).and_then(|tx| {
            let transition = self.apply(&tx, kind, from, declared)?;
            tx.commit().map_err(|e| LifecycleError::Migration {
                kind,
                from_version: from,
                to_version: declared,
                cause: e.into(),
            })?;
            Ok(transition)
        });

        if relax_fk {
            conn.pragma_update(None, "foreign_keys", true)?;
        }
        result
    }

    /// `UnsupportedDowngrade` when moving from `on_disk` to `declared` is a
    /// downgrade the schema has no policy for
    ///
    /// Needs only the on-disk version, so callers can decide before opening
    /// the file for writing.
    pub fn check_downgrade(&self, on_disk: u32, declared: u32) -> LifecycleResult<()> {
        if on_disk > declared && matches!(self.schema.downgrade, DowngradePolicy::Fail) {
            return Err(LifecycleError::UnsupportedDowngrade {
                from: on_disk,
                to: declared,
            });
        }
        Ok(())
    }

    fn apply(&self, conn: &Connection, kind: TransitionKind, from: u32, declared: u32) -> LifecycleResult<Transition> {
        let mut transition = Transition::new(kind, from, declared);
        let fail = move |from_version: u32, to_version: u32| {
            move |cause: anyhow::Error| LifecycleError::Migration {
                kind,
                from_version,
                to_version,
                cause: cause.into(),
            }
        };
        let stamp = |version: u32| {
            SchemaManager::new(conn)
                .set_version(version)
                .map_err(|e| LifecycleError::Migration {
                    kind,
                    from_version: from,
                    to_version: version,
                    cause: e.into(),
                })
        };

        match kind {
            TransitionKind::Create => {
                info!(version = declared, "Creating schema");
                (self.schema.create)(conn).map_err(fail(from, declared))?;
                for step in self.schema.migrations.fresh_install(declared) {
                    step.apply(conn).map_err(fail(from, step.target_version()))?;
                    transition.applied.push(step.target_version());
                }
                stamp(declared)?;
            }
            TransitionKind::Upgrade => {
                info!(from = from, to = declared, "Upgrading schema");
                let mut current = from;
                for step in self.schema.migrations.between(from, declared) {
                    let target = step.target_version();
                    debug!(from = current, to = target, description = step.description(), "Applying migration");
                    step.apply(conn).map_err(fail(current, target))?;
                    stamp(target)?;
                    transition.applied.push(target);
                    transition.hops.push((current, target));
                    current = target;
                }
                if current < declared {
                    stamp(declared)?;
                    transition.hops.push((current, declared));
                }
            }
            TransitionKind::Downgrade => {
                info!(from = from, to = declared, policy = ?self.schema.downgrade, "Downgrading schema");
                match &self.schema.downgrade {
                    DowngradePolicy::Fail => {
                        return Err(LifecycleError::UnsupportedDowngrade { from, to: declared });
                    }
                    DowngradePolicy::Recreate => {
                        SchemaManager::new(conn)
                            .reset()
                            .map_err(|e| LifecycleError::Migration {
                                kind,
                                from_version: from,
                                to_version: declared,
                                cause: e.into(),
                            })?;
                        (self.schema.create)(conn).map_err(fail(from, declared))?;
                        for step in self.schema.migrations.fresh_install(declared) {
                            step.apply(conn).map_err(fail(from, step.target_version()))?;
                            transition.applied.push(step.target_version());
                        }
                    }
                    DowngradePolicy::Hook(hook) => {
                        hook(conn, from, declared).map_err(fail(from, declared))?;
                    }
                }
                stamp(declared)?;
            }
            TransitionKind::NoOp => {}
        }

        Ok(transition)
    }
}
