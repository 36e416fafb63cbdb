pub mod backup;
pub mod check;
pub mod migrate;
pub mod status;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;
use dbkeeper::database::{
    DatabaseDescriptor, DowngradePolicy, LifecycleCoordinator, MigrationSet, Schema,
};
use dbkeeper::KeeperConfig;
use serde::Serialize;

/// Arguments selecting the database a command works on
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Logical database name, the file is <dir>/<name>.db
    #[clap(short, long)]
    pub name: String,

    /// Declared schema version
    #[clap(long = "schema-version", default_value_t = 1)]
    pub version: u32,

    /// Directory holding the database, by default the configured data_dir
    #[clap(short, long)]
    pub dir: Option<PathBuf>,

    /// SQL script that creates the schema in a new database
    #[clap(short, long)]
    pub schema: Option<PathBuf>,

    /// Directory of NNNN_description.sql migration files
    #[clap(short, long)]
    pub migrations: Option<PathBuf>,

    /// Drop and recreate the schema when the file is newer than the declared version (destroys data)
    #[clap(long)]
    pub allow_recreate: bool,
}

impl TargetArgs {
    pub fn descriptor(&self, config: &KeeperConfig) -> Result<DatabaseDescriptor> {
        let dir = match &self.dir {
            Some(d) => d.clone(),
            None => PathBuf::from(&config.data_dir),
        };
        Ok(DatabaseDescriptor::new(&self.name, self.version, dir)?)
    }

    pub fn schema(&self) -> Result<Schema> {
        let create_sql = match &self.schema {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| anyhow!("Unable to read schema file {}: {}", path.display(), e))?,
            None => String::new(),
        };
        let migrations = match &self.migrations {
            Some(dir) => MigrationSet::from_sql_dir(dir)?,
            None => MigrationSet::empty(),
        };
        let downgrade = if self.allow_recreate {
            DowngradePolicy::Recreate
        } else {
            DowngradePolicy::Fail
        };

        Ok(Schema::from_sql(&create_sql)
            .with_migrations(migrations)
            .with_downgrade(downgrade))
    }

    pub fn coordinator(&self, config: &KeeperConfig) -> Result<LifecycleCoordinator> {
        Ok(LifecycleCoordinator::new(
            self.descriptor(config)?,
            self.schema()?,
            config.coordinator_options(),
        ))
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}
