use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::database::{
    CheckKind, ConnectionOptions, CoordinatorOptions, DatabaseDescriptor, JournalMode, SchemaManager,
    SchemaStatus,
};

pub struct KeeperConfig {
    /// Path to the directory holding managed databases and their backups
    pub data_dir: String,

    /// SQLite journal mode for opened handles (default: WAL)
    pub journal_mode: JournalMode,

    /// Integrity check used by `check` (default: quick)
    pub integrity_check: CheckKind,

    /// Keep a `temp-` backup next to each database (default: true)
    pub backup_enabled: bool,

    /// Run each open's migrations inside one transaction (default: false)
    pub transactional_migrations: bool,
}

const EMPTY_CONFIG: &str = r#"### dbkeeper configuration file

### directory holding managed databases and their backups
# data_dir = "~/.dbkeeper"

### SQLite journal mode: "wal" or "delete"
# journal_mode = "wal"

### integrity check level: "quick" or "full"
# integrity_check = "quick"

### backup and migration behavior
# backup_enabled = true
# transactional_migrations = false
"#;

impl Default for KeeperConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.dbkeeper", home_dir),
            journal_mode: JournalMode::Wal,
            integrity_check: CheckKind::Quick,
            backup_enabled: true,
            transactional_migrations: false,
        }
    }
}

impl KeeperConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<KeeperConfig> {
        let mut builder = Config::builder();

        // By default use $HOME/.dbkeeper/dbkeeper.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        // Config dir
        let keeper_dir = format!("{}/.dbkeeper", home_dir.as_str());

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(keeper_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create dbkeeper directory: {}", e))?;
                let p = format!("{}/dbkeeper.toml", keeper_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of DBKEEPER)
        // E.g., `DBKEEPER_JOURNAL_MODE=delete ./dbkeeper status` switches off WAL
        builder = builder.add_source(config::Environment::with_prefix("DBKEEPER"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        KeeperConfig::from_map(&config, &keeper_dir)
    }

    fn from_map(config: &HashMap<String, String>, default_dir: &str) -> Result<KeeperConfig> {
        let data_dir = match config.get("data_dir") {
            Some(p) => expand_home(p),
            None => default_dir.to_string(),
        };

        let journal_mode = match config.get("journal_mode") {
            Some(s) => s.parse::<JournalMode>().map_err(|e| anyhow!(e))?,
            None => JournalMode::Wal,
        };

        let integrity_check = match config.get("integrity_check") {
            Some(s) => s.parse::<CheckKind>().map_err(|e| anyhow!(e))?,
            None => CheckKind::Quick,
        };

        let backup_enabled = parse_bool(config, "backup_enabled")?.unwrap_or(true);
        let transactional_migrations = parse_bool(config, "transactional_migrations")?.unwrap_or(false);

        Ok(KeeperConfig {
            data_dir,
            journal_mode,
            integrity_check,
            backup_enabled,
            transactional_migrations,
        })
    }

    /// Connection settings for every handle opened under this configuration
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            journal_mode: self.journal_mode,
            transactional_migrations: self.transactional_migrations,
            ..Default::default()
        }
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            connection: self.connection_options(),
            integrity: self.integrity_check,
            backup_enabled: self.backup_enabled,
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("Journal Mode:       {}", self.journal_mode.as_str()),
            format!("Integrity Check:    {}", self.integrity_check),
            format!("Backups:            {}", enabled(self.backup_enabled)),
            format!("Tx Migrations:      {}", enabled(self.transactional_migrations)),
        ];
        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.dbkeeper/dbkeeper.toml", home_dir)
    }
}

fn parse_bool(config: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    match config.get(key).map(|s| s.trim().to_lowercase()) {
        None => Ok(None),
        Some(s) => match s.as_str() {
            "true" | "yes" | "1" | "on" => Ok(Some(true)),
            "false" | "no" | "0" | "off" => Ok(Some(false)),
            _ => Err(anyhow!("Invalid boolean for {}: '{}'", key, s)),
        },
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().to_string(),
        _ => path.to_string(),
    }
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

// =============================================================================
// Database Info Types (used by the status command)
// =============================================================================

/// Schema state of a database file relative to its declared version
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseStatus {
    /// File is at the declared version
    Current,
    /// File is older than the declared version
    NeedsUpgrade,
    /// File is newer than the declared version
    NeedsDowngrade,
    /// File exists but has no schema yet
    NotInitialized,
    /// No file on disk
    Missing,
    /// File could not be read as a database
    Unreadable,
}

impl std::fmt::Display for DatabaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseStatus::Current => write!(f, "current"),
            DatabaseStatus::NeedsUpgrade => write!(f, "needs upgrade"),
            DatabaseStatus::NeedsDowngrade => write!(f, "needs downgrade"),
            DatabaseStatus::NotInitialized => write!(f, "not initialized"),
            DatabaseStatus::Missing => write!(f, "missing"),
            DatabaseStatus::Unreadable => write!(f, "unreadable"),
        }
    }
}

/// Information about a managed database and its backup
#[derive(Debug, Serialize, Clone)]
pub struct DatabaseInfo {
    pub name: String,
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub declared_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub status: DatabaseStatus,
    pub backup_path: String,
    pub backup_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_captured_at: Option<String>,
}

/// Inspect a database file without opening it through the lifecycle
///
/// The file is opened read-only; nothing is created or migrated.
pub fn get_database_info(descriptor: &DatabaseDescriptor) -> Option<DatabaseInfo> {
    use crate::database::BackupStore;

    let path = descriptor.file_path()?;
    let exists = path.exists();
    let size_bytes = file_size(&path);

    let (schema_version, status) = if exists {
        match read_schema_state(&path, descriptor.version()) {
            Some((version, status)) => (Some(version), status),
            None => (None, DatabaseStatus::Unreadable),
        }
    } else {
        (None, DatabaseStatus::Missing)
    };

    let store = BackupStore::new(descriptor);
    let backup_path = store.path()?;
    let backup_captured_at = store
        .manifest()
        .ok()
        .flatten()
        .map(|m| m.captured_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());

    Some(DatabaseInfo {
        name: descriptor.name().to_string(),
        path: path.to_string_lossy().to_string(),
        exists,
        size_bytes,
        declared_version: descriptor.version(),
        schema_version,
        status,
        backup_exists: backup_path.exists(),
        backup_size_bytes: file_size(&backup_path),
        backup_path: backup_path.to_string_lossy().to_string(),
        backup_captured_at,
    })
}

fn read_schema_state(path: &Path, declared: u32) -> Option<(u32, DatabaseStatus)> {
    let conn = rusqlite::Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
    let manager = SchemaManager::new(&conn);
    let version = manager.version().ok()?;
    let status = match manager.check_status(declared).ok()? {
        SchemaStatus::Current => DatabaseStatus::Current,
        SchemaStatus::NeedsUpgrade { .. } => DatabaseStatus::NeedsUpgrade,
        SchemaStatus::NeedsDowngrade { .. } => DatabaseStatus::NeedsDowngrade,
        SchemaStatus::NotInitialized => DatabaseStatus::NotInitialized,
    };
    Some((version, status))
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
