//! Database handle management
//!
//! This module provides the connection wrapper owned by the lifecycle
//! coordinator. A `DatabaseHandle` is either open (holding a live SQLite
//! connection) or closed, and is tagged with the role it plays.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{LifecycleError, LifecycleResult};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Which database a handle points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The database callers read and write
    Primary,
    /// The restore source kept next to the primary
    Backup,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Backup => write!(f, "backup"),
        }
    }
}

/// SQLite journal mode applied on open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
        }
    }

}

impl FromStr for JournalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wal" => Ok(JournalMode::Wal),
            "delete" => Ok(JournalMode::Delete),
            _ => Err(format!("Invalid journal mode '{}', expected 'wal' or 'delete'", s)),
        }
    }
}

/// Per-connection settings applied every time a handle is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub journal_mode: JournalMode,
    pub foreign_keys: bool,
    pub busy_timeout: Duration,
    /// Run each create/upgrade/downgrade transition inside one transaction
    pub transactional_migrations: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            foreign_keys: true,
            busy_timeout: Duration::from_secs(5),
            transactional_migrations: false,
        }
    }
}

/// Owned SQLite connection with an explicit open/closed state
///
/// Every successful open gets a fresh generation number, so two handles with
/// the same generation are the same connection.
pub struct DatabaseHandle {
    conn: Option<Connection>,
    role: Role,
    path: Option<PathBuf>,
    generation: u64,
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("role", &self.role)
            .field("path", &self.path)
            .field("generation", &self.generation)
            .field("open", &self.is_open())
            .finish()
    }
}

impl DatabaseHandle {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&Path>, role: Role, options: &ConnectionOptions) -> LifecycleResult<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| LifecycleError::open_sqlite(p.display(), "failed to open", e))?,
            None => Connection::open_in_memory()
                .map_err(|e| LifecycleError::open_sqlite(":memory:", "failed to open", e))?,
        };

        let handle = DatabaseHandle {
            conn: Some(conn),
            role,
            path: path.map(Path::to_path_buf),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        };
        handle.configure(options)?;
        debug!(role = %role, generation = handle.generation, "Opened database handle");
        Ok(handle)
    }

    fn configure(&self, options: &ConnectionOptions) -> LifecycleResult<()> {
        let conn = self.connection()?;
        let location = self.location();

        // Also the first statement that reads the file header, so a file that
        // is not a database fails here.
        let _: String = conn
            .query_row(
                &format!("PRAGMA journal_mode={}", options.journal_mode.as_str()),
                [],
                |row| row.get(0),
            )
            .map_err(|e| LifecycleError::open_sqlite(&location, "failed to set journal mode", e))?;

        conn.execute("PRAGMA synchronous=NORMAL", [])
            .map_err(|e| LifecycleError::open_sqlite(&location, "failed to set synchronous mode", e))?;

        conn.execute("PRAGMA temp_store=MEMORY", [])
            .map_err(|e| LifecycleError::open_sqlite(&location, "failed to set temp store", e))?;

        let fk = if options.foreign_keys { "ON" } else { "OFF" };
        conn.execute(&format!("PRAGMA foreign_keys={}", fk), [])
            .map_err(|e| LifecycleError::open_sqlite(&location, "failed to set foreign keys", e))?;

        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| LifecycleError::open_sqlite(&location, "failed to set busy timeout", e))?;

        Ok(())
    }

    /// Close the connection, releasing the file
    ///
    /// Closing an already closed handle is a no-op. If SQLite refuses to
    /// close, the handle stays open and the error is returned.
    pub fn close(&mut self) -> LifecycleResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err((conn, e)) = conn.close() {
                self.conn = Some(conn);
                return Err(e.into());
            }
            debug!(role = %self.role, generation = self.generation, "Closed database handle");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// The live connection, or `HandleClosed`
    pub fn connection(&self) -> LifecycleResult<&Connection> {
        self.conn.as_ref().ok_or(LifecycleError::HandleClosed)
    }

    /// Execute a single SQL statement
    pub fn execute(&self, sql: &str) -> LifecycleResult<usize> {
        Ok(self.connection()?.execute(sql, [])?)
    }

    /// Execute a SQL statement with parameters
    pub fn execute_with_params<P: rusqlite::Params>(&self, sql: &str, params: P) -> LifecycleResult<usize> {
        Ok(self.connection()?.execute(sql, params)?)
    }

    /// Execute several `;`-separated statements
    pub fn execute_batch(&self, sql: &str) -> LifecycleResult<()> {
        Ok(self.connection()?.execute_batch(sql)?)
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> LifecycleResult<bool> {
        let count: i32 = self.connection()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> LifecycleResult<u64> {
        let query = format!("SELECT COUNT(*) FROM \"{}\"", table_name.replace('"', "\"\""));
        let count: u64 = self.connection()?.query_row(&query, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Fold the write-ahead log into the main file so the file alone is a
    /// complete copy of the database
    pub fn checkpoint(&self) -> LifecycleResult<()> {
        self.connection()?
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    /// File path, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn location(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}
