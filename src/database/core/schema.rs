//! Database schema version management
//!
//! The schema version of a database file is kept in `PRAGMA user_version`.
//! Zero means "never created", which is also what SQLite reports for a brand
//! new file.

use rusqlite::Connection;

use super::error::LifecycleResult;

/// Schema version state of a database compared with its declared version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Database is not initialized (fresh database)
    NotInitialized,

    /// Schema version matches the declared version
    Current,

    /// Schema is older than the declared version
    NeedsUpgrade { from: u32, to: u32 },

    /// Schema is newer than the declared version
    NeedsDowngrade { from: u32, to: u32 },
}

/// Version bookkeeping for one connection
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Current on-disk schema version
    pub fn version(&self) -> LifecycleResult<u32> {
        let version: u32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(version)
    }

    /// Record `version` as the on-disk schema version
    pub fn set_version(&self, version: u32) -> LifecycleResult<()> {
        self.conn.pragma_update(None, "user_version", version)?;
        Ok(())
    }

    /// Compare the on-disk version with `declared`
    pub fn check_status(&self, declared: u32) -> LifecycleResult<SchemaStatus> {
        let current = self.version()?;

        let status = if current == 0 {
            SchemaStatus::NotInitialized
        } else if current == declared {
            SchemaStatus::Current
        } else if current < declared {
            SchemaStatus::NeedsUpgrade {
                from: current,
                to: declared,
            }
        } else {
            SchemaStatus::NeedsDowngrade {
                from: current,
                to: declared,
            }
        };
        Ok(status)
    }

    /// Names of all user tables, sorted
    pub fn table_names(&self) -> LifecycleResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Reset the database by dropping every user object and the version
    pub fn reset(&self) -> LifecycleResult<()> {
        let fk_enabled: bool = self
            .conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        if fk_enabled {
            self.conn.execute("PRAGMA foreign_keys=OFF", [])?;
        }

        let objects: Vec<(String, String)> = {
            let mut stmt = self.conn.prepare(
                "SELECT type, name FROM sqlite_master
                 WHERE type IN ('view', 'table') AND name NOT LIKE 'sqlite_%'
                 ORDER BY CASE type WHEN 'view' THEN 0 ELSE 1 END",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        // Views first (they depend on tables); dropping a table takes its
        // indexes and triggers with it.
        for (kind, name) in objects {
            let quoted = name.replace('"', "\"\"");
            let sql = if kind == "view" {
                format!("DROP VIEW IF EXISTS \"{}\"", quoted)
            } else {
                format!("DROP TABLE IF EXISTS \"{}\"", quoted)
            };
            self.conn.execute(&sql, [])?;
        }

        self.set_version(0)?;

        if fk_enabled {
            self.conn.execute("PRAGMA foreign_keys=ON", [])?;
        }
        Ok(())
    }
}
