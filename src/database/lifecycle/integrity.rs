//! SQLite integrity checking
//!
//! Two levels of checking:
//!
//! 1. **Quick** (`PRAGMA quick_check(1)`): fast subset, stops at the first problem.
//! 2. **Full** (`PRAGMA integrity_check`): complete scan of the database.
//!
//! Finding corruption is a normal `false` result. Only failures to run the
//! check at all (closed handle, I/O trouble) are errors.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database::core::{is_corruption_code, DatabaseHandle, LifecycleError, LifecycleResult};

/// The kind of integrity check to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    #[default]
    Quick,
    Full,
}

impl CheckKind {
    fn pragma(&self) -> &'static str {
        match self {
            CheckKind::Quick => "PRAGMA quick_check(1)",
            CheckKind::Full => "PRAGMA integrity_check",
        }
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quick" | "quick_check" => Ok(CheckKind::Quick),
            "full" | "integrity_check" => Ok(CheckKind::Full),
            _ => Err(format!("Invalid integrity check '{}', expected 'quick' or 'full'", s)),
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Quick => write!(f, "quick_check"),
            CheckKind::Full => write!(f, "integrity_check"),
        }
    }
}

/// Result of an integrity check
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    /// Whether the check passed (no corruption detected)
    pub ok: bool,
    pub kind: CheckKind,
    /// Raw output lines from the PRAGMA, or the SQLite error that reported corruption
    pub details: Vec<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

/// Runs read-only structural checks against an open handle
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityChecker {
    kind: CheckKind,
}

impl IntegrityChecker {
    pub fn new(kind: CheckKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> CheckKind {
        self.kind
    }

    /// `true` when the database passed the check
    pub fn check(&self, handle: &DatabaseHandle) -> LifecycleResult<bool> {
        Ok(self.report(handle)?.ok)
    }

    /// Run the check and keep its output
    pub fn report(&self, handle: &DatabaseHandle) -> LifecycleResult<IntegrityReport> {
        let conn = handle
            .connection()
            .map_err(|_| LifecycleError::IntegrityCheck("database handle is closed".to_string()))?;
        let start = Instant::now();

        let rows: Result<Vec<String>, rusqlite::Error> = conn.prepare(self.kind.pragma()).and_then(|mut stmt| {
            let lines = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>();
            lines
        });

        let (ok, details) = match rows {
            Ok(lines) => (lines.len() == 1 && lines[0] == "ok", lines),
            Err(e) if is_corruption_code(e.sqlite_error_code()) => (false, vec![e.to_string()]),
            Err(e) => return Err(LifecycleError::IntegrityCheck(e.to_string())),
        };

        let report = IntegrityReport {
            ok,
            kind: self.kind,
            details,
            duration: start.elapsed(),
        };

        if report.ok {
            debug!(check = %self.kind, role = %handle.role(), "Integrity check passed");
        } else {
            warn!(
                check = %self.kind,
                role = %handle.role(),
                details = ?report.details,
                "Integrity check found corruption"
            );
        }
        Ok(report)
    }

    /// Failed report for a database SQLite refused to open as corrupt
    pub fn unopenable(&self, error: &LifecycleError) -> IntegrityReport {
        warn!(check = %self.kind, error = %error, "Database could not be opened for an integrity check");
        IntegrityReport {
            ok: false,
            kind: self.kind,
            details: vec![error.to_string()],
            duration: Duration::ZERO,
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
