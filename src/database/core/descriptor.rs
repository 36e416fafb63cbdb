//! Logical database descriptors
//!
//! A `DatabaseDescriptor` names one logical database: its file name, declared
//! schema version and where it lives. Handles are derived from descriptors and
//! the descriptor is never mutated afterwards.

use std::path::{Path, PathBuf};

use super::error::{LifecycleError, LifecycleResult};

/// Default file extension appended to the logical name
pub const DEFAULT_EXTENSION: &str = ".db";

/// Prefix of the backup file kept next to the primary
pub const BACKUP_PREFIX: &str = "temp-";

/// Identity, declared version and storage location of one logical database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseDescriptor {
    name: String,
    version: u32,
    in_memory: bool,
    directory: PathBuf,
    extension: String,
    seed: Option<PathBuf>,
}

impl DatabaseDescriptor {
    /// Describe a file-backed database `{directory}/{name}.db` at `version`
    pub fn new(name: &str, version: u32, directory: impl AsRef<Path>) -> LifecycleResult<Self> {
        let descriptor = Self {
            name: name.to_string(),
            version,
            in_memory: false,
            directory: directory.as_ref().to_path_buf(),
            extension: DEFAULT_EXTENSION.to_string(),
            seed: None,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Describe an in-memory database; nothing is ever written to disk
    pub fn in_memory(name: &str, version: u32) -> LifecycleResult<Self> {
        let descriptor = Self {
            name: name.to_string(),
            version,
            in_memory: true,
            directory: PathBuf::new(),
            extension: DEFAULT_EXTENSION.to_string(),
            seed: None,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Replace the file extension (e.g. `".sqlite3"`, or `""` for none)
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    /// Copy `seed` into place when the database file does not exist yet
    pub fn with_seed(mut self, seed: impl AsRef<Path>) -> Self {
        self.seed = Some(seed.as_ref().to_path_buf());
        self
    }

    fn validate(&self) -> LifecycleResult<()> {
        if self.name.trim().is_empty() {
            return Err(LifecycleError::InvalidDescriptor(
                "database name must not be empty".to_string(),
            ));
        }
        if self.name.contains('/') || self.name.contains('\\') {
            return Err(LifecycleError::InvalidDescriptor(format!(
                "database name '{}' must not contain path separators",
                self.name
            )));
        }
        if self.version == 0 {
            return Err(LifecycleError::InvalidDescriptor(format!(
                "database '{}' must declare a positive schema version",
                self.name
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn seed(&self) -> Option<&Path> {
        self.seed.as_deref()
    }

    /// File name on disk: `{name}{extension}`
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }

    /// Full path of the database file, `None` for in-memory databases
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.in_memory {
            None
        } else {
            Some(self.directory.join(self.file_name()))
        }
    }

    /// Descriptor of the backup database kept next to this one
    ///
    /// The backup shares directory, extension and declared version, and is
    /// named `temp-{file name}`. This layout is what restore looks for after
    /// a restart, so it must not change.
    pub fn backup_descriptor(&self) -> Self {
        Self {
            name: format!("{}{}", BACKUP_PREFIX, self.name),
            version: self.version,
            in_memory: self.in_memory,
            directory: self.directory.clone(),
            extension: self.extension.clone(),
            seed: None,
        }
    }

    /// Same database, re-declared at another schema version
    pub fn at_version(&self, version: u32) -> LifecycleResult<Self> {
        let mut descriptor = self.clone();
        descriptor.version = version;
        descriptor.validate()?;
        Ok(descriptor)
    }
}
