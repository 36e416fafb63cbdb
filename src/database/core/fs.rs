//! File helpers for swapping whole database files
//!
//! Copies go to a temporary sibling first, are synced, and are then renamed
//! over the destination, so readers only ever see the old file or the new one.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// SQLite side files that belong to a database in WAL mode
const SIDE_FILE_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// Temporary sibling used while `dest` is being written
pub fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.partial", name))
}

/// Paths of the `-wal`, `-shm` and `-journal` files next to `db_path`
pub fn side_files(db_path: &Path) -> Vec<PathBuf> {
    SIDE_FILE_SUFFIXES
        .iter()
        .map(|suffix| {
            let mut os = db_path.as_os_str().to_os_string();
            os.push(suffix);
            PathBuf::from(os)
        })
        .collect()
}

/// Remove stale side files of `db_path`; missing files are fine
pub fn remove_side_files(db_path: &Path) -> io::Result<()> {
    for path in side_files(db_path) {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove a database file together with its side files
pub fn remove_database_files(db_path: &Path) -> io::Result<()> {
    match fs::remove_file(db_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    remove_side_files(db_path)
}

/// Replace `dest` with a full copy of `src`
///
/// 1. Copy `src` into a temporary sibling of `dest`
/// 2. Sync the temporary file to disk
/// 3. Rename the temporary file over `dest`
/// 4. Drop stale side files of `dest` and sync the directory
///
/// On failure before the rename the temporary file is removed and `dest`,
/// side files included, is untouched.
pub fn atomic_copy(src: &Path, dest: &Path) -> io::Result<u64> {
    let temp_path = partial_path(dest);

    let result = (|| {
        let bytes = fs::copy(src, &temp_path)?;
        File::open(&temp_path)?.sync_all()?;
        fs::rename(&temp_path, dest)?;
        Ok(bytes)
    })();

    match result {
        Ok(bytes) => {
            remove_side_files(dest)?;
            if let Some(parent) = dest.parent() {
                sync_directory(parent)?;
            }
            Ok(bytes)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove partial copy");
                }
            }
            Err(e)
        }
    }
}

/// Write `contents` to `dest` with the same temp-then-rename steps
pub fn atomic_write(dest: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let temp_path = partial_path(dest);
    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, dest)?;
    if let Some(parent) = dest.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> io::Result<()> {
    // An empty parent means the current directory
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> io::Result<()> {
    Ok(())
}
