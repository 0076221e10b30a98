//! Crash-safe whole-file replacement.
//!
//! Every write goes through the same sequence:
//! 1. Write the new contents to `<path>.tmp` in the target's directory
//! 2. fsync the temp file
//! 3. Rename it over `<path>`
//! 4. fsync the directory so the rename itself survives power loss
//!
//! A reader therefore sees either the old file or the new one. A crash before
//! step 3 leaves a stale `.tmp` behind, which the next write truncates.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Returns the temp path used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Returns the directory holding `path`, treating a bare file name as `.`.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Syncs a directory so that entries created or renamed in it are durable.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Atomically replaces `path` with `bytes`.
///
/// On failure the previous contents of `path` are untouched and the temp
/// file is removed on a best-effort basis. Once the rename has happened the
/// new contents are in place, so a failed directory fsync is logged rather
/// than reported.
pub fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    replace_file_with(path, bytes, fsync_dir)
}

fn replace_file_with(
    path: &Path,
    bytes: &[u8],
    sync_dir: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir)?;

    let tmp_path = temp_path(path);
    let result = write_synced(&tmp_path, bytes).and_then(|()| std::fs::rename(&tmp_path, path));

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    if let Err(e) = sync_dir(dir) {
        warn!(
            dir = %dir.display(),
            error = %e,
            "Directory fsync failed after rename; the replacement may not survive power loss"
        );
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
