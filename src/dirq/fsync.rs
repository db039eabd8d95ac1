//! Low-level fsync operations for durability.
//!
//! On POSIX systems, creating or renaming a file updates the directory entry.
//! Without an fsync on the directory, that entry may not survive a power loss
//! even if the file contents were synced, so entry writes and removals sync
//! both the file and its parent directory.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory, ensuring its entries are durable.
///
/// Without this, a newly created file might be lost, a renamed file might
/// revert to its old name, and a deleted file might reappear after a crash.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
