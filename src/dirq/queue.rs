//! On-disk message queue with crash-tolerant entries and lock files.
//!
//! Layout: one subdirectory per time shard, one file per entry:
//!
//! ```text
//! <root>/<shard>/<entry>        - payload (ticket = "<shard>/<entry>")
//! <root>/<shard>/<entry>.lock   - lock marker (empty: a reader claimed it)
//! <root>/<shard>/<entry>.tmp    - in-flight write, ignored by scans
//! ```
//!
//! Shard and entry names are fixed-width hex derived from the wall clock, so
//! lexicographic ticket order correlates with creation time. Payloads are
//! written atomically (temp file + rename + fsync + directory fsync); lock
//! files are created with `O_EXCL`, making lock acquisition atomic across
//! processes.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};
use crate::types::Ticket;

/// Errors from durable-queue operations.
#[derive(Debug, Error)]
pub enum DirqError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Ticket contains unsafe characters or doesn't match the queue layout.
    #[error("invalid ticket: {0}")]
    InvalidTicket(Ticket),
}

/// Result type for durable-queue operations.
pub type Result<T> = std::result::Result<T, DirqError>;

/// Validates that a ticket is safe to turn into a path.
///
/// A valid ticket is `<shard>/<entry>` where neither component is empty,
/// starts with a dot, or contains path separators or null bytes.
fn validate_ticket(ticket: &Ticket) -> Result<()> {
    let invalid = || DirqError::InvalidTicket(ticket.clone());

    let (shard, entry) = ticket.as_str().split_once('/').ok_or_else(invalid)?;
    for part in [shard, entry] {
        if part.is_empty()
            || part.starts_with('.')
            || part.contains('/')
            || part.contains('\\')
            || part.contains('\0')
        {
            return Err(invalid());
        }
    }
    Ok(())
}

/// A handle on one on-disk queue directory.
///
/// Handles are cheap; the loader and the remover each hold their own handle
/// on the same directory, with per-entry lock files as the only mutual
/// exclusion between them.
#[derive(Debug)]
pub struct DirQueue {
    root: PathBuf,
    seq: AtomicU64,
    #[cfg(test)]
    fail_next_read: std::sync::atomic::AtomicBool,
}

impl DirQueue {
    /// Opens (creating if needed) the queue rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(DirQueue {
            root,
            seq: AtomicU64::new(0),
            #[cfg(test)]
            fail_next_read: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// The queue's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores a payload and returns its ticket.
    ///
    /// The entry is written atomically: temp file, fsync, rename, directory
    /// fsync. This is the producer side of the queue.
    pub fn add(&self, payload: &[u8]) -> Result<Ticket> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let shard = format!("{:08x}", now.as_secs() / 3600);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = format!("{:016x}{:04x}", now.as_nanos() as u64, seq & 0xffff);

        let shard_dir = self.root.join(&shard);
        std::fs::create_dir_all(&shard_dir)?;

        let final_path = shard_dir.join(&entry);
        let temp_path = shard_dir.join(format!("{entry}.tmp"));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(payload)?;
            fsync_file(&file)?;
        }
        std::fs::rename(&temp_path, &final_path)?;
        fsync_dir(&shard_dir)?;

        Ok(Ticket::new(format!("{shard}/{entry}")))
    }

    /// Returns all entry tickets in lexicographic (creation) order.
    ///
    /// Lock and temp markers are skipped; locked entries are still listed
    /// (callers find out when they try to lock).
    pub fn entries(&self) -> Result<Vec<Ticket>> {
        let mut shards = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                shards.push(name.to_string());
            }
        }
        shards.sort_unstable();

        let mut tickets = Vec::new();
        for shard in shards {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(self.root.join(&shard))? {
                let entry = entry?;
                if entry.file_type()?.is_file()
                    && let Some(name) = entry.file_name().to_str()
                    && !name.contains('.')
                {
                    names.push(name.to_string());
                }
            }
            names.sort_unstable();
            tickets.extend(names.into_iter().map(|n| Ticket::new(format!("{shard}/{n}"))));
        }
        Ok(tickets)
    }

    /// Path of an entry's payload file.
    pub fn path_of(&self, ticket: &Ticket) -> Result<PathBuf> {
        validate_ticket(ticket)?;
        Ok(self.root.join(ticket.as_str()))
    }

    fn lock_path(&self, ticket: &Ticket) -> Result<PathBuf> {
        validate_ticket(ticket)?;
        Ok(self.root.join(format!("{}.lock", ticket.as_str())))
    }

    /// Attempts to lock an entry.
    ///
    /// Returns `Ok(false)` when the entry is already locked by another reader
    /// or no longer exists. Lock creation uses `O_EXCL`, so at most one
    /// reader holds an entry at a time, across processes.
    pub fn lock(&self, ticket: &Ticket) -> Result<bool> {
        if !self.path_of(ticket)?.exists() {
            return Ok(false);
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(ticket)?)
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Releases an entry's lock.
    ///
    /// Returns `Ok(false)` when there was no lock to release.
    pub fn unlock(&self, ticket: &Ticket) -> Result<bool> {
        match std::fs::remove_file(self.lock_path(ticket)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads an entry's payload.
    pub fn read(&self, ticket: &Ticket) -> Result<Vec<u8>> {
        let path = self.path_of(ticket)?;
        #[cfg(test)]
        if self.fail_next_read.swap(false, Ordering::Relaxed) {
            return Err(DirqError::Io(io::Error::other("injected read failure")));
        }
        Ok(std::fs::read(path)?)
    }

    /// Makes the next `read` fail, for exercising caller error paths.
    #[cfg(test)]
    pub fn fail_next_read(&self) {
        self.fail_next_read
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// Permanently removes an entry (payload and lock file).
    ///
    /// Callers must hold the entry's lock. The removal is made durable with a
    /// directory fsync.
    pub fn remove(&self, ticket: &Ticket) -> Result<()> {
        let path = self.path_of(ticket)?;
        std::fs::remove_file(&path)?;
        let _ = std::fs::remove_file(self.lock_path(ticket)?);
        if let Some(parent) = path.parent() {
            fsync_dir(parent)?;
        }
        Ok(())
    }

    /// Garbage-collects the queue directory.
    ///
    /// Removes leftover temp files from interrupted writes, lock files whose
    /// payload is gone, and shard directories that became empty after their
    /// entries were removed. Returns the number of directories removed.
    pub fn purge(&self) -> Result<usize> {
        let mut removed_dirs = 0;

        for shard in std::fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let shard_path = shard.path();

            let mut occupied = false;
            for entry in std::fs::read_dir(&shard_path)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    occupied = true;
                    continue;
                };
                if name.ends_with(".tmp") {
                    let _ = std::fs::remove_file(entry.path());
                } else if let Some(stem) = name.strip_suffix(".lock") {
                    // A lock without its payload is debris from a crashed
                    // consumer; nothing will ever release it.
                    if shard_path.join(stem).exists() {
                        occupied = true;
                    } else {
                        let _ = std::fs::remove_file(entry.path());
                    }
                } else {
                    occupied = true;
                }
            }

            if !occupied && std::fs::remove_dir(&shard_path).is_ok() {
                removed_dirs += 1;
            }
        }
        Ok(removed_dirs)
    }
}
