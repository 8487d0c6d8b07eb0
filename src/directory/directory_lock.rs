use std::path::PathBuf;

use once_cell::sync::Lazy;

/// A directory lock.
///
/// A lock is associated with a specific path and is passed to
/// [`Directory::acquire_lock`](crate::directory::Directory::acquire_lock).
/// Depending on the directory implementation, the lock relies on the
/// creation and deletion of this filepath or on an in-memory registry.
#[derive(Debug)]
pub struct Lock {
    pub filepath: PathBuf,
    /// Whether acquiring the lock blocks until it is available.
    /// Non-blocking acquisition returns `LockBusy` immediately when
    /// someone else holds the lock.
    pub is_blocking: bool,
}

/// Advisory lock taken before any mutation of the segment set.
///
/// Failing to obtain it is a fatal error for the current apply call. If
/// the process is killed and the file remains, it is safe to remove it
/// manually after checking no writer is running.
pub static WRITING_TO_INDEX_LOCK: Lazy<Lock> =
    Lazy::new(|| Lock { filepath: PathBuf::from("writing-to-index.lock"), is_blocking: false });

/// Only one writer may own an index directory at a time. The lock is
/// bound to the lifetime of the library writer.
pub static WRITER_LOCK: Lazy<Lock> =
    Lazy::new(|| Lock { filepath: PathBuf::from("write.lock"), is_blocking: false });

/// Protects segment files being opened by a new searcher from the
/// commit-time pruning that deletes unreferenced files. Opening readers
/// is fast, so this one blocks.
pub static META_LOCK: Lazy<Lock> =
    Lazy::new(|| Lock { filepath: PathBuf::from(".index-meta.lock"), is_blocking: true });
