use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::directory::directory_lock::Lock;
use crate::directory::error::{LockError, OpenReadError, OpenWriteError};

/// Read-only view over the full contents of one file.
///
/// The backing storage is either an in-memory buffer or a memory map;
/// either way the bytes stay valid for as long as the slice is held.
#[derive(Clone)]
pub struct FileSlice {
    data: Arc<dyn AsRef<[u8]> + Send + Sync + 'static>,
}

impl FileSlice {
    pub fn new(data: Arc<dyn AsRef<[u8]> + Send + Sync + 'static>) -> FileSlice {
        FileSlice { data }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> FileSlice {
        FileSlice { data: Arc::new(bytes) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        (*self.data).as_ref()
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl fmt::Debug for FileSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSlice({} bytes)", self.len())
    }
}

/// Guard object for a held directory lock.
///
/// The lock is released when the guard is dropped, on every exit path
/// of the scope that acquired it.
pub struct DirectoryLock {
    _witness: Box<dyn Send + Sync + 'static>,
}

impl DirectoryLock {
    pub fn from_witness(witness: Box<dyn Send + Sync + 'static>) -> DirectoryLock {
        DirectoryLock { _witness: witness }
    }
}

impl fmt::Debug for DirectoryLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DirectoryLock")
    }
}

/// Abstraction over the directory of index segment files.
///
/// Two implementations exist: [`RamDirectory`](crate::directory::RamDirectory)
/// for new indexes that have not earned a place on disk yet, and
/// [`FsDirectory`](crate::directory::FsDirectory). The writer is the sole
/// mutator; searchers and backup only read.
pub trait Directory: Send + Sync + fmt::Debug + 'static {
    /// Reads the full content of a file in one atomic step with respect
    /// to concurrent `atomic_write` calls.
    fn atomic_read(&self, path: &Path) -> Result<Vec<u8>, OpenReadError>;

    /// Atomically replaces the content of a file. Readers observe either
    /// the old content or the new one, never a mix.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), OpenWriteError>;

    /// Opens a file for reading. On the fs implementation this memory
    /// maps the file instead of copying it.
    fn open_read(&self, path: &Path) -> Result<FileSlice, OpenReadError>;

    /// Removes a file. Removing a missing file reports
    /// `FileDoesNotExist`.
    fn delete(&self, path: &Path) -> Result<(), OpenReadError>;

    fn exists(&self, path: &Path) -> Result<bool, OpenReadError>;

    /// Atomic snapshot of the file listing.
    fn list_files(&self) -> io::Result<Vec<PathBuf>>;

    /// Sum of all file sizes, used to decide when a memory-backed index
    /// must move to disk.
    fn total_size(&self) -> io::Result<u64>;

    fn acquire_lock(&self, lock: &Lock) -> Result<DirectoryLock, LockError>;

    /// Whether this directory lives in memory only.
    fn is_ram(&self) -> bool;

    fn box_clone(&self) -> Box<dyn Directory>;
}

impl Clone for Box<dyn Directory> {
    fn clone(&self) -> Box<dyn Directory> {
        self.box_clone()
    }
}
