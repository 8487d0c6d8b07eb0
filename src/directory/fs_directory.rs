use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atomicwrites::{AtomicFile, OverwriteBehavior};
use fs4::FileExt;
use log::warn;
use memmap2::Mmap;

use crate::directory::directory::{Directory, DirectoryLock, FileSlice};
use crate::directory::directory_lock::Lock;
use crate::directory::error::{LockError, OpenReadError, OpenWriteError};

/// File-system backed directory rooted at one index path.
///
/// Payload reads go through a memory map; metadata files are written
/// atomically (write to a temporary file, then rename).
#[derive(Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Opens the directory, creating it if needed.
    pub fn open_or_create<P: AsRef<Path>>(root: P) -> crate::Result<FsDirectory> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }
        Ok(FsDirectory { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl std::fmt::Debug for FsDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FsDirectory({:?})", self.root)
    }
}

struct MmapBytes(Mmap);

impl AsRef<[u8]> for MmapBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

struct FsLockWitness {
    file: File,
    filepath: PathBuf,
}

impl Drop for FsLockWitness {
    fn drop(&mut self) {
        if let Err(io_error) = self.file.unlock() {
            warn!("failed to unlock {:?}: {io_error}", self.filepath);
        }
        let _ = fs::remove_file(&self.filepath);
    }
}

impl Directory for FsDirectory {
    fn atomic_read(&self, path: &Path) -> Result<Vec<u8>, OpenReadError> {
        let full_path = self.resolve(path);
        fs::read(&full_path).map_err(|io_error| {
            if io_error.kind() == io::ErrorKind::NotFound {
                OpenReadError::FileDoesNotExist(path.to_path_buf())
            } else {
                OpenReadError::wrap_io_error(io_error, path.to_path_buf())
            }
        })
    }

    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), OpenWriteError> {
        let full_path = self.resolve(path);
        let af = AtomicFile::new(&full_path, OverwriteBehavior::AllowOverwrite);
        af.write(|f| io::Write::write_all(f, data)).map_err(|error| {
            let io_error = match error {
                atomicwrites::Error::Internal(io_error) => io_error,
                atomicwrites::Error::User(io_error) => io_error,
            };
            OpenWriteError::wrap_io_error(io_error, path.to_path_buf())
        })
    }

    fn open_read(&self, path: &Path) -> Result<FileSlice, OpenReadError> {
        let full_path = self.resolve(path);
        let file = File::open(&full_path).map_err(|io_error| {
            if io_error.kind() == io::ErrorKind::NotFound {
                OpenReadError::FileDoesNotExist(path.to_path_buf())
            } else {
                OpenReadError::wrap_io_error(io_error, path.to_path_buf())
            }
        })?;
        let len = file
            .metadata()
            .map_err(|io_error| OpenReadError::wrap_io_error(io_error, path.to_path_buf()))?
            .len();
        if len == 0 {
            // mmap of an empty file is not portable
            return Ok(FileSlice::from_bytes(Vec::new()));
        }
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|io_error| OpenReadError::wrap_io_error(io_error, path.to_path_buf()))?;
        Ok(FileSlice::new(Arc::new(MmapBytes(mmap))))
    }

    fn delete(&self, path: &Path) -> Result<(), OpenReadError> {
        let full_path = self.resolve(path);
        fs::remove_file(&full_path).map_err(|io_error| {
            if io_error.kind() == io::ErrorKind::NotFound {
                OpenReadError::FileDoesNotExist(path.to_path_buf())
            } else {
                OpenReadError::wrap_io_error(io_error, path.to_path_buf())
            }
        })
    }

    fn exists(&self, path: &Path) -> Result<bool, OpenReadError> {
        Ok(self.resolve(path).exists())
    }

    fn list_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(PathBuf::from(entry.file_name()));
            }
        }
        Ok(files)
    }

    fn total_size(&self) -> io::Result<u64> {
        let mut total = 0u64;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn acquire_lock(&self, lock: &Lock) -> Result<DirectoryLock, LockError> {
        let filepath = self.resolve(&lock.filepath);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&filepath)
            .map_err(|io_error| LockError::wrap_io_error(io_error, lock.filepath.clone()))?;
        let lock_result = if lock.is_blocking {
            file.lock_exclusive()
        } else {
            file.try_lock_exclusive()
        };
        lock_result.map_err(|io_error| {
            if io_error.kind() == io::ErrorKind::WouldBlock {
                LockError::LockBusy(lock.filepath.clone())
            } else {
                LockError::wrap_io_error(io_error, lock.filepath.clone())
            }
        })?;
        Ok(DirectoryLock::from_witness(Box::new(FsLockWitness { file, filepath })))
    }

    fn is_ram(&self) -> bool {
        false
    }

    fn box_clone(&self) -> Box<dyn Directory> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::directory_lock::WRITER_LOCK;

    #[test]
    fn test_fs_atomic_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::open_or_create(tmp.path().join("idx")).unwrap();
        dir.atomic_write(Path::new("index.version"), b"1\n").unwrap();
        assert_eq!(dir.atomic_read(Path::new("index.version")).unwrap(), b"1\n");
        let listed = dir.list_files().unwrap();
        assert_eq!(listed, vec![PathBuf::from("index.version")]);
        assert_eq!(dir.total_size().unwrap(), 2);
    }

    #[test]
    fn test_open_read_maps_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::open_or_create(tmp.path()).unwrap();
        dir.atomic_write(Path::new("a.cfs"), b"payload-bytes").unwrap();
        let slice = dir.open_read(Path::new("a.cfs")).unwrap();
        assert_eq!(slice.as_bytes(), b"payload-bytes");
    }

    #[test]
    fn test_lock_file_is_exclusive_and_released() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::open_or_create(tmp.path()).unwrap();
        let guard = dir.acquire_lock(&WRITER_LOCK).unwrap();
        assert!(matches!(dir.acquire_lock(&WRITER_LOCK), Err(LockError::LockBusy(_))));
        drop(guard);
        let _reacquired = dir.acquire_lock(&WRITER_LOCK).unwrap();
    }
}
