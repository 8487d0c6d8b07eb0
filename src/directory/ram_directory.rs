use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::directory::directory::{Directory, DirectoryLock, FileSlice};
use crate::directory::directory_lock::Lock;
use crate::directory::error::{LockError, OpenReadError, OpenWriteError};

#[derive(Default)]
struct LockRegistry {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

/// Memory-backed directory.
///
/// Every new index starts here until it grows past the configured
/// in-memory budget or becomes current enough to be worth persisting,
/// at which point its files are materialized into an
/// [`FsDirectory`](crate::directory::FsDirectory).
#[derive(Clone, Default)]
pub struct RamDirectory {
    files: Arc<RwLock<HashMap<PathBuf, Arc<Vec<u8>>>>>,
    locks: Arc<LockRegistry>,
}

impl RamDirectory {
    pub fn create() -> RamDirectory {
        RamDirectory::default()
    }
}

impl std::fmt::Debug for RamDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RamDirectory({} files)", self.files.read().len())
    }
}

struct RamLockWitness {
    registry: Arc<LockRegistry>,
    filepath: PathBuf,
}

impl Drop for RamLockWitness {
    fn drop(&mut self) {
        self.registry.held.lock().remove(&self.filepath);
        self.registry.released.notify_all();
    }
}

impl Directory for RamDirectory {
    fn atomic_read(&self, path: &Path) -> Result<Vec<u8>, OpenReadError> {
        self.files
            .read()
            .get(path)
            .map(|data| data.as_ref().clone())
            .ok_or_else(|| OpenReadError::FileDoesNotExist(path.to_path_buf()))
    }

    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), OpenWriteError> {
        self.files.write().insert(path.to_path_buf(), Arc::new(data.to_vec()));
        Ok(())
    }

    fn open_read(&self, path: &Path) -> Result<FileSlice, OpenReadError> {
        let files = self.files.read();
        let data = files
            .get(path)
            .ok_or_else(|| OpenReadError::FileDoesNotExist(path.to_path_buf()))?
            .clone();
        Ok(FileSlice::new(data))
    }

    fn delete(&self, path: &Path) -> Result<(), OpenReadError> {
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| OpenReadError::FileDoesNotExist(path.to_path_buf()))
    }

    fn exists(&self, path: &Path) -> Result<bool, OpenReadError> {
        Ok(self.files.read().contains_key(path))
    }

    fn list_files(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn total_size(&self) -> io::Result<u64> {
        Ok(self.files.read().values().map(|data| data.len() as u64).sum())
    }

    fn acquire_lock(&self, lock: &Lock) -> Result<DirectoryLock, LockError> {
        let mut held = self.locks.held.lock();
        while held.contains(&lock.filepath) {
            if !lock.is_blocking {
                return Err(LockError::LockBusy(lock.filepath.clone()));
            }
            self.locks.released.wait(&mut held);
        }
        held.insert(lock.filepath.clone());
        Ok(DirectoryLock::from_witness(Box::new(RamLockWitness {
            registry: self.locks.clone(),
            filepath: lock.filepath.clone(),
        })))
    }

    fn is_ram(&self) -> bool {
        true
    }

    fn box_clone(&self) -> Box<dyn Directory> {
        Box::new(self.clone())
    }
}
