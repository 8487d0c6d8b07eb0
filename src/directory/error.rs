use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Error while opening a file for reading.
#[derive(Debug, Clone, Error)]
pub enum OpenReadError {
    #[error("the file '{0}' does not exist")]
    FileDoesNotExist(PathBuf),

    #[error("an io error occurred while opening '{filepath}' for reading: {io_error}")]
    IoError {
        io_error: Arc<io::Error>,
        filepath: PathBuf,
    },
}

impl OpenReadError {
    pub fn wrap_io_error(io_error: io::Error, filepath: PathBuf) -> OpenReadError {
        OpenReadError::IoError { io_error: Arc::new(io_error), filepath }
    }
}

/// Error while opening a file for writing.
#[derive(Debug, Clone, Error)]
pub enum OpenWriteError {
    #[error("an io error occurred while opening '{filepath}' for writing: {io_error}")]
    IoError {
        io_error: Arc<io::Error>,
        filepath: PathBuf,
    },
}

impl OpenWriteError {
    pub fn wrap_io_error(io_error: io::Error, filepath: PathBuf) -> OpenWriteError {
        OpenWriteError::IoError { io_error: Arc::new(io_error), filepath }
    }
}

/// Error while acquiring a directory lock.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// The lock is already held. For the advisory indexing lock this is
    /// fatal for the current call; the caller does not spin on it.
    #[error("could not acquire lock '{0}' as it is already held")]
    LockBusy(PathBuf),

    #[error("an io error occurred while acquiring lock '{filepath}': {io_error}")]
    IoError {
        io_error: Arc<io::Error>,
        filepath: PathBuf,
    },
}

impl LockError {
    pub fn wrap_io_error(io_error: io::Error, filepath: PathBuf) -> LockError {
        LockError::IoError { io_error: Arc::new(io_error), filepath }
    }
}
