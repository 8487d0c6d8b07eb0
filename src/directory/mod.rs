pub mod directory;
pub mod directory_lock;
pub mod error;
pub mod fs_directory;
pub mod ram_directory;

use std::path::Path;

pub use self::directory::{Directory, DirectoryLock, FileSlice};
pub use self::directory_lock::{Lock, META_LOCK, WRITER_LOCK, WRITING_TO_INDEX_LOCK};
pub use self::fs_directory::FsDirectory;
pub use self::ram_directory::RamDirectory;

/// Lock files never participate in commits, backups or materialization.
pub fn is_lock_file(path: &Path) -> bool {
    path.extension().map(|extension| extension == "lock").unwrap_or(false)
}

/// Whether a file belongs to the index format proper: commit files,
/// segment files and the engine version marker.
pub fn is_index_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if name == "segments.gen" || name == "index.version" || name.starts_with("segments_") {
        return true;
    }
    name.ends_with(".cfs") || name.ends_with(".cfe") || name.ends_with(".si")
}

/// Copies every non-lock file of `src` into `dest`.
///
/// Used when a memory-backed index moves to disk and by restore.
/// Returns the number of bytes copied.
pub fn materialize_directory(src: &dyn Directory, dest: &dyn Directory) -> crate::Result<u64> {
    let mut copied = 0u64;
    let mut files = src.list_files()?;
    files.sort();
    for path in files {
        if is_lock_file(&path) {
            continue;
        }
        let data = src.atomic_read(&path)?;
        copied += data.len() as u64;
        dest.atomic_write(&path, &data)?;
    }
    Ok(copied)
}
