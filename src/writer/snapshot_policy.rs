use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Default)]
struct SnapshotRegistry {
    /// File set of the last successful commit.
    last_commit_files: Vec<PathBuf>,
    /// Outstanding snapshots, by id.
    pinned: HashMap<u64, Vec<PathBuf>>,
    next_snapshot_id: u64,
}

/// Snapshot-retention policy.
///
/// A sibling of the writer and the searcher holder, owned by the index;
/// the writer reports each commit to it under the write lock, and the
/// backup takes a [`Snapshot`] that pins the reported file set against
/// commit-time pruning until the snapshot is dropped.
#[derive(Clone, Default)]
pub struct SnapshotPolicy {
    registry: Arc<Mutex<SnapshotRegistry>>,
}

impl SnapshotPolicy {
    pub fn new() -> SnapshotPolicy {
        SnapshotPolicy::default()
    }

    /// Records the file set of a commit that just succeeded.
    pub fn on_commit(&self, files: Vec<PathBuf>) {
        self.registry.lock().last_commit_files = files;
    }

    /// Pins the last successful commit. Its files survive pruning until
    /// the returned snapshot is released.
    pub fn snapshot(&self) -> Snapshot {
        let mut registry = self.registry.lock();
        let snapshot_id = registry.next_snapshot_id;
        registry.next_snapshot_id += 1;
        let files = registry.last_commit_files.clone();
        registry.pinned.insert(snapshot_id, files.clone());
        Snapshot { snapshot_id, files, registry: self.registry.clone() }
    }

    pub fn is_pinned(&self, path: &Path) -> bool {
        self.registry
            .lock()
            .pinned
            .values()
            .any(|files| files.iter().any(|pinned| pinned == path))
    }

    pub fn has_outstanding_snapshots(&self) -> bool {
        !self.registry.lock().pinned.is_empty()
    }
}

/// A pinned set of commit files. Released on drop, on every exit path
/// of the backup that took it.
pub struct Snapshot {
    snapshot_id: u64,
    files: Vec<PathBuf>,
    registry: Arc<Mutex<SnapshotRegistry>>,
}

impl Snapshot {
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.registry.lock().pinned.remove(&self.snapshot_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_pins_last_commit_files() {
        let policy = SnapshotPolicy::new();
        policy.on_commit(vec![PathBuf::from("segments_1"), PathBuf::from("a.cfs")]);
        assert!(!policy.is_pinned(Path::new("a.cfs")));

        let snapshot = policy.snapshot();
        assert!(policy.is_pinned(Path::new("a.cfs")));
        assert!(policy.is_pinned(Path::new("segments_1")));
        assert!(!policy.is_pinned(Path::new("b.cfs")));
        assert_eq!(snapshot.files().len(), 2);

        // a later commit does not unpin the outstanding snapshot
        policy.on_commit(vec![PathBuf::from("segments_2"), PathBuf::from("b.cfs")]);
        assert!(policy.is_pinned(Path::new("a.cfs")));

        drop(snapshot);
        assert!(!policy.is_pinned(Path::new("a.cfs")));
        assert!(!policy.has_outstanding_snapshots());
    }

    #[test]
    fn test_overlapping_snapshots() {
        let policy = SnapshotPolicy::new();
        policy.on_commit(vec![PathBuf::from("a.cfs")]);
        let first = policy.snapshot();
        policy.on_commit(vec![PathBuf::from("b.cfs")]);
        let second = policy.snapshot();
        assert!(policy.is_pinned(Path::new("a.cfs")));
        assert!(policy.is_pinned(Path::new("b.cfs")));
        drop(first);
        assert!(!policy.is_pinned(Path::new("a.cfs")));
        assert!(policy.is_pinned(Path::new("b.cfs")));
        drop(second);
        assert!(!policy.has_outstanding_snapshots());
    }
}
