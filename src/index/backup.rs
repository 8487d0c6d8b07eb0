use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::common::errors::EngineError;
use crate::directory::error::OpenReadError;
use crate::directory::{is_lock_file, Directory, FsDirectory};
use crate::index::index::Index;
use crate::segment::{load_current_commit, SegmentMetaInventory};
use crate::writer::Snapshot;

/// Cumulative list of files present in this and all previous backup
/// layers, one name per line.
fn manifest_filename(index_id: u32) -> String {
    format!("{index_id}.all-existing-index-files")
}

/// Names of the files a restore of this layer needs, one per line.
/// Deleted when the backup is abandoned, so restore forces a reset.
const REQUIRED_FILES_FILE: &str = "index-files.required-for-index-restore";

/// Where a backup goes: `<backup_dir>/[<incremental_tag>/]`.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub backup_dir: PathBuf,
    pub incremental_tag: Option<String>,
}

impl BackupRequest {
    pub fn full(backup_dir: impl Into<PathBuf>) -> BackupRequest {
        BackupRequest { backup_dir: backup_dir.into(), incremental_tag: None }
    }

    pub fn incremental(backup_dir: impl Into<PathBuf>, tag: impl Into<String>) -> BackupRequest {
        BackupRequest { backup_dir: backup_dir.into(), incremental_tag: Some(tag.into()) }
    }

    fn layer_dir(&self) -> PathBuf {
        match &self.incremental_tag {
            Some(tag) => self.backup_dir.join(tag),
            None => self.backup_dir.clone(),
        }
    }
}

/// Point-in-time hot backup of one index, concurrent with live
/// indexing.
///
/// A memory-backed index is materialized first. Under the write lock an
/// empty commit runs and `segments.gen` + `index.version` are captured
/// (they name the exact snapshot); the lock is then released and the
/// retention policy pins the commit's files while they are copied.
/// Incremental layers skip files already listed in any previous layer's
/// manifest.
pub fn backup_index(index: &Index, request: &BackupRequest) -> crate::Result<()> {
    let (directory, segments_gen, index_version) = index.backup_prepare()?;
    let snapshot = index.retention().snapshot();
    info!(
        "backing up index '{}' ({} snapshot files) to {:?}",
        index.definition().name,
        snapshot.files().len(),
        request.layer_dir(),
    );
    // the snapshot releases on drop, success or failure
    run_backup(
        directory.as_ref(),
        index.definition().index_id,
        &snapshot,
        request,
        &segments_gen,
        &index_version,
    )
}

fn read_previous_manifests(
    backup_dir: &Path,
    manifest: &str,
) -> io::Result<BTreeSet<String>> {
    let mut known = BTreeSet::new();
    let mut candidates = vec![backup_dir.join(manifest)];
    if backup_dir.is_dir() {
        for entry in fs::read_dir(backup_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                candidates.push(entry.path().join(manifest));
            }
        }
    }
    for candidate in candidates {
        match fs::read_to_string(&candidate) {
            Ok(listing) => {
                known.extend(listing.lines().filter(|line| !line.is_empty()).map(str::to_string));
            }
            Err(read_error) if read_error.kind() == io::ErrorKind::NotFound => {}
            Err(read_error) => return Err(read_error),
        }
    }
    Ok(known)
}

pub(crate) fn run_backup(
    directory: &dyn Directory,
    index_id: u32,
    snapshot: &Snapshot,
    request: &BackupRequest,
    segments_gen: &[u8],
    index_version: &[u8],
) -> crate::Result<()> {
    let layer_dir = request.layer_dir();
    let dest_dir = layer_dir.join("Indexes").join(index_id.to_string());
    fs::create_dir_all(&dest_dir)?;

    // the two files captured under the write lock pin the snapshot
    // identity; everything else is copied from the live directory,
    // which the retention policy keeps from pruning these files
    fs::write(dest_dir.join("segments.gen"), segments_gen)?;
    fs::write(dest_dir.join("index.version"), index_version)?;

    let manifest = manifest_filename(index_id);
    let already = read_previous_manifests(&request.backup_dir, &manifest)?;
    let mut cumulative = already.clone();
    let mut required: Vec<String> = Vec::new();
    let mut newly_copied = 0usize;

    let copy_result: crate::Result<()> = (|| {
        for file in snapshot.files() {
            if is_lock_file(file) {
                continue;
            }
            let name = file.to_string_lossy().into_owned();
            required.push(name.clone());
            if name == "segments.gen" || name == "index.version" {
                cumulative.insert(name);
                continue;
            }
            if already.contains(&name) {
                continue;
            }
            let bytes = directory.atomic_read(file).map_err(|read_error| match read_error {
                OpenReadError::FileDoesNotExist(path) => EngineError::CorruptIndex(format!(
                    "snapshot file {path:?} disappeared during backup"
                )),
                other => other.into(),
            })?;
            fs::write(dest_dir.join(&name), bytes)?;
            cumulative.insert(name);
            newly_copied += 1;
        }
        Ok(())
    })();

    match copy_result {
        Ok(()) => {
            // an empty incremental layer still writes a valid manifest
            let mut manifest_body =
                cumulative.iter().cloned().collect::<Vec<String>>().join("\n");
            manifest_body.push('\n');
            fs::write(layer_dir.join(&manifest), manifest_body)?;

            let mut required_body = required.join("\n");
            required_body.push('\n');
            fs::write(dest_dir.join(REQUIRED_FILES_FILE), required_body)?;
            info!("backup of index {index_id} copied {newly_copied} new files");
            Ok(())
        }
        Err(EngineError::CorruptIndex(detail)) => {
            warn!("abandoning backup of index {index_id}: {detail}");
            let _ = fs::remove_file(dest_dir.join(REQUIRED_FILES_FILE));
            Ok(())
        }
        Err(other) => Err(other),
    }
}

/// Rebuilds an index directory from a full backup layer plus the given
/// incremental tags, applied in order. The restored directory is
/// verified to resolve to a consistent commit.
pub fn restore_index(
    backup_dir: &Path,
    incremental_tags: &[&str],
    index_id: u32,
    target_dir: &Path,
) -> crate::Result<()> {
    let mut layers = vec![backup_dir.to_path_buf()];
    layers.extend(incremental_tags.iter().map(|tag| backup_dir.join(tag)));

    let target = FsDirectory::open_or_create(target_dir)?;
    let mut restored_any = false;
    for layer in &layers {
        let source_dir = layer.join("Indexes").join(index_id.to_string());
        if !source_dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&source_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy() == REQUIRED_FILES_FILE {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            target.atomic_write(Path::new(&name), &bytes)?;
            restored_any = true;
        }
    }
    if !restored_any {
        return Err(EngineError::CorruptIndex(format!(
            "no backup layers for index {index_id} under {backup_dir:?}"
        )));
    }
    // a restore over an abandoned backup must not go unnoticed
    let inventory = SegmentMetaInventory::default();
    load_current_commit(&target, &inventory)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::cancel::CancellationToken;
    use crate::common::etag::Etag;
    use crate::directory::RamDirectory;
    use crate::index::definition::{FieldIndexing, IndexDefinition, DOCUMENT_ID_FIELD};
    use crate::index::index::{Index, IndexContext};
    use crate::index::{IndexEntry, IndexingBatch, IndexingFn, SourceDocument};
    use crate::query::IndexQuery;
    use crate::writer::SnapshotPolicy;
    use std::sync::Arc;

    fn stored_value_indexing_fn() -> IndexingFn {
        Arc::new(|document: &SourceDocument| {
            let mut entry = IndexEntry::new();
            entry.add_field(DOCUMENT_ID_FIELD, &document.key);
            if let Some(value) = document.data.get("value").and_then(|value| value.as_str()) {
                entry.add_field("value", value);
            }
            Ok(vec![entry])
        })
    }

    fn open_index(disk_path: &Path) -> Index {
        let mut definition = IndexDefinition::new("docs", 7);
        definition.indexes.insert("value".to_string(), FieldIndexing::NotIndexed);
        let mut context = IndexContext::new(definition, stored_value_indexing_fn());
        context.disk_path = Some(disk_path.to_path_buf());
        Index::open(context).unwrap()
    }

    fn document(key: &str, value: &str, counter: u64) -> SourceDocument {
        SourceDocument {
            key: key.to_string(),
            etag: Etag::from_counter(counter),
            data: serde_json::json!({ "value": value }),
        }
    }

    fn batch(documents: Vec<SourceDocument>) -> IndexingBatch {
        IndexingBatch { documents, index_up_to_date: false }
    }

    fn match_all_keys(index: &Index) -> Vec<String> {
        let token = CancellationToken::new();
        let mut keys: Vec<String> = index
            .query(IndexQuery::new("").with_page(0, 100), &token)
            .unwrap()
            .map(|result| result.unwrap().key.unwrap())
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_backup_restore_round_trip_with_overflow_value() {
        let workspace = tempfile::tempdir().unwrap();
        let index_dir = workspace.path().join("index");
        let backup_dir = workspace.path().join("backup");
        let restore_dir = workspace.path().join("restored");
        let token = CancellationToken::new();

        let overflow_value: String =
            std::iter::repeat("abcdefghij").take(2_000).collect::<String>();
        assert_eq!(overflow_value.len(), 20_000);

        let index = open_index(&index_dir);
        let documents =
            (0..5).map(|i| document(&format!("items/{i}"), "small", i + 1)).collect();
        index.index_documents(&batch(documents), &token).unwrap();
        index
            .index_documents(&batch(vec![document("items/3", &overflow_value, 6)]), &token)
            .unwrap();
        index.remove(&["items/1".to_string(), "items/2".to_string()], &token).unwrap();

        index.backup(&BackupRequest::full(&backup_dir)).unwrap();
        index.dispose();

        restore_index(&backup_dir, &[], 7, &restore_dir).unwrap();
        let restored = open_index(&restore_dir);
        assert_eq!(match_all_keys(&restored), vec!["items/0", "items/3", "items/4"]);

        let guard = restored.acquire_searcher();
        let mut value = None;
        guard.searcher().for_each_term_doc(DOCUMENT_ID_FIELD, "items/3", |doc, _| {
            value = guard
                .searcher()
                .stored(doc)
                .and_then(|stored| stored.first_value("value"))
                .map(str::to_string);
        });
        assert_eq!(value.as_deref(), Some(overflow_value.as_str()));
    }

    #[test]
    fn test_incremental_backup_copies_only_new_files() {
        let workspace = tempfile::tempdir().unwrap();
        let index_dir = workspace.path().join("index");
        let backup_dir = workspace.path().join("backup");
        let token = CancellationToken::new();

        let index = open_index(&index_dir);
        index
            .index_documents(&batch(vec![document("items/0", "a", 1)]), &token)
            .unwrap();
        index.backup(&BackupRequest::full(&backup_dir)).unwrap();
        let full_manifest =
            fs::read_to_string(backup_dir.join(manifest_filename(7))).unwrap();
        let full_files: BTreeSet<&str> =
            full_manifest.lines().filter(|line| !line.is_empty()).collect();

        index
            .index_documents(&batch(vec![document("items/1", "b", 2)]), &token)
            .unwrap();
        index.backup(&BackupRequest::incremental(&backup_dir, "inc-1")).unwrap();

        let incremental_manifest =
            fs::read_to_string(backup_dir.join("inc-1").join(manifest_filename(7))).unwrap();
        let incremental_files: BTreeSet<&str> =
            incremental_manifest.lines().filter(|line| !line.is_empty()).collect();

        // the new layer adds exactly the files created since the full
        // backup: one segment (.si + .cfs) and one commit point
        let new_files: Vec<&&str> = incremental_files.difference(&full_files).collect();
        let new_segment_files =
            new_files.iter().filter(|name| name.ends_with(".cfs") || name.ends_with(".si")).count();
        assert_eq!(new_segment_files, 2, "new files: {new_files:?}");

        let copied_dir = backup_dir.join("inc-1").join("Indexes").join("7");
        let copied_segments = fs::read_dir(&copied_dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy().into_owned();
                name.ends_with(".cfs") || name.ends_with(".si")
            })
            .count();
        assert_eq!(copied_segments, 2);

        // restoring full + incremental yields both documents
        let restore_dir = workspace.path().join("restored");
        restore_index(&backup_dir, &["inc-1"], 7, &restore_dir).unwrap();
        let restored = open_index(&restore_dir);
        assert_eq!(match_all_keys(&restored), vec!["items/0", "items/1"]);
    }

    #[test]
    fn test_empty_incremental_backup_still_writes_manifest() {
        let workspace = tempfile::tempdir().unwrap();
        let index_dir = workspace.path().join("index");
        let backup_dir = workspace.path().join("backup");
        let token = CancellationToken::new();

        let index = open_index(&index_dir);
        index
            .index_documents(&batch(vec![document("items/0", "a", 1)]), &token)
            .unwrap();
        index.backup(&BackupRequest::full(&backup_dir)).unwrap();
        // nothing changed since the full backup
        index.backup(&BackupRequest::incremental(&backup_dir, "inc-empty")).unwrap();

        let manifest_path = backup_dir.join("inc-empty").join(manifest_filename(7));
        assert!(manifest_path.exists());
        let required_path = backup_dir
            .join("inc-empty")
            .join("Indexes")
            .join("7")
            .join(REQUIRED_FILES_FILE);
        assert!(required_path.exists());
    }

    #[test]
    fn test_missing_snapshot_file_abandons_backup_gracefully() {
        let workspace = tempfile::tempdir().unwrap();
        let backup_dir = workspace.path().join("backup");
        let directory = RamDirectory::create();
        let policy = SnapshotPolicy::new();
        policy.on_commit(vec![PathBuf::from("segments_1"), PathBuf::from("ghost.cfs")]);
        let snapshot = policy.snapshot();

        let request = BackupRequest::full(&backup_dir);
        run_backup(&directory, 9, &snapshot, &request, b"1\n", b"1\n").unwrap();

        let dest_dir = backup_dir.join("Indexes").join("9");
        assert!(!dest_dir.join(REQUIRED_FILES_FILE).exists());
        // the snapshot-identity files were still captured
        assert!(dest_dir.join("segments.gen").exists());
    }
}
