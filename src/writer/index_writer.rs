use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::analysis::Analyzer;
use crate::directory::error::OpenReadError;
use crate::directory::{is_index_file, Directory, DirectoryLock, WRITER_LOCK};
use crate::index::definition::{IndexDefinition, DOCUMENT_ID_FIELD};
use crate::index::IndexEntry;
use crate::segment::segment_writer::write_segment_files;
use crate::segment::{
    load_current_commit, CommitPoint, Posting, SegmentId, SegmentMeta, SegmentMetaInventory,
    SegmentPayload, SegmentReader, SegmentWriter,
};
use crate::writer::snapshot_policy::SnapshotPolicy;
use crate::{INDEX_FORMAT_VERSION, INDEX_VERSION_FILEPATH, SEGMENTS_GEN_FILEPATH};

struct FlushedSegment {
    meta: SegmentMeta,
    reader: SegmentReader,
    /// Deletes that arrived after the flush but before the commit.
    new_tombstones: BTreeSet<u32>,
}

/// Single writer of one index directory.
///
/// Owns `write.lock` for its whole lifetime. Mutations buffer into an
/// in-memory segment; `commit` makes everything durable by writing the
/// segment payloads, the commit point, `segments.gen` and finally
/// `index.version`, then prunes files no commit, snapshot or live
/// reader references anymore.
pub struct IndexWriter {
    directory: Box<dyn Directory>,
    inventory: SegmentMetaInventory,
    committed: CommitPoint,
    committed_readers: Vec<SegmentReader>,
    buffered: SegmentWriter,
    flushed: Vec<FlushedSegment>,
    /// Deletes against committed segments since the last commit.
    pending_tombstones: HashMap<SegmentId, BTreeSet<u32>>,
    // binds the lifetime of write.lock to the writer
    _directory_lock: DirectoryLock,
}

impl IndexWriter {
    /// Opens the writer, acquiring the directory's writer lock. Fails
    /// with `LockFailure` when another writer owns the directory.
    pub fn open(
        directory: Box<dyn Directory>,
        inventory: SegmentMetaInventory,
    ) -> crate::Result<IndexWriter> {
        let directory_lock = directory.acquire_lock(&WRITER_LOCK)?;
        let committed = load_current_commit(directory.as_ref(), &inventory)?;
        let committed_readers = committed
            .segments
            .iter()
            .map(|meta| SegmentReader::open(directory.as_ref(), meta))
            .collect::<crate::Result<Vec<_>>>()?;
        info!(
            "opened index writer at generation {} with {} segments",
            committed.generation,
            committed.segments.len(),
        );
        Ok(IndexWriter {
            directory,
            inventory,
            committed,
            committed_readers,
            buffered: SegmentWriter::new(),
            flushed: Vec::new(),
            pending_tombstones: HashMap::new(),
            _directory_lock: directory_lock,
        })
    }

    pub fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    pub fn committed(&self) -> &CommitPoint {
        &self.committed
    }

    /// Readers over the last committed state, tombstones up to date.
    pub fn committed_readers(&self) -> &[SegmentReader] {
        &self.committed_readers
    }

    pub fn ram_bytes(&self) -> usize {
        self.buffered.ram_bytes()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.buffered.doc_count() > 0
            || !self.flushed.is_empty()
            || !self.pending_tombstones.is_empty()
    }

    /// Buffers one index entry.
    pub fn add_entry(
        &mut self,
        entry: &IndexEntry,
        analyzer: &dyn Analyzer,
        definition: &IndexDefinition,
    ) -> u32 {
        self.buffered.index_entry(entry, analyzer, definition)
    }

    /// Deletes every entry of the given document key, wherever it
    /// lives: the in-memory buffer, flushed-but-uncommitted segments or
    /// committed ones. Returns the number of entries deleted.
    pub fn delete_by_key(&mut self, key: &str) -> usize {
        let term = key.to_lowercase();
        let mut deleted = self.buffered.delete_by_key(key);

        for flushed in &mut self.flushed {
            if let Some(postings) = flushed.reader.postings(DOCUMENT_ID_FIELD, &term) {
                for posting in postings {
                    if !flushed.meta.is_tombstoned(posting.doc)
                        && flushed.new_tombstones.insert(posting.doc)
                    {
                        deleted += 1;
                    }
                }
            }
        }

        for reader in &self.committed_readers {
            let Some(postings) = reader.postings(DOCUMENT_ID_FIELD, &term) else {
                continue;
            };
            let pending = self.pending_tombstones.entry(reader.segment_id()).or_default();
            for posting in postings {
                if !reader.is_tombstoned(posting.doc) && pending.insert(posting.doc) {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    /// Writes the in-memory buffer out as a segment without committing
    /// it. The segment joins the next commit.
    pub fn flush(&mut self) -> crate::Result<()> {
        if self.buffered.doc_count() == 0 {
            return Ok(());
        }
        let buffered = std::mem::take(&mut self.buffered);
        let meta = buffered.finalize(self.directory.as_ref(), &self.inventory)?;
        let reader = SegmentReader::open(self.directory.as_ref(), &meta)?;
        self.flushed.push(FlushedSegment { meta, reader, new_tombstones: BTreeSet::new() });
        Ok(())
    }

    /// Commits all pending changes under the given user-data.
    ///
    /// Write order: segment payloads (during flush), the commit point
    /// `segments_<generation>`, `segments.gen`, `index.version`. The
    /// retention policy learns the new commit's file set, then
    /// unreferenced files are pruned.
    pub fn commit(
        &mut self,
        user_data: BTreeMap<String, String>,
        retention: &SnapshotPolicy,
    ) -> crate::Result<()> {
        self.flush()?;

        let mut segments = Vec::new();
        let mut readers = Vec::new();
        for reader in &self.committed_readers {
            let meta = match self.pending_tombstones.remove(&reader.segment_id()) {
                Some(new_tombstones) => {
                    let mut tombstones = reader.meta().tombstones().clone();
                    tombstones.extend(new_tombstones);
                    reader.meta().with_tombstones(tombstones)
                }
                None => reader.meta().clone(),
            };
            if meta.alive_doc_count() == 0 {
                debug!("segment {} has no live documents left, dropping it", meta.id().short_id());
                continue;
            }
            readers.push(reader.clone_with_meta(meta.clone()));
            segments.push(meta);
        }
        for flushed in self.flushed.drain(..) {
            let meta = if flushed.new_tombstones.is_empty() {
                flushed.meta
            } else {
                let mut tombstones = flushed.meta.tombstones().clone();
                tombstones.extend(flushed.new_tombstones);
                flushed.meta.with_tombstones(tombstones)
            };
            if meta.alive_doc_count() == 0 {
                continue;
            }
            readers.push(flushed.reader.clone_with_meta(meta.clone()));
            segments.push(meta);
        }
        self.pending_tombstones.clear();

        let commit = CommitPoint {
            segments,
            generation: self.committed.generation + 1,
            user_data,
        };
        self.write_commit_files(&commit)?;
        retention.on_commit(commit.files());

        self.committed = commit;
        self.committed_readers = readers;
        self.prune_unreferenced_files(retention);
        Ok(())
    }

    /// Merges all live documents into a single fresh segment and
    /// commits. Long-running; the caller holds the index write lock for
    /// the whole duration.
    pub fn optimize(&mut self, retention: &SnapshotPolicy) -> crate::Result<()> {
        if self.has_pending_changes() {
            // carry forward the current user-data
            self.commit(self.committed.user_data.clone(), retention)?;
        }
        if self.committed_readers.len() <= 1 {
            return Ok(());
        }
        info!(
            "optimizing index: merging {} segments into one",
            self.committed_readers.len(),
        );

        let mut merged = SegmentPayload::default();
        for reader in &self.committed_readers {
            let base = merged.stored.len() as u32;
            let mut remap: HashMap<u32, u32> = HashMap::new();
            for old_ord in reader.live_docs() {
                let new_ord = base + remap.len() as u32;
                remap.insert(old_ord, new_ord);
                let stored = reader
                    .stored(old_ord)
                    .expect("live ordinal must have a stored row")
                    .clone();
                merged.stored.push(stored);
            }
            for (field, terms) in reader.postings_map() {
                let merged_field = merged.postings.entry(field.to_string()).or_default();
                for (term, postings) in terms {
                    let merged_postings = merged_field.entry(term.to_string()).or_default();
                    for posting in postings {
                        if let Some(new_ord) = remap.get(&posting.doc) {
                            merged_postings.push(Posting { doc: *new_ord, freq: posting.freq });
                        }
                    }
                }
            }
        }

        let meta = write_segment_files(
            self.directory.as_ref(),
            &self.inventory,
            SegmentId::generate_random(),
            &merged,
            BTreeSet::new(),
        )?;
        let reader = SegmentReader::open(self.directory.as_ref(), &meta)?;

        let commit = CommitPoint {
            segments: vec![meta],
            generation: self.committed.generation + 1,
            user_data: self.committed.user_data.clone(),
        };
        self.write_commit_files(&commit)?;
        retention.on_commit(commit.files());
        self.committed = commit;
        self.committed_readers = vec![reader];
        self.prune_unreferenced_files(retention);
        Ok(())
    }

    fn write_commit_files(&self, commit: &CommitPoint) -> crate::Result<()> {
        let commit_path = CommitPoint::commit_filename(commit.generation);
        self.directory.atomic_write(&commit_path, &serde_json::to_vec(commit)?)?;
        self.directory
            .atomic_write(&SEGMENTS_GEN_FILEPATH, format!("{}\n", commit.generation).as_bytes())?;
        self.directory
            .atomic_write(&INDEX_VERSION_FILEPATH, format!("{INDEX_FORMAT_VERSION}\n").as_bytes())?;
        Ok(())
    }

    /// Deletes index files referenced by no commit, no outstanding
    /// snapshot and no live segment meta. Failures are logged and left
    /// for the next pass; a held memory map can make deletion fail on
    /// some platforms.
    fn prune_unreferenced_files(&self, retention: &SnapshotPolicy) {
        let mut referenced: HashSet<PathBuf> = self.committed.files().into_iter().collect();
        for meta in self.inventory.all() {
            referenced.extend(meta.list_files());
        }
        let files = match self.directory.list_files() {
            Ok(files) => files,
            Err(io_error) => {
                warn!("could not list index files for pruning: {io_error}");
                return;
            }
        };
        for path in files {
            if !is_index_file(&path) || referenced.contains(&path) || retention.is_pinned(&path) {
                continue;
            }
            match self.directory.delete(&path) {
                Ok(()) | Err(OpenReadError::FileDoesNotExist(_)) => {
                    debug!("pruned unreferenced index file {path:?}");
                }
                Err(delete_error) => {
                    warn!("failed to prune {path:?}: {delete_error}");
                }
            }
        }
    }
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("generation", &self.committed.generation)
            .field("segments", &self.committed.segments.len())
            .field("buffered_docs", &self.buffered.doc_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LowercaseKeywordAnalyzer;
    use crate::common::errors::EngineError;
    use crate::directory::RamDirectory;
    use crate::segment::USER_DATA_HIGHEST_ETAG;

    fn entry(key: &str, body: &str) -> IndexEntry {
        IndexEntry::new().with_field(DOCUMENT_ID_FIELD, key).with_field("body", body)
    }

    fn user_data(counter: u64) -> BTreeMap<String, String> {
        let mut user_data = BTreeMap::new();
        user_data.insert(
            USER_DATA_HIGHEST_ETAG.to_string(),
            crate::common::etag::Etag::from_counter(counter).to_hex(),
        );
        user_data
    }

    fn open_writer(directory: &RamDirectory) -> (IndexWriter, SegmentMetaInventory) {
        let inventory = SegmentMetaInventory::default();
        let writer = IndexWriter::open(directory.box_clone(), inventory.clone()).unwrap();
        (writer, inventory)
    }

    #[test]
    fn test_commit_writes_ordered_commit_files() {
        let directory = RamDirectory::create();
        let definition = IndexDefinition::new("t", 1);
        let retention = SnapshotPolicy::new();
        let (mut writer, _inventory) = open_writer(&directory);
        writer.add_entry(&entry("items/1", "a"), &LowercaseKeywordAnalyzer, &definition);
        writer.commit(user_data(1), &retention).unwrap();

        assert_eq!(directory.atomic_read(&SEGMENTS_GEN_FILEPATH).unwrap(), b"1\n");
        assert_eq!(directory.atomic_read(&INDEX_VERSION_FILEPATH).unwrap(), b"1\n");
        assert!(directory.exists(std::path::Path::new("segments_1")).unwrap());
        assert_eq!(writer.committed().alive_doc_count(), 1);
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let directory = RamDirectory::create();
        let (writer, _inventory) = open_writer(&directory);
        let result = IndexWriter::open(directory.box_clone(), SegmentMetaInventory::default());
        assert!(matches!(result, Err(EngineError::LockFailure(_))));
        drop(writer);
        IndexWriter::open(directory.box_clone(), SegmentMetaInventory::default()).unwrap();
    }

    #[test]
    fn test_delete_then_add_within_one_batch() {
        let directory = RamDirectory::create();
        let definition = IndexDefinition::new("t", 1);
        let retention = SnapshotPolicy::new();
        let (mut writer, _inventory) = open_writer(&directory);
        writer.add_entry(&entry("items/1", "old"), &LowercaseKeywordAnalyzer, &definition);
        writer.commit(user_data(1), &retention).unwrap();

        // re-index of the same document: delete then add
        assert_eq!(writer.delete_by_key("items/1"), 1);
        writer.add_entry(&entry("items/1", "new"), &LowercaseKeywordAnalyzer, &definition);
        writer.commit(user_data(2), &retention).unwrap();

        assert_eq!(writer.committed().alive_doc_count(), 1);
        let reader = &writer.committed_readers()[0];
        let ord = reader.live_docs().next().unwrap();
        assert_eq!(reader.stored(ord).unwrap().first_value("body"), Some("new"));
    }

    #[test]
    fn test_old_commit_files_are_pruned() {
        let directory = RamDirectory::create();
        let definition = IndexDefinition::new("t", 1);
        let retention = SnapshotPolicy::new();
        let (mut writer, _inventory) = open_writer(&directory);
        writer.add_entry(&entry("items/1", "a"), &LowercaseKeywordAnalyzer, &definition);
        writer.commit(user_data(1), &retention).unwrap();
        writer.add_entry(&entry("items/2", "b"), &LowercaseKeywordAnalyzer, &definition);
        writer.commit(user_data(2), &retention).unwrap();

        assert!(!directory.exists(std::path::Path::new("segments_1")).unwrap());
        assert!(directory.exists(std::path::Path::new("segments_2")).unwrap());
    }

    #[test]
    fn test_snapshot_protects_files_from_pruning() {
        let directory = RamDirectory::create();
        let definition = IndexDefinition::new("t", 1);
        let retention = SnapshotPolicy::new();
        let (mut writer, _inventory) = open_writer(&directory);
        writer.add_entry(&entry("items/1", "a"), &LowercaseKeywordAnalyzer, &definition);
        writer.commit(user_data(1), &retention).unwrap();

        let snapshot = retention.snapshot();
        writer.add_entry(&entry("items/2", "b"), &LowercaseKeywordAnalyzer, &definition);
        writer.commit(user_data(2), &retention).unwrap();
        assert!(directory.exists(std::path::Path::new("segments_1")).unwrap());

        drop(snapshot);
        writer.add_entry(&entry("items/3", "c"), &LowercaseKeywordAnalyzer, &definition);
        writer.commit(user_data(3), &retention).unwrap();
        assert!(!directory.exists(std::path::Path::new("segments_1")).unwrap());
    }

    #[test]
    fn test_optimize_merges_to_single_segment() {
        let directory = RamDirectory::create();
        let definition = IndexDefinition::new("t", 1);
        let retention = SnapshotPolicy::new();
        let (mut writer, _inventory) = open_writer(&directory);
        for (index, key) in ["items/1", "items/2", "items/3"].iter().enumerate() {
            writer.add_entry(&entry(key, "x"), &LowercaseKeywordAnalyzer, &definition);
            writer.commit(user_data(index as u64 + 1), &retention).unwrap();
        }
        assert_eq!(writer.committed().segments.len(), 3);
        writer.delete_by_key("items/2");
        writer.optimize(&retention).unwrap();
        assert_eq!(writer.committed().segments.len(), 1);
        assert_eq!(writer.committed().alive_doc_count(), 2);
        let reader = &writer.committed_readers()[0];
        assert_eq!(reader.doc_freq(DOCUMENT_ID_FIELD, "items/1"), 1);
        assert_eq!(reader.doc_freq(DOCUMENT_ID_FIELD, "items/2"), 0);
        // user data is carried across the optimize commit
        assert_eq!(
            writer.committed().user_data.get(USER_DATA_HIGHEST_ETAG).unwrap(),
            &crate::common::etag::Etag::from_counter(3).to_hex(),
        );
    }
}
