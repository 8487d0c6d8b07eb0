use std::fmt;
use std::sync::Arc;

use crate::common::etag::Etag;
use crate::directory::{Directory, META_LOCK};
use crate::segment::{
    load_current_commit, CommitPoint, SegmentMetaInventory, SegmentReader, StoredDocument,
};
use crate::DocOrd;

/// Read-only view over exactly one commit point.
///
/// A searcher never changes once built: a query that acquired it before
/// commit `N+1` keeps seeing the pre-`N+1` state through its entire
/// lifetime. Document ordinals are globalized across segments by the
/// per-segment bases.
pub struct Searcher {
    commit: CommitPoint,
    segment_readers: Vec<SegmentReader>,
    doc_bases: Vec<u32>,
    max_doc: u32,
    generation: u64,
}

impl Searcher {
    /// Opens a fresh searcher over the current commit of the directory.
    ///
    /// Holds the blocking meta lock while resolving `segments.gen` and
    /// opening segment files, so commit-time pruning cannot delete them
    /// from under us.
    pub fn open(
        directory: &dyn Directory,
        inventory: &SegmentMetaInventory,
        generation: u64,
    ) -> crate::Result<Searcher> {
        let _meta_lock = directory.acquire_lock(&META_LOCK)?;
        let commit = load_current_commit(directory, inventory)?;
        let segment_readers = commit
            .segments
            .iter()
            .map(|meta| SegmentReader::open(directory, meta))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Searcher::from_parts(commit, segment_readers, generation))
    }

    /// Builds a searcher from readers the writer already holds open,
    /// avoiding a re-read of every payload after a commit.
    pub(crate) fn from_parts(
        commit: CommitPoint,
        segment_readers: Vec<SegmentReader>,
        generation: u64,
    ) -> Searcher {
        let mut doc_bases = Vec::with_capacity(segment_readers.len());
        let mut max_doc = 0u32;
        for reader in &segment_readers {
            doc_bases.push(max_doc);
            max_doc += reader.doc_count();
        }
        Searcher { commit, segment_readers, doc_bases, max_doc, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn commit(&self) -> &CommitPoint {
        &self.commit
    }

    pub fn highest_etag(&self) -> crate::Result<Option<Etag>> {
        self.commit.highest_etag()
    }

    pub fn segment_readers(&self) -> &[SegmentReader] {
        &self.segment_readers
    }

    /// Upper bound (exclusive) of global ordinals, deleted included.
    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    /// Number of live documents.
    pub fn num_docs(&self) -> u32 {
        self.segment_readers.iter().map(SegmentReader::alive_doc_count).sum()
    }

    /// Resolves a global ordinal to (segment index, local ordinal).
    pub fn decode(&self, doc: DocOrd) -> Option<(usize, u32)> {
        if doc >= self.max_doc {
            return None;
        }
        let segment_index = match self.doc_bases.binary_search(&doc) {
            Ok(exact) => exact,
            Err(insertion) => insertion - 1,
        };
        Some((segment_index, doc - self.doc_bases[segment_index]))
    }

    pub fn is_live(&self, doc: DocOrd) -> bool {
        match self.decode(doc) {
            Some((segment_index, local)) => {
                !self.segment_readers[segment_index].is_tombstoned(local)
            }
            None => false,
        }
    }

    pub fn stored(&self, doc: DocOrd) -> Option<&StoredDocument> {
        let (segment_index, local) = self.decode(doc)?;
        self.segment_readers[segment_index].stored(local)
    }

    /// Live documents containing the term, with term frequency.
    pub fn for_each_term_doc(&self, field: &str, term: &str, mut f: impl FnMut(DocOrd, u32)) {
        for (segment_index, reader) in self.segment_readers.iter().enumerate() {
            let base = self.doc_bases[segment_index];
            if let Some(postings) = reader.postings(field, term) {
                for posting in postings {
                    if !reader.is_tombstoned(posting.doc) {
                        f(base + posting.doc, posting.freq);
                    }
                }
            }
        }
    }

    pub fn for_each_live_doc(&self, mut f: impl FnMut(DocOrd)) {
        for (segment_index, reader) in self.segment_readers.iter().enumerate() {
            let base = self.doc_bases[segment_index];
            for local in reader.live_docs() {
                f(base + local);
            }
        }
    }

    /// Number of live documents containing the term, across segments.
    pub fn doc_freq(&self, field: &str, term: &str) -> u32 {
        self.segment_readers.iter().map(|reader| reader.doc_freq(field, term)).sum()
    }

    /// Clones every stored row into one array indexed by global
    /// ordinal, for projection without per-document segment hops.
    pub fn materialize_stored_fields(&self) -> Vec<StoredDocument> {
        let mut materialized = Vec::with_capacity(self.max_doc as usize);
        for reader in &self.segment_readers {
            for local in 0..reader.doc_count() {
                materialized.push(
                    reader.stored(local).cloned().unwrap_or_default(),
                );
            }
        }
        materialized
    }
}

impl fmt::Debug for Searcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Searcher")
            .field("generation", &self.generation)
            .field("commit_generation", &self.commit.generation)
            .field("num_docs", &self.num_docs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LowercaseKeywordAnalyzer;
    use crate::directory::{Directory, RamDirectory};
    use crate::index::definition::{IndexDefinition, DOCUMENT_ID_FIELD};
    use crate::index::IndexEntry;
    use crate::segment::USER_DATA_HIGHEST_ETAG;
    use crate::writer::{IndexWriter, SnapshotPolicy};
    use std::collections::BTreeMap;

    fn indexed_directory(keys: &[&str]) -> (RamDirectory, SegmentMetaInventory) {
        let directory = RamDirectory::create();
        let inventory = SegmentMetaInventory::default();
        let definition = IndexDefinition::new("t", 1);
        let retention = SnapshotPolicy::new();
        let mut writer = IndexWriter::open(directory.box_clone(), inventory.clone()).unwrap();
        for (position, key) in keys.iter().enumerate() {
            let entry = IndexEntry::new()
                .with_field(DOCUMENT_ID_FIELD, *key)
                .with_field("n", position.to_string());
            writer.add_entry(&entry, &LowercaseKeywordAnalyzer, &definition);
            // one segment per document
            let mut user_data = BTreeMap::new();
            user_data.insert(
                USER_DATA_HIGHEST_ETAG.to_string(),
                Etag::from_counter(position as u64 + 1).to_hex(),
            );
            writer.commit(user_data, &retention).unwrap();
        }
        (directory, inventory)
    }

    #[test]
    fn test_global_ordinals_span_segments() {
        let (directory, inventory) = indexed_directory(&["items/0", "items/1", "items/2"]);
        let searcher = Searcher::open(&directory, &inventory, 1).unwrap();
        assert_eq!(searcher.segment_readers().len(), 3);
        assert_eq!(searcher.num_docs(), 3);
        assert_eq!(searcher.max_doc(), 3);
        assert_eq!(searcher.decode(0), Some((0, 0)));
        assert_eq!(searcher.decode(2), Some((2, 0)));
        assert_eq!(searcher.decode(3), None);

        let mut seen = Vec::new();
        searcher.for_each_term_doc(DOCUMENT_ID_FIELD, "items/1", |doc, freq| {
            seen.push((doc, freq));
        });
        assert_eq!(seen, vec![(1, 1)]);
    }

    #[test]
    fn test_materialized_stored_fields_follow_global_ordinals() {
        let (directory, inventory) = indexed_directory(&["items/0", "items/1"]);
        let searcher = Searcher::open(&directory, &inventory, 1).unwrap();
        let stored = searcher.materialize_stored_fields();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].document_key(), Some("items/0"));
        assert_eq!(stored[1].document_key(), Some("items/1"));
        assert_eq!(searcher.highest_etag().unwrap(), Some(Etag::from_counter(2)));
    }
}
