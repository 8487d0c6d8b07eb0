use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use crate::common::errors::EngineError;
use crate::directory::Directory;
use crate::segment::segment_writer::SegmentInfo;
use crate::segment::{Posting, SegmentId, SegmentMeta, SegmentPayload, StoredDocument};

/// Read-only view over one immutable segment.
///
/// Cloning is cheap; the payload is shared. The checksum footer is
/// verified once at open time so a torn or corrupted payload is caught
/// before a searcher is published over it.
#[derive(Clone)]
pub struct SegmentReader {
    meta: SegmentMeta,
    payload: Arc<SegmentPayload>,
}

impl SegmentReader {
    pub fn open(directory: &dyn Directory, meta: &SegmentMeta) -> crate::Result<SegmentReader> {
        let info_bytes = directory.atomic_read(&meta.id().info_path())?;
        let info: SegmentInfo = serde_json::from_slice(&info_bytes).map_err(|serde_error| {
            EngineError::corrupted(
                &meta.id().info_path(),
                format!("segment info cannot be deserialized: {serde_error:?}"),
            )
        })?;
        if info.segment_id != meta.id() {
            return Err(EngineError::CorruptIndex(format!(
                "segment info {:?} names segment {} instead of {}",
                meta.id().info_path(),
                info.segment_id,
                meta.id(),
            )));
        }

        let slice = directory.open_read(&meta.id().payload_path())?;
        let bytes = slice.as_bytes();
        if bytes.len() < 4 {
            return Err(EngineError::CorruptIndex(format!(
                "segment payload {:?} is truncated",
                meta.id().payload_path(),
            )));
        }
        let (body, footer) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes(footer.try_into().expect("footer is 4 bytes"));
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(EngineError::CorruptIndex(format!(
                "checksum mismatch in {:?}: expected {expected:08x}, computed {actual:08x}",
                meta.id().payload_path(),
            )));
        }
        let payload: SegmentPayload = bincode::deserialize(body)?;
        if payload.stored.len() as u32 != info.doc_count {
            return Err(EngineError::CorruptIndex(format!(
                "segment {} stores {} rows but its info claims {}",
                meta.id(),
                payload.stored.len(),
                info.doc_count,
            )));
        }
        Ok(SegmentReader { meta: meta.clone(), payload: Arc::new(payload) })
    }

    /// Same payload viewed through an updated meta, typically one with
    /// additional tombstones. Avoids re-reading the segment files.
    pub(crate) fn clone_with_meta(&self, meta: SegmentMeta) -> SegmentReader {
        SegmentReader { meta, payload: self.payload.clone() }
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn segment_id(&self) -> SegmentId {
        self.meta.id()
    }

    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count()
    }

    pub fn alive_doc_count(&self) -> u32 {
        self.meta.alive_doc_count()
    }

    pub fn is_tombstoned(&self, ord: u32) -> bool {
        self.meta.is_tombstoned(ord)
    }

    /// Raw postings, tombstoned ordinals included. Callers filter
    /// through [`is_tombstoned`](Self::is_tombstoned).
    pub fn postings(&self, field: &str, term: &str) -> Option<&[Posting]> {
        self.payload.postings.get(field)?.get(term).map(Vec::as_slice)
    }

    /// The whole term dictionary, for merging.
    pub(crate) fn postings_map(
        &self,
    ) -> &std::collections::BTreeMap<String, std::collections::BTreeMap<String, Vec<Posting>>> {
        &self.payload.postings
    }

    /// Number of live documents containing the term.
    pub fn doc_freq(&self, field: &str, term: &str) -> u32 {
        self.postings(field, term)
            .map(|postings| {
                postings.iter().filter(|posting| !self.is_tombstoned(posting.doc)).count() as u32
            })
            .unwrap_or(0)
    }

    /// Terms of a field within the given bounds, in term order.
    pub fn terms_in_range<'a>(
        &'a self,
        field: &str,
        low: Bound<&'a str>,
        high: Bound<&'a str>,
    ) -> impl Iterator<Item = (&'a str, &'a [Posting])> + 'a {
        self.payload
            .postings
            .get(field)
            .into_iter()
            .flat_map(move |terms| {
                terms.range::<str, _>((low, high)).map(|(term, postings)| {
                    (term.as_str(), postings.as_slice())
                })
            })
    }

    /// Terms of a field starting with the given prefix.
    pub fn terms_with_prefix<'a>(
        &'a self,
        field: &str,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a [Posting])> + 'a {
        self.terms_in_range(field, Bound::Included(prefix), Bound::Unbounded)
            .take_while(move |(term, _)| term.starts_with(prefix))
    }

    pub fn stored(&self, ord: u32) -> Option<&StoredDocument> {
        self.payload.stored.get(ord as usize)
    }

    pub fn live_docs(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.doc_count()).filter(move |ord| !self.is_tombstoned(*ord))
    }
}

impl fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentReader")
            .field("segment_id", &self.segment_id())
            .field("doc_count", &self.doc_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::directory::RamDirectory;
    use crate::index::definition::{FieldIndexing, IndexDefinition, DOCUMENT_ID_FIELD};
    use crate::index::IndexEntry;
    use crate::segment::{SegmentMetaInventory, SegmentWriter};

    fn build_segment(directory: &RamDirectory) -> SegmentMeta {
        let mut definition = IndexDefinition::new("t", 1);
        definition.indexes.insert("body".to_string(), FieldIndexing::Analyzed);
        let inventory = SegmentMetaInventory::default();
        let mut writer = SegmentWriter::new();
        for (key, body) in
            [("items/1", "red apples"), ("items/2", "green apples"), ("items/3", "red wine")]
        {
            let mut entry = IndexEntry::new();
            entry.add_field(DOCUMENT_ID_FIELD, key);
            entry.add_field("body", body);
            writer.index_entry(&entry, &StandardAnalyzer, &definition);
        }
        writer.finalize(directory, &inventory).unwrap()
    }

    #[test]
    fn test_postings_and_doc_freq() {
        let directory = RamDirectory::create();
        let meta = build_segment(&directory);
        let reader = SegmentReader::open(&directory, &meta).unwrap();
        assert_eq!(reader.doc_freq("body", "apples"), 2);
        assert_eq!(reader.doc_freq("body", "red"), 2);
        assert_eq!(reader.doc_freq("body", "wine"), 1);
        assert_eq!(reader.doc_freq("body", "missing"), 0);
        let postings = reader.postings("body", "red").unwrap();
        assert_eq!(postings.iter().map(|posting| posting.doc).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_tombstones_filter_doc_freq() {
        let directory = RamDirectory::create();
        let meta = build_segment(&directory);
        let deleted = meta.with_tombstones(std::collections::BTreeSet::from([0u32]));
        let reader = SegmentReader::open(&directory, &deleted).unwrap();
        assert_eq!(reader.doc_freq("body", "red"), 1);
        assert_eq!(reader.live_docs().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_prefix_terms() {
        let directory = RamDirectory::create();
        let meta = build_segment(&directory);
        let reader = SegmentReader::open(&directory, &meta).unwrap();
        let terms: Vec<&str> =
            reader.terms_with_prefix("body", "re").map(|(term, _)| term).collect();
        assert_eq!(terms, vec!["red"]);
    }

    #[test]
    fn test_corrupted_payload_is_rejected() {
        let directory = RamDirectory::create();
        let meta = build_segment(&directory);
        let path = meta.id().payload_path();
        let mut bytes = directory.atomic_read(&path).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        directory.atomic_write(&path, &bytes).unwrap();
        assert!(matches!(
            SegmentReader::open(&directory, &meta),
            Err(EngineError::CorruptIndex(_))
        ));
    }
}
