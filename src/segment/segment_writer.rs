use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::analysis::Analyzer;
use crate::directory::Directory;
use crate::index::definition::{FieldIndexing, IndexDefinition, DOCUMENT_ID_FIELD};
use crate::index::IndexEntry;
use crate::segment::{Posting, SegmentId, SegmentMeta, SegmentMetaInventory, SegmentPayload, StoredDocument, StoredField};
use crate::INDEX_FORMAT_VERSION;

/// Per-segment info file (`.si`), human readable.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SegmentInfo {
    pub segment_id: SegmentId,
    pub doc_count: u32,
    pub payload_file: String,
    pub format_version: u32,
}

/// In-memory builder for one immutable segment.
///
/// Buffers postings and stored rows until the library writer decides to
/// flush. Entries deleted before the flush never reach disk as live
/// documents; they are recorded as tombstones of the freshly written
/// segment so the payload itself stays append-only.
pub struct SegmentWriter {
    segment_id: SegmentId,
    postings: BTreeMap<String, BTreeMap<String, Vec<Posting>>>,
    stored: Vec<StoredDocument>,
    ords_by_key: HashMap<String, SmallVec<[u32; 2]>>,
    tombstones: BTreeSet<u32>,
    ram_bytes: usize,
}

impl SegmentWriter {
    pub fn new() -> SegmentWriter {
        SegmentWriter {
            segment_id: SegmentId::generate_random(),
            postings: BTreeMap::new(),
            stored: Vec::new(),
            ords_by_key: HashMap::new(),
            tombstones: BTreeSet::new(),
            ram_bytes: 0,
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    pub fn doc_count(&self) -> u32 {
        self.stored.len() as u32
    }

    /// Buffered documents that have not been deleted again.
    pub fn alive_doc_count(&self) -> u32 {
        self.doc_count() - self.tombstones.len() as u32
    }

    /// Rough estimate of the memory held by the buffer, used against
    /// the flush threshold.
    pub fn ram_bytes(&self) -> usize {
        self.ram_bytes
    }

    /// Adds one index entry. Every field is stored; fields are indexed
    /// according to the definition, through the given analyzer wrapper.
    /// Returns the local ordinal.
    pub fn index_entry(
        &mut self,
        entry: &IndexEntry,
        analyzer: &dyn Analyzer,
        definition: &IndexDefinition,
    ) -> u32 {
        let ord = self.stored.len() as u32;
        let mut stored_fields = Vec::with_capacity(entry.fields.len());
        let mut term_frequencies: BTreeMap<(&str, String), u32> = BTreeMap::new();

        for field in &entry.fields {
            stored_fields
                .push(StoredField { name: field.name.clone(), value: field.value.clone() });
            self.ram_bytes += field.name.len() + field.value.len();

            if definition.indexing_mode(&field.name) == Some(FieldIndexing::NotIndexed) {
                continue;
            }
            for token in analyzer.analyze(&field.name, &field.value) {
                self.ram_bytes += token.text.len() + std::mem::size_of::<Posting>();
                *term_frequencies.entry((field.name.as_str(), token.text)).or_insert(0) += 1;
            }
        }

        for ((field_name, term), freq) in term_frequencies {
            self.postings
                .entry(field_name.to_string())
                .or_default()
                .entry(term)
                .or_default()
                .push(Posting { doc: ord, freq });
        }

        if let Some(key) = entry.first_value(DOCUMENT_ID_FIELD) {
            self.ords_by_key.entry(key.to_lowercase()).or_default().push(ord);
        }
        self.stored.push(StoredDocument { fields: stored_fields });
        ord
    }

    /// Tombstones every buffered entry of the given document key.
    /// Keys compare case-insensitively. Returns how many entries were
    /// newly deleted.
    pub fn delete_by_key(&mut self, key: &str) -> usize {
        let Some(ords) = self.ords_by_key.remove(&key.to_lowercase()) else {
            return 0;
        };
        let mut deleted = 0;
        for ord in ords {
            if self.tombstones.insert(ord) {
                deleted += 1;
            }
        }
        deleted
    }

    /// Serializes the buffer into `.cfs` + `.si` files and registers
    /// the segment meta. Consumes the writer.
    pub fn finalize(
        self,
        directory: &dyn Directory,
        inventory: &SegmentMetaInventory,
    ) -> crate::Result<SegmentMeta> {
        debug!(
            "finalizing segment {} with {} docs ({} tombstoned)",
            self.segment_id.short_id(),
            self.doc_count(),
            self.tombstones.len(),
        );
        let payload = SegmentPayload { postings: self.postings, stored: self.stored };
        write_segment_files(directory, inventory, self.segment_id, &payload, self.tombstones)
    }
}

impl Default for SegmentWriter {
    fn default() -> SegmentWriter {
        SegmentWriter::new()
    }
}

/// Writes a ready-made payload as a fresh segment. Shared by the
/// buffer flush path and the merge path.
pub(crate) fn write_segment_files(
    directory: &dyn Directory,
    inventory: &SegmentMetaInventory,
    segment_id: SegmentId,
    payload: &SegmentPayload,
    tombstones: BTreeSet<u32>,
) -> crate::Result<SegmentMeta> {
    let doc_count = payload.stored.len() as u32;
    let mut bytes = bincode::serialize(payload)?;
    let checksum = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    directory.atomic_write(&segment_id.payload_path(), &bytes)?;

    let info = SegmentInfo {
        segment_id,
        doc_count,
        payload_file: segment_id.payload_path().to_string_lossy().into_owned(),
        format_version: INDEX_FORMAT_VERSION,
    };
    directory.atomic_write(&segment_id.info_path(), &serde_json::to_vec(&info)?)?;
    Ok(inventory.new_segment_meta(segment_id, doc_count, tombstones))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LowercaseKeywordAnalyzer;
    use crate::directory::RamDirectory;

    fn entry(key: &str, extra: &[(&str, &str)]) -> IndexEntry {
        let mut entry = IndexEntry::new();
        entry.add_field(DOCUMENT_ID_FIELD, key);
        for (name, value) in extra {
            entry.add_field(*name, *value);
        }
        entry
    }

    #[test]
    fn test_buffered_delete_marks_tombstone() {
        let definition = IndexDefinition::new("t", 1);
        let analyzer = LowercaseKeywordAnalyzer;
        let mut writer = SegmentWriter::new();
        writer.index_entry(&entry("items/1", &[]), &analyzer, &definition);
        writer.index_entry(&entry("items/2", &[]), &analyzer, &definition);
        assert_eq!(writer.alive_doc_count(), 2);
        // keys are case-insensitive
        assert_eq!(writer.delete_by_key("ITEMS/1"), 1);
        assert_eq!(writer.alive_doc_count(), 1);
        assert_eq!(writer.delete_by_key("items/1"), 0);
    }

    #[test]
    fn test_finalize_writes_both_files() {
        let definition = IndexDefinition::new("t", 1);
        let directory = RamDirectory::create();
        let inventory = SegmentMetaInventory::default();
        let mut writer = SegmentWriter::new();
        writer.index_entry(&entry("items/1", &[("title", "Hello")]), &LowercaseKeywordAnalyzer, &definition);
        let segment_id = writer.segment_id();
        let meta = writer.finalize(&directory, &inventory).unwrap();
        assert_eq!(meta.doc_count(), 1);
        assert!(directory.exists(&segment_id.payload_path()).unwrap());
        assert!(directory.exists(&segment_id.info_path()).unwrap());
    }

    #[test]
    fn test_not_indexed_field_is_stored_but_has_no_postings() {
        let mut definition = IndexDefinition::new("t", 1);
        definition.indexes.insert("secret".to_string(), FieldIndexing::NotIndexed);
        let directory = RamDirectory::create();
        let inventory = SegmentMetaInventory::default();
        let mut writer = SegmentWriter::new();
        writer.index_entry(
            &entry("items/1", &[("secret", "value")]),
            &LowercaseKeywordAnalyzer,
            &definition,
        );
        let meta = writer.finalize(&directory, &inventory).unwrap();
        let reader = crate::segment::SegmentReader::open(&directory, &meta).unwrap();
        assert!(reader.postings("secret", "value").is_none());
        assert_eq!(reader.stored(0).unwrap().first_value("secret"), Some("value"));
    }
}
