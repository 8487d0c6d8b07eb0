pub mod segment_id;
pub mod segment_meta;
pub mod segment_reader;
pub mod segment_writer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use segment_id::SegmentId;
pub use segment_meta::{
    load_current_commit, CommitPoint, SegmentMeta, SegmentMetaInventory, USER_DATA_HIGHEST_ETAG,
};
pub use segment_reader::SegmentReader;
pub use segment_writer::SegmentWriter;

use crate::index::definition::DOCUMENT_ID_FIELD;

/// One posting: a local document ordinal and the term frequency within
/// that document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: u32,
    pub freq: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredField {
    pub name: String,
    pub value: String,
}

/// The stored-fields row of one index entry, in emission order.
/// Field names may repeat for multi-valued fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub fields: Vec<StoredField>,
}

impl StoredDocument {
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|field| field.name == name).map(|field| field.value.as_str())
    }

    pub fn all_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let name = name.to_string();
        self.fields.iter().filter(move |field| field.name == name).map(|field| field.value.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    /// The document key this entry was emitted for.
    pub fn document_key(&self) -> Option<&str> {
        self.first_value(DOCUMENT_ID_FIELD)
    }
}

/// On-disk body of a `.cfs` file: the full term dictionary and the
/// stored-fields rows of one immutable segment. Serialized with bincode
/// and closed by a crc32 footer.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct SegmentPayload {
    /// field → term → postings, postings ordered by ordinal.
    pub postings: BTreeMap<String, BTreeMap<String, Vec<Posting>>>,
    pub stored: Vec<StoredDocument>,
}
