pub mod backup;
pub mod config;
pub mod definition;
pub mod extensions;
#[allow(clippy::module_inception)]
pub mod index;
pub mod stats;

use crate::common::etag::Etag;

pub use backup::{backup_index, restore_index, BackupRequest};
pub use config::EngineConfig;
pub use definition::{FieldIndexing, IndexDefinition, IndexingPriority};
pub use extensions::{AnalyzerGenerator, ExtensionsRegistry, IndexQueryTrigger, IndexUpdateTrigger};
pub use index::{AlertSink, Index, IndexContext, IndexingFn, LogAlertSink};
pub use stats::{BatchOperation, IndexingError, IndexingPerformanceStats, StatsStore};

/// One unit the inverted-index library writes: a mapping from field
/// name to one or more values. The indexing function emits one or more
/// of these per source document (its fan-out).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub fields: Vec<EntryField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryField {
    pub name: String,
    pub value: String,
}

impl IndexEntry {
    pub fn new() -> IndexEntry {
        IndexEntry::default()
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(EntryField { name: name.into(), value: value.into() });
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> IndexEntry {
        self.add_field(name, value);
        self
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|field| field.name == name).map(|field| field.value.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }
}

/// One document handed to the index by the external scheduler.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub key: String,
    pub etag: Etag,
    pub data: serde_json::Value,
}

/// An atomic unit of documents to apply.
#[derive(Debug, Clone, Default)]
pub struct IndexingBatch {
    pub documents: Vec<SourceDocument>,
    /// Signal from the scheduler that the index has caught up with the
    /// document store; a memory-backed index that is current enough is
    /// worth persisting.
    pub index_up_to_date: bool,
}

impl IndexingBatch {
    pub fn highest_etag(&self) -> Option<Etag> {
        self.documents.iter().map(|document| document.etag).max()
    }
}

/// Per-commit outcome of one apply call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedItemsInfo {
    /// Number of documents whose entries changed. The searcher is
    /// republished iff this is non-zero.
    pub changed_docs: usize,
    pub highest_etag: Option<Etag>,
}
