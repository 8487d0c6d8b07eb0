use std::sync::Arc;

use crate::analysis::Analyzer;
use crate::index::definition::IndexDefinition;
use crate::index::IndexEntry;
use crate::query::Query;

/// Transforms the assembled analyzer chain. The last generator in the
/// registry wins; returning `None` keeps the current chain.
pub trait AnalyzerGenerator: Send + Sync {
    fn generate(
        &self,
        definition: &IndexDefinition,
        current: Arc<dyn Analyzer>,
        for_querying: bool,
    ) -> Option<Arc<dyn Analyzer>>;
}

/// Rewrites queries before execution. Triggers run sequentially in
/// registration order.
pub trait IndexQueryTrigger: Send + Sync {
    fn process_query(&self, index_name: &str, query: Query) -> Query;
}

/// Observes index mutations. Entry hooks fire while the batch is being
/// applied, under the write lock.
pub trait IndexUpdateTrigger: Send + Sync {
    fn on_index_entry_created(&self, document_key: &str, entry: &IndexEntry);
    fn on_index_entry_deleted(&self, document_key: &str);
}

/// Plugin surface of one index: ordered sequences of trait objects,
/// initialized by the host before the index is constructed.
#[derive(Default, Clone)]
pub struct ExtensionsRegistry {
    pub analyzer_generators: Vec<Arc<dyn AnalyzerGenerator>>,
    pub query_triggers: Vec<Arc<dyn IndexQueryTrigger>>,
    pub update_triggers: Vec<Arc<dyn IndexUpdateTrigger>>,
}

impl ExtensionsRegistry {
    pub fn new() -> ExtensionsRegistry {
        ExtensionsRegistry::default()
    }
}
