pub mod collector;
pub mod executor;
pub mod highlight;
pub mod parser;
#[allow(clippy::module_inception)]
pub mod query;
pub mod spatial;

use std::collections::HashMap;

pub use collector::{IntersectionCollector, ScoredHit, SearchHits};
pub use executor::{QueryOperation, QueryResultIter};
pub use parser::QueryParser;
pub use query::{BooleanClause, Occur, Query, INTERSECT_SEPARATOR};
pub use spatial::{SpatialIndexQuery, SpatialShape, SpatialStrategy};

/// Default page size when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// One sort criterion. `__distance` resolves against the spatial query
/// origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

impl SortField {
    pub fn ascending(field: impl Into<String>) -> SortField {
        SortField { field: field.into(), descending: false }
    }

    pub fn descending(field: impl Into<String>) -> SortField {
        SortField { field: field.into(), descending: true }
    }

    /// Parses the `-field` convention for descending sorts.
    pub fn parse(spec: &str) -> SortField {
        match spec.strip_prefix('-') {
            Some(field) => SortField::descending(field),
            None => SortField::ascending(spec),
        }
    }
}

/// A field to highlight, with fragment sizing and an optional name of
/// the projection field receiving the fragments.
#[derive(Debug, Clone)]
pub struct HighlightedField {
    pub field: String,
    pub fragment_length: usize,
    pub fragment_count: usize,
    pub fragments_field: Option<String>,
}

impl HighlightedField {
    pub fn new(field: impl Into<String>) -> HighlightedField {
        HighlightedField {
            field: field.into(),
            fragment_length: 128,
            fragment_count: 3,
            fragments_field: None,
        }
    }
}

/// Everything that characterizes one query request.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    /// Raw query text; may contain the `INTERSECT` separator.
    pub query: String,
    pub start: usize,
    pub page_size: usize,
    pub sort_fields: Vec<SortField>,
    /// Stored fields to project. Empty means key-only results for map
    /// indexes and full projections for map/reduce ones.
    pub fields_to_fetch: Vec<String>,
    pub highlighted_fields: Vec<HighlightedField>,
    pub highlighter_pre_tags: Vec<String>,
    pub highlighter_post_tags: Vec<String>,
    pub explain_scores: bool,
    pub is_distinct: bool,
    pub skip_duplicate_checking: bool,
    pub spatial: Option<SpatialIndexQuery>,
}

impl IndexQuery {
    pub fn new(query: impl Into<String>) -> IndexQuery {
        IndexQuery {
            query: query.into(),
            start: 0,
            page_size: DEFAULT_PAGE_SIZE,
            sort_fields: Vec::new(),
            fields_to_fetch: Vec::new(),
            highlighted_fields: Vec::new(),
            highlighter_pre_tags: Vec::new(),
            highlighter_post_tags: Vec::new(),
            explain_scores: false,
            is_distinct: false,
            skip_duplicate_checking: false,
            spatial: None,
        }
    }

    pub fn with_page(mut self, start: usize, page_size: usize) -> IndexQuery {
        self.start = start;
        self.page_size = page_size;
        self
    }

    pub fn with_sort(mut self, sort_fields: Vec<SortField>) -> IndexQuery {
        self.sort_fields = sort_fields;
        self
    }
}

/// One yielded query hit.
#[derive(Debug, Clone, Default)]
pub struct IndexQueryResult {
    pub key: Option<String>,
    pub projection: Option<serde_json::Map<String, serde_json::Value>>,
    pub score: f32,
    pub highlightings: Option<HashMap<String, Vec<String>>>,
    pub score_explanation: Option<String>,
}
