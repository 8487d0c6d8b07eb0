use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Field carrying the document key on every index entry.
pub const DOCUMENT_ID_FIELD: &str = "__document_id";
/// Field carrying the reduce key on map/reduce entries.
pub const REDUCE_KEY_FIELD: &str = "__reduce_key";
/// Suffix of the numeric-range companion of a field.
pub const RANGE_SUFFIX: &str = "_Range";
/// Marker that a field held a multi-valued array.
pub const IS_ARRAY_SUFFIX: &str = "_IsArray";
/// Marker that a field value is serialized structured data.
pub const CONVERT_TO_JSON_SUFFIX: &str = "_ConvertToJson";
/// Scratch field used by score-based sorting, never validated.
pub const TEMP_SCORE_FIELD: &str = "__temp_score";
/// Prefix of synthetic random-ordering fields, never validated.
pub const RANDOM_FIELD_PREFIX: &str = "__rand_";
/// Sort field resolved against the spatial query origin.
pub const DISTANCE_FIELD: &str = "__distance";
/// Catch-all sentinel: the indexing function emits arbitrary dynamic
/// field names, so the unknown-field guard is disabled.
pub const CATCH_ALL_FIELD: &str = "_";

/// How a field participates in the inverted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldIndexing {
    /// Indexed as a single exact term.
    NotAnalyzed,
    /// Tokenized before indexing.
    Analyzed,
    /// Stored only, invisible to queries.
    NotIndexed,
}

/// Scheduling priority of an index. `Error` is terminal for the
/// process lifetime unless reset externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexingPriority {
    Normal,
    Idle,
    Disabled,
    Abandoned,
    Forced,
    Error,
}

impl IndexingPriority {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            IndexingPriority::Normal => 0,
            IndexingPriority::Idle => 1,
            IndexingPriority::Disabled => 2,
            IndexingPriority::Abandoned => 3,
            IndexingPriority::Forced => 4,
            IndexingPriority::Error => 5,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> IndexingPriority {
        match raw {
            0 => IndexingPriority::Normal,
            1 => IndexingPriority::Idle,
            2 => IndexingPriority::Disabled,
            3 => IndexingPriority::Abandoned,
            4 => IndexingPriority::Forced,
            _ => IndexingPriority::Error,
        }
    }
}

/// Immutable description of one index, fixed for the lifetime of the
/// `Index` instance built from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub index_id: u32,
    /// Per-field indexing modes. Fields not listed here are dynamic and
    /// fall back to the default analyzer.
    #[serde(default)]
    pub indexes: BTreeMap<String, FieldIndexing>,
    /// Per-field analyzer identifiers, resolved against the registry.
    #[serde(default)]
    pub analyzers: BTreeMap<String, String>,
    /// Fields whose values are WKT points, validated during indexing.
    #[serde(default)]
    pub spatial_fields: BTreeSet<String>,
    #[serde(default)]
    pub is_map_reduce: bool,
    /// Overrides the configured fan-out cap when set.
    #[serde(default)]
    pub max_index_outputs_per_document: Option<i32>,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, index_id: u32) -> IndexDefinition {
        IndexDefinition {
            name: name.into(),
            index_id,
            indexes: BTreeMap::new(),
            analyzers: BTreeMap::new(),
            spatial_fields: BTreeSet::new(),
            is_map_reduce: false,
            max_index_outputs_per_document: None,
        }
    }

    pub fn indexing_mode(&self, field: &str) -> Option<FieldIndexing> {
        self.indexes.get(field).copied()
    }

    /// Whether the definition declares the catch-all field, disabling
    /// the unknown-field guard for queries.
    pub fn has_catch_all_field(&self) -> bool {
        self.indexes.contains_key(CATCH_ALL_FIELD) || self.analyzers.contains_key(CATCH_ALL_FIELD)
    }

    /// Query-validation visibility of a field. The `_Range` suffix is
    /// stripped by the caller before this lookup.
    pub fn is_field_queryable(&self, field: &str) -> bool {
        if field == DOCUMENT_ID_FIELD || field == REDUCE_KEY_FIELD || field == CATCH_ALL_FIELD {
            return true;
        }
        match self.indexing_mode(field) {
            Some(FieldIndexing::NotIndexed) => false,
            Some(_) => true,
            None => self.analyzers.contains_key(field) || self.spatial_fields.contains(field),
        }
    }
}

/// Strips the reserved marker suffixes when rebuilding a projection.
///
/// A user field that legitimately ends in one of these suffixes is
/// filtered too; this lossy behavior is kept for compatibility with the
/// convention that produced the data.
pub fn is_reserved_projection_field(name: &str) -> bool {
    name.ends_with(RANGE_SUFFIX)
        || name.ends_with(IS_ARRAY_SUFFIX)
        || name.ends_with(CONVERT_TO_JSON_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_round_trip() {
        for priority in [
            IndexingPriority::Normal,
            IndexingPriority::Idle,
            IndexingPriority::Disabled,
            IndexingPriority::Abandoned,
            IndexingPriority::Forced,
            IndexingPriority::Error,
        ] {
            assert_eq!(IndexingPriority::from_u8(priority.as_u8()), priority);
        }
    }

    #[test]
    fn test_queryable_fields() {
        let mut definition = IndexDefinition::new("t", 1);
        definition.indexes.insert("title".to_string(), FieldIndexing::Analyzed);
        definition.indexes.insert("hidden".to_string(), FieldIndexing::NotIndexed);
        assert!(definition.is_field_queryable("title"));
        assert!(definition.is_field_queryable(DOCUMENT_ID_FIELD));
        assert!(!definition.is_field_queryable("hidden"));
        assert!(!definition.is_field_queryable("unknown"));
        assert!(!definition.has_catch_all_field());

        definition.indexes.insert(CATCH_ALL_FIELD.to_string(), FieldIndexing::Analyzed);
        assert!(definition.has_catch_all_field());
    }

    #[test]
    fn test_reserved_projection_suffixes() {
        assert!(is_reserved_projection_field("price_Range"));
        assert!(is_reserved_projection_field("tags_IsArray"));
        assert!(is_reserved_projection_field("blob_ConvertToJson"));
        assert!(!is_reserved_projection_field("price"));
    }
}
