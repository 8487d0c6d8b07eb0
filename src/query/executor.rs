use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use serde_json::Value;

use crate::analysis::{build_analyzer, AnalyzerRegistry, AnalyzerScope, LowercaseKeywordAnalyzer};
use crate::common::cancel::CancellationToken;
use crate::common::errors::EngineError;
use crate::index::config::EngineConfig;
use crate::index::definition::{
    is_reserved_projection_field, IndexDefinition, IndexingPriority, CONVERT_TO_JSON_SUFFIX,
    DISTANCE_FIELD, DOCUMENT_ID_FIELD, IS_ARRAY_SUFFIX, RANDOM_FIELD_PREFIX, RANGE_SUFFIX,
    REDUCE_KEY_FIELD, TEMP_SCORE_FIELD,
};
use crate::index::extensions::ExtensionsRegistry;
use crate::query::collector::{collect_hits, ScoredHit, SearchHits};
use crate::query::highlight::build_fragments;
use crate::query::parser::QueryParser;
use crate::query::query::{evaluate, explain, Query, INTERSECT_SEPARATOR};
use crate::query::{IndexQuery, IndexQueryResult, IntersectionCollector};
use crate::reader::{SearcherGuard, SearcherHolder};
use crate::segment::StoredDocument;
use crate::DocOrd;

pub type ResultPredicate = Arc<dyn Fn(&IndexQueryResult) -> bool + Send + Sync>;

/// Short-lived, per-request query executor.
///
/// Validates the request, assembles the query-time analyzer, parses and
/// rewrites the query, then hands a lazy iterator over one acquired
/// searcher snapshot back to the caller. The snapshot is released when
/// the iterator is dropped.
pub struct QueryOperation {
    definition: Arc<IndexDefinition>,
    config: Arc<EngineConfig>,
    extensions: Arc<ExtensionsRegistry>,
    analyzers: Arc<AnalyzerRegistry>,
    priority: IndexingPriority,
    query: IndexQuery,
    token: CancellationToken,
    predicate: Option<ResultPredicate>,
}

impl QueryOperation {
    pub fn new(
        definition: Arc<IndexDefinition>,
        config: Arc<EngineConfig>,
        extensions: Arc<ExtensionsRegistry>,
        analyzers: Arc<AnalyzerRegistry>,
        priority: IndexingPriority,
        query: IndexQuery,
        token: CancellationToken,
    ) -> QueryOperation {
        QueryOperation {
            definition,
            config,
            extensions,
            analyzers,
            priority,
            query,
            token,
            predicate: None,
        }
    }

    /// User predicate deciding whether a produced result is included;
    /// rejected results count as skipped.
    pub fn with_predicate(mut self, predicate: ResultPredicate) -> QueryOperation {
        self.predicate = Some(predicate);
        self
    }

    pub fn execute(self, holder: &SearcherHolder) -> crate::Result<QueryResultIter> {
        self.validate_fields()?;

        if self.priority == IndexingPriority::Error {
            return Err(EngineError::IndexDisabled(self.definition.name.clone()));
        }

        let mut analyzer_scope = AnalyzerScope::default();
        let analyzer = build_analyzer(
            &self.definition,
            &self.analyzers,
            Arc::new(LowercaseKeywordAnalyzer),
            true,
            &self.extensions.analyzer_generators,
            &mut analyzer_scope,
        )?;

        let parts: Vec<&str> = if self.query.query.contains(INTERSECT_SEPARATOR) {
            let parts: Vec<&str> = self
                .query
                .query
                .split(INTERSECT_SEPARATOR)
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect();
            if parts.len() < 2 {
                return Err(EngineError::IntersectMalformed);
            }
            parts
        } else {
            vec![self.query.query.as_str()]
        };

        let parser = QueryParser::new(analyzer.as_ref());
        let mut parsed = parts
            .into_iter()
            .map(|part| parser.parse(part))
            .collect::<crate::Result<Vec<Query>>>()?;

        if let Some(spatial) = self.query.spatial.clone() {
            let base = parsed[0].clone();
            parsed[0] = base.wrap_with_spatial(spatial);
        }

        for trigger in &self.extensions.query_triggers {
            for query in &mut parsed {
                let current = std::mem::replace(query, Query::MatchNone);
                *query = trigger.process_query(&self.definition.name, current);
            }
        }

        let mut highlight_terms: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for query in &parsed {
            query.highlight_terms(&mut highlight_terms);
        }

        let base_query = parsed.remove(0);
        let intersect_queries = parsed;

        let (guard, stored_fields) = holder.acquire_with_stored_fields();
        debug!(
            "executing query {:?} against searcher generation {}",
            self.query.query,
            guard.generation(),
        );

        let docs_to_get = self.query.page_size;
        Ok(QueryResultIter {
            guard,
            stored_fields,
            definition: self.definition,
            config: self.config,
            query: self.query,
            token: self.token,
            predicate: self.predicate,
            base_query,
            intersect_queries,
            highlight_terms,
            hits: SearchHits::default(),
            started: false,
            position: 0,
            returned: 0,
            docs_to_get,
            already_seen_keys: HashSet::new(),
            already_seen_projections: HashSet::new(),
            skipped: 0,
            done: false,
        })
    }

    /// Rejects queries referencing fields the index does not cover,
    /// unless the definition declares the catch-all field. The
    /// `_Range` suffix is stripped before lookup; score and random
    /// ordering fields are exempt.
    fn validate_fields(&self) -> crate::Result<()> {
        if self.definition.has_catch_all_field() {
            return Ok(());
        }
        let mut names = extract_queried_fields(&self.query.query);
        names.extend(self.query.sort_fields.iter().map(|sort_field| sort_field.field.clone()));
        for name in names {
            if name == TEMP_SCORE_FIELD
                || name == DISTANCE_FIELD
                || name.starts_with(RANDOM_FIELD_PREFIX)
            {
                continue;
            }
            let stripped = name.strip_suffix(RANGE_SUFFIX).unwrap_or(&name);
            if !self.definition.is_field_queryable(stripped) {
                return Err(EngineError::FieldNotIndexed { name: stripped.to_string() });
            }
        }
        Ok(())
    }
}

/// Field names referenced by the raw query text, found by scanning for
/// `field:` outside quoted sections.
fn extract_queried_fields(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut word = String::new();
    let flush = |word: &mut String, fields: &mut Vec<String>| {
        if let Some(at) = word.find(':') {
            let field = word[..at].trim_start_matches(['+', '-']);
            if !field.is_empty() {
                fields.push(field.to_string());
            }
        }
        word.clear();
    };
    for character in text.chars() {
        match character {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            character if character.is_whitespace() || character == '(' || character == ')' => {
                flush(&mut word, &mut fields);
            }
            _ => word.push(character),
        }
    }
    flush(&mut word, &mut fields);
    fields
}

enum Considered {
    Emit(Box<IndexQueryResult>),
    Skip,
}

/// Lazy, finite, non-restartable stream of query results.
///
/// Holds its searcher guard for its whole lifetime, so the snapshot it
/// reads cannot be reclaimed while iteration is in flight. Checks the
/// cancellation token between emitted results and before every page
/// refill.
pub struct QueryResultIter {
    guard: SearcherGuard,
    stored_fields: Arc<Vec<StoredDocument>>,
    definition: Arc<IndexDefinition>,
    config: Arc<EngineConfig>,
    query: IndexQuery,
    token: CancellationToken,
    predicate: Option<ResultPredicate>,
    base_query: Query,
    intersect_queries: Vec<Query>,
    highlight_terms: BTreeMap<String, Vec<String>>,

    hits: SearchHits,
    started: bool,
    /// Absolute index into `hits`; survives refills because a refill
    /// re-executes the same search with a larger window, whose prefix
    /// is identical.
    position: usize,
    returned: usize,
    docs_to_get: usize,
    already_seen_keys: HashSet<String>,
    already_seen_projections: HashSet<String>,
    skipped: usize,
    done: bool,
}

impl QueryResultIter {
    /// Results rejected by the predicate or suppressed as duplicates.
    /// Callers advance the next page's `start` by this much to resume
    /// exactly where iteration stopped.
    pub fn skipped_results(&self) -> usize {
        self.skipped
    }

    pub fn total_hits(&self) -> usize {
        self.hits.total_hits
    }

    fn spatial_origin(&self) -> Option<(f64, f64)> {
        self.query.spatial.as_ref().map(|spatial| spatial.shape.origin())
    }

    fn dedupe_enabled(&self) -> bool {
        if self.query.skip_duplicate_checking {
            return false;
        }
        // a pure projection over a map-only index cannot fan out into
        // duplicate keys worth suppressing
        let pure_projection = !self.query.fields_to_fetch.is_empty();
        !(pure_projection && !self.definition.is_map_reduce)
    }

    fn wants_projection(&self) -> bool {
        !self.query.fields_to_fetch.is_empty() || self.definition.is_map_reduce
    }

    fn execute_search(&self) -> SearchHits {
        let searcher = self.guard.searcher();
        if !self.intersect_queries.is_empty() {
            return self.execute_intersect();
        }
        let scored = evaluate(searcher, &self.base_query);
        let requested = if self.query.sort_fields.is_empty() {
            // gather-all for unsorted pages
            usize::MAX
        } else {
            (self.query.start + self.docs_to_get).max(1)
        };
        collect_hits(searcher, scored, requested, &self.query.sort_fields, self.spatial_origin())
    }

    /// The first sub-query runs normally, honoring sort; the rest feed
    /// an intersection collector. The base window doubles until enough
    /// intersected documents exist, the base query is exhausted, or the
    /// window stops growing.
    fn execute_intersect(&self) -> SearchHits {
        let searcher = self.guard.searcher();
        let mut collector = IntersectionCollector::new();
        for sub_query in &self.intersect_queries {
            let matches: HashSet<DocOrd> =
                evaluate(searcher, sub_query).keys().copied().collect();
            collector.collect_matches(&matches);
        }
        let matching_all = collector.matching_all(self.intersect_queries.len());

        let wanted = (self.query.start + self.query.page_size).max(1);
        let mut docs_to_get = wanted;
        let mut previous_len = 0usize;
        loop {
            let scored = evaluate(searcher, &self.base_query);
            let base = collect_hits(
                searcher,
                scored,
                docs_to_get,
                &self.query.sort_fields,
                self.spatial_origin(),
            );
            let intersected: Vec<ScoredHit> = base
                .hits
                .iter()
                .filter(|hit| matching_all.contains(&hit.doc))
                .copied()
                .collect();
            let enough = intersected.len() >= wanted;
            let exhausted = base.is_exhaustive();
            let stalled = previous_len > 0 && base.hits.len() == previous_len;
            if enough || exhausted || stalled {
                let total_hits = intersected.len();
                return SearchHits { hits: intersected, total_hits };
            }
            previous_len = base.hits.len();
            docs_to_get = docs_to_get.saturating_mul(2);
        }
    }

    fn initialize(&mut self) {
        self.hits = self.execute_search();
        self.position = self.query.start;

        let start = self.query.start;
        if start > 0 && self.dedupe_enabled() {
            let previous_page_keys: Vec<String> = if !self.query.sort_fields.is_empty() {
                self.hits
                    .hits
                    .iter()
                    .take(start)
                    .filter_map(|hit| self.key_of(hit.doc).map(str::to_lowercase))
                    .collect()
            } else {
                self.hits
                    .hits
                    .get(start - 1)
                    .and_then(|hit| self.key_of(hit.doc).map(str::to_lowercase))
                    .into_iter()
                    .collect()
            };
            self.already_seen_keys.extend(previous_page_keys);
        }

        if self.query.is_distinct && start > 0 {
            let mut scan = 0;
            while self.already_seen_projections.len() < start && scan < self.hits.hits.len() {
                let doc = self.hits.hits[scan].doc;
                let projection = self.build_projection(&self.stored_fields[doc as usize]);
                if !projection.is_empty() {
                    self.already_seen_projections.insert(canonical_projection(&projection));
                }
                scan += 1;
            }
        }

        self.started = true;
    }

    fn key_of(&self, doc: DocOrd) -> Option<&str> {
        self.stored_fields.get(doc as usize).and_then(StoredDocument::document_key)
    }

    fn build_projection(
        &self,
        stored: &StoredDocument,
    ) -> serde_json::Map<String, Value> {
        let mut projection = serde_json::Map::new();
        let explicit = &self.query.fields_to_fetch;

        let names: Vec<&str> = if explicit.is_empty() {
            stored
                .fields
                .iter()
                .map(|field| field.name.as_str())
                .filter(|name| *name != DOCUMENT_ID_FIELD && *name != REDUCE_KEY_FIELD)
                .filter(|name| !is_reserved_projection_field(name))
                .unique()
                .collect()
        } else {
            explicit.iter().map(String::as_str).collect()
        };

        for name in names {
            if is_reserved_projection_field(name) {
                continue;
            }
            let convert_to_json = stored.has_field(&format!("{name}{CONVERT_TO_JSON_SUFFIX}"));
            let is_array = stored.has_field(&format!("{name}{IS_ARRAY_SUFFIX}"));
            let mut values: Vec<Value> = stored
                .all_values(name)
                .map(|value| {
                    if convert_to_json {
                        serde_json::from_str(value)
                            .unwrap_or_else(|_| Value::String(value.to_string()))
                    } else {
                        Value::String(value.to_string())
                    }
                })
                .collect();
            if values.is_empty() {
                continue;
            }
            let value = if is_array || values.len() > 1 {
                Value::Array(values)
            } else {
                values.pop().expect("non-empty")
            };
            projection.insert(name.to_string(), value);
        }
        projection
    }

    fn project_hit(&self, hit: ScoredHit) -> IndexQueryResult {
        let stored = &self.stored_fields[hit.doc as usize];
        let key = stored.document_key().map(str::to_string);
        let mut projection =
            if self.wants_projection() { Some(self.build_projection(stored)) } else { None };

        let mut highlightings: HashMap<String, Vec<String>> = HashMap::new();
        for highlighted in &self.query.highlighted_fields {
            let Some(terms) = self.highlight_terms.get(&highlighted.field) else {
                continue;
            };
            let mut fragments = Vec::new();
            for value in stored.all_values(&highlighted.field) {
                fragments.extend(build_fragments(
                    value,
                    terms,
                    &self.query.highlighter_pre_tags,
                    &self.query.highlighter_post_tags,
                    highlighted.fragment_length,
                    highlighted.fragment_count.saturating_sub(fragments.len()),
                ));
                if fragments.len() >= highlighted.fragment_count {
                    break;
                }
            }
            if fragments.is_empty() {
                continue;
            }
            if let Some(projection) = projection.as_mut() {
                let fragments_field = highlighted
                    .fragments_field
                    .clone()
                    .unwrap_or_else(|| format!("{}_Fragments", highlighted.field));
                projection.insert(
                    fragments_field,
                    Value::Array(fragments.into_iter().map(Value::String).collect()),
                );
            } else {
                highlightings.insert(highlighted.field.clone(), fragments);
            }
        }

        let score_explanation = self
            .query
            .explain_scores
            .then(|| explain(self.guard.searcher(), &self.base_query, hit.doc));

        IndexQueryResult {
            key,
            projection,
            score: hit.score,
            highlightings: (!highlightings.is_empty()).then_some(highlightings),
            score_explanation,
        }
    }

    fn consider(&mut self, hit: ScoredHit) -> Considered {
        let result = self.project_hit(hit);

        if let Some(predicate) = &self.predicate {
            if !predicate(&result) {
                self.skipped += 1;
                return Considered::Skip;
            }
        }

        let lowered_key = result.key.as_ref().map(|key| key.to_lowercase());
        if self.dedupe_enabled() {
            if let Some(lowered) = &lowered_key {
                if self.already_seen_keys.contains(lowered) {
                    self.skipped += 1;
                    return Considered::Skip;
                }
            }
        }

        let canonical = if self.query.is_distinct {
            match result.projection.as_ref() {
                Some(projection) if !projection.is_empty() => {
                    let canonical = canonical_projection(projection);
                    if self.already_seen_projections.contains(&canonical) {
                        self.skipped += 1;
                        return Considered::Skip;
                    }
                    Some(canonical)
                }
                _ => None,
            }
        } else {
            None
        };

        if self.dedupe_enabled() {
            if let Some(lowered) = lowered_key {
                self.already_seen_keys.insert(lowered);
            }
        }
        if let Some(canonical) = canonical {
            self.already_seen_projections.insert(canonical);
        }
        Considered::Emit(Box::new(result))
    }

    fn refill(&mut self) {
        let missing = self.query.page_size - self.returned;
        let fan_out = self.config.max_outputs_per_document(
            self.definition.is_map_reduce,
            self.definition.max_index_outputs_per_document,
        );
        self.docs_to_get = self.docs_to_get.saturating_add(missing.saturating_mul(fan_out));
        self.hits = self.execute_search();
    }
}

impl Iterator for QueryResultIter {
    type Item = crate::Result<IndexQueryResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(cancelled) = self.token.checkpoint() {
            self.done = true;
            return Some(Err(cancelled));
        }
        if !self.started {
            self.initialize();
        }
        loop {
            while self.position < self.hits.hits.len() {
                let hit = self.hits.hits[self.position];
                self.position += 1;
                match self.consider(hit) {
                    Considered::Emit(result) => {
                        self.returned += 1;
                        if self.returned >= self.query.page_size {
                            self.done = true;
                        }
                        return Some(Ok(*result));
                    }
                    Considered::Skip => continue,
                }
            }
            if self.returned >= self.query.page_size || self.hits.is_exhaustive() {
                self.done = true;
                return None;
            }
            if let Err(cancelled) = self.token.checkpoint() {
                self.done = true;
                return Some(Err(cancelled));
            }
            self.refill();
        }
    }
}

fn canonical_projection(projection: &serde_json::Map<String, Value>) -> String {
    serde_json::to_string(projection).expect("projections serialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_queried_fields() {
        assert_eq!(
            extract_queried_fields("title:red AND body:\"some words\""),
            vec!["title".to_string(), "body".to_string()],
        );
        assert_eq!(
            extract_queried_fields("+tag:a -(other:b)"),
            vec!["tag".to_string(), "other".to_string()],
        );
        assert_eq!(extract_queried_fields("bare words only"), Vec::<String>::new());
        // colons inside quotes do not name fields
        assert_eq!(extract_queried_fields("\"a:b\""), Vec::<String>::new());
    }
}
