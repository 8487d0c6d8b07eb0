use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use crate::query::spatial::{parse_point, SpatialIndexQuery};
use crate::reader::Searcher;
use crate::DocOrd;

/// Separator splitting a raw query string into intersection
/// sub-queries.
pub const INTERSECT_SEPARATOR: &str = " INTERSECT ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    Must,
    Should,
    MustNot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanClause {
    pub occur: Occur,
    pub query: Query,
}

/// Parsed query tree.
///
/// Phrases execute as conjunctions of their terms; postings carry no
/// positions.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    /// Produced when analysis swallowed every token of a clause.
    MatchNone,
    Term { field: String, term: String },
    Phrase { field: String, terms: Vec<String> },
    Prefix { field: String, prefix: String },
    Range { field: String, low: Bound<String>, high: Bound<String> },
    Boolean { clauses: Vec<BooleanClause> },
    Spatial(SpatialIndexQuery),
}

impl Query {
    /// Wraps the query and a spatial restriction as MUST + MUST.
    pub fn wrap_with_spatial(self, spatial: SpatialIndexQuery) -> Query {
        Query::Boolean {
            clauses: vec![
                BooleanClause { occur: Occur::Must, query: self },
                BooleanClause { occur: Occur::Must, query: Query::Spatial(spatial) },
            ],
        }
    }

    /// Collects every field name the query refers to, for validation.
    pub fn referenced_fields(&self, fields: &mut HashSet<String>) {
        match self {
            Query::MatchAll | Query::MatchNone => {}
            Query::Term { field, .. }
            | Query::Phrase { field, .. }
            | Query::Prefix { field, .. }
            | Query::Range { field, .. } => {
                fields.insert(field.clone());
            }
            Query::Boolean { clauses } => {
                for clause in clauses {
                    clause.query.referenced_fields(fields);
                }
            }
            Query::Spatial(spatial) => {
                fields.insert(spatial.field.clone());
            }
        }
    }

    /// Terms usable for highlighting, per field.
    pub fn highlight_terms(&self, terms: &mut BTreeMap<String, Vec<String>>) {
        match self {
            Query::Term { field, term } => {
                terms.entry(field.clone()).or_default().push(term.clone());
            }
            Query::Phrase { field, terms: phrase_terms } => {
                terms.entry(field.clone()).or_default().extend(phrase_terms.iter().cloned());
            }
            Query::Prefix { field, prefix } => {
                terms.entry(field.clone()).or_default().push(prefix.clone());
            }
            Query::Boolean { clauses } => {
                for clause in clauses {
                    if clause.occur != Occur::MustNot {
                        clause.query.highlight_terms(terms);
                    }
                }
            }
            _ => {}
        }
    }
}

fn idf(searcher: &Searcher, field: &str, term: &str) -> f32 {
    let num_docs = searcher.num_docs() as f32;
    let doc_freq = searcher.doc_freq(field, term) as f32;
    1.0 + ((num_docs + 1.0) / (doc_freq + 1.0)).ln()
}

fn term_scores(searcher: &Searcher, field: &str, term: &str) -> BTreeMap<DocOrd, f32> {
    let term_idf = idf(searcher, field, term);
    let mut scores = BTreeMap::new();
    searcher.for_each_term_doc(field, term, |doc, freq| {
        let tf = (freq as f32).sqrt();
        scores.insert(doc, tf * term_idf);
    });
    scores
}

fn union_into(target: &mut BTreeMap<DocOrd, f32>, source: BTreeMap<DocOrd, f32>) {
    for (doc, score) in source {
        *target.entry(doc).or_insert(0.0) += score;
    }
}

fn intersect(left: BTreeMap<DocOrd, f32>, right: &BTreeMap<DocOrd, f32>) -> BTreeMap<DocOrd, f32> {
    left.into_iter()
        .filter_map(|(doc, score)| right.get(&doc).map(|other| (doc, score + other)))
        .collect()
}

fn match_all_scores(searcher: &Searcher) -> BTreeMap<DocOrd, f32> {
    let mut scores = BTreeMap::new();
    searcher.for_each_live_doc(|doc| {
        scores.insert(doc, 1.0);
    });
    scores
}

fn spatial_scores(searcher: &Searcher, spatial: &SpatialIndexQuery) -> BTreeMap<DocOrd, f32> {
    let mut scores = BTreeMap::new();
    searcher.for_each_live_doc(|doc| {
        let Some(stored) = searcher.stored(doc) else {
            return;
        };
        let Some(value) = stored.first_value(&spatial.field) else {
            return;
        };
        if let Some((lng, lat)) = parse_point(value) {
            if spatial.matches(lng, lat) {
                scores.insert(doc, 1.0);
            }
        }
    });
    scores
}

/// Evaluates a query into the scored set of matching live documents.
///
/// Scoring is tf-idf: `sqrt(tf) * (1 + ln((N+1)/(df+1)))` summed over
/// the matched terms.
pub(crate) fn evaluate(searcher: &Searcher, query: &Query) -> BTreeMap<DocOrd, f32> {
    match query {
        Query::MatchAll => match_all_scores(searcher),
        Query::MatchNone => BTreeMap::new(),
        Query::Term { field, term } => term_scores(searcher, field, term),
        Query::Phrase { field, terms } => {
            let mut iter = terms.iter();
            let Some(first) = iter.next() else {
                return BTreeMap::new();
            };
            let mut scores = term_scores(searcher, field, first);
            for term in iter {
                if scores.is_empty() {
                    break;
                }
                scores = intersect(scores, &term_scores(searcher, field, term));
            }
            scores
        }
        Query::Prefix { field, prefix } => {
            let mut matching_terms: HashSet<String> = HashSet::new();
            for reader in searcher.segment_readers() {
                for (term, _) in reader.terms_with_prefix(field, prefix) {
                    matching_terms.insert(term.to_string());
                }
            }
            let mut scores = BTreeMap::new();
            for term in matching_terms {
                union_into(&mut scores, term_scores(searcher, field, &term));
            }
            scores
        }
        Query::Range { field, low, high } => {
            let mut matching_terms: HashSet<String> = HashSet::new();
            for reader in searcher.segment_readers() {
                let low_bound = bound_as_ref(low);
                let high_bound = bound_as_ref(high);
                for (term, _) in reader.terms_in_range(field, low_bound, high_bound) {
                    matching_terms.insert(term.to_string());
                }
            }
            let mut scores = BTreeMap::new();
            for term in matching_terms {
                union_into(&mut scores, term_scores(searcher, field, &term));
            }
            scores
        }
        Query::Boolean { clauses } => evaluate_boolean(searcher, clauses),
        Query::Spatial(spatial) => spatial_scores(searcher, spatial),
    }
}

fn bound_as_ref(bound: &Bound<String>) -> Bound<&str> {
    match bound {
        Bound::Included(value) => Bound::Included(value.as_str()),
        Bound::Excluded(value) => Bound::Excluded(value.as_str()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn evaluate_boolean(searcher: &Searcher, clauses: &[BooleanClause]) -> BTreeMap<DocOrd, f32> {
    let mut must: Option<BTreeMap<DocOrd, f32>> = None;
    let mut should: BTreeMap<DocOrd, f32> = BTreeMap::new();
    let mut has_should = false;
    let mut excluded: HashSet<DocOrd> = HashSet::new();

    for clause in clauses {
        match clause.occur {
            Occur::Must => {
                let scores = evaluate(searcher, &clause.query);
                must = Some(match must {
                    Some(accumulated) => intersect(accumulated, &scores),
                    None => scores,
                });
            }
            Occur::Should => {
                has_should = true;
                union_into(&mut should, evaluate(searcher, &clause.query));
            }
            Occur::MustNot => {
                for doc in evaluate(searcher, &clause.query).keys() {
                    excluded.insert(*doc);
                }
            }
        }
    }

    let mut result = match (must, has_should) {
        (Some(mut must_scores), true) => {
            // should clauses only boost documents the must set kept
            for (doc, score) in should {
                if let Some(existing) = must_scores.get_mut(&doc) {
                    *existing += score;
                }
            }
            must_scores
        }
        (Some(must_scores), false) => must_scores,
        (None, true) => should,
        // pure-negative query applies against every live document
        (None, false) => match_all_scores(searcher),
    };
    result.retain(|doc, _| !excluded.contains(doc));
    result
}

/// Renders the library's textual explanation of one hit's score.
pub(crate) fn explain(searcher: &Searcher, query: &Query, doc: DocOrd) -> String {
    match query {
        Query::MatchAll => "1.0 = match-all".to_string(),
        Query::MatchNone => "0.0 = match-none".to_string(),
        Query::Term { field, term } => {
            let mut freq = 0u32;
            searcher.for_each_term_doc(field, term, |candidate, term_freq| {
                if candidate == doc {
                    freq = term_freq;
                }
            });
            let term_idf = idf(searcher, field, term);
            let score = (freq as f32).sqrt() * term_idf;
            format!(
                "{score:.4} = weight({field}:{term}), tf={freq}, idf={term_idf:.4}, docFreq={}",
                searcher.doc_freq(field, term),
            )
        }
        Query::Phrase { field, terms } => {
            let parts: Vec<String> = terms
                .iter()
                .map(|term| explain(searcher, &Query::Term { field: field.clone(), term: term.clone() }, doc))
                .collect();
            format!("phrase({field}): [{}]", parts.join(", "))
        }
        Query::Prefix { field, prefix } => format!("prefix({field}:{prefix}*)"),
        Query::Range { field, .. } => format!("range({field})"),
        Query::Boolean { clauses } => {
            let parts: Vec<String> = clauses
                .iter()
                .filter(|clause| clause.occur != Occur::MustNot)
                .map(|clause| explain(searcher, &clause.query, doc))
                .collect();
            format!("sum of: [{}]", parts.join(", "))
        }
        Query::Spatial(spatial) => format!("spatial({})", spatial.field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::directory::{Directory, RamDirectory};
    use crate::index::definition::{FieldIndexing, IndexDefinition, DOCUMENT_ID_FIELD};
    use crate::index::IndexEntry;
    use crate::segment::SegmentMetaInventory;
    use crate::writer::{IndexWriter, SnapshotPolicy};

    fn searcher_over(docs: &[(&str, &str)]) -> Searcher {
        let directory = RamDirectory::create();
        let inventory = SegmentMetaInventory::default();
        let mut definition = IndexDefinition::new("t", 1);
        definition.indexes.insert("body".to_string(), FieldIndexing::Analyzed);
        let retention = SnapshotPolicy::new();
        let mut writer = IndexWriter::open(directory.box_clone(), inventory.clone()).unwrap();
        for (key, body) in docs {
            let entry = IndexEntry::new()
                .with_field(DOCUMENT_ID_FIELD, *key)
                .with_field("body", *body);
            writer.add_entry(&entry, &StandardAnalyzer, &definition);
        }
        writer.commit(Default::default(), &retention).unwrap();
        drop(writer);
        Searcher::open(&directory, &inventory, 1).unwrap()
    }

    fn docs_of(scores: &BTreeMap<DocOrd, f32>) -> Vec<DocOrd> {
        scores.keys().copied().collect()
    }

    #[test]
    fn test_term_and_phrase_evaluation() {
        let searcher = searcher_over(&[
            ("items/1", "red apples and green pears"),
            ("items/2", "green apples"),
            ("items/3", "red wine"),
        ]);
        let term = |term: &str| Query::Term { field: "body".to_string(), term: term.to_string() };
        assert_eq!(docs_of(&evaluate(&searcher, &term("apples"))), vec![0, 1]);
        assert_eq!(docs_of(&evaluate(&searcher, &term("red"))), vec![0, 2]);
        let phrase = Query::Phrase {
            field: "body".to_string(),
            terms: vec!["green".to_string(), "apples".to_string()],
        };
        assert_eq!(docs_of(&evaluate(&searcher, &phrase)), vec![0, 1]);
    }

    #[test]
    fn test_boolean_evaluation() {
        let searcher = searcher_over(&[
            ("items/1", "red apples"),
            ("items/2", "green apples"),
            ("items/3", "red wine"),
        ]);
        let term = |term: &str| Query::Term { field: "body".to_string(), term: term.to_string() };
        let query = Query::Boolean {
            clauses: vec![
                BooleanClause { occur: Occur::Must, query: term("red") },
                BooleanClause { occur: Occur::MustNot, query: term("wine") },
            ],
        };
        assert_eq!(docs_of(&evaluate(&searcher, &query)), vec![0]);

        let pure_negative = Query::Boolean {
            clauses: vec![BooleanClause { occur: Occur::MustNot, query: term("apples") }],
        };
        assert_eq!(docs_of(&evaluate(&searcher, &pure_negative)), vec![2]);
    }

    #[test]
    fn test_prefix_and_range_evaluation() {
        let searcher = searcher_over(&[
            ("items/1", "alpha"),
            ("items/2", "alphabet"),
            ("items/3", "beta"),
        ]);
        let prefix = Query::Prefix { field: "body".to_string(), prefix: "alpha".to_string() };
        assert_eq!(docs_of(&evaluate(&searcher, &prefix)), vec![0, 1]);

        let range = Query::Range {
            field: "body".to_string(),
            low: Bound::Included("alpha".to_string()),
            high: Bound::Excluded("beta".to_string()),
        };
        assert_eq!(docs_of(&evaluate(&searcher, &range)), vec![0, 1]);
    }

    #[test]
    fn test_rarer_terms_score_higher() {
        let searcher = searcher_over(&[
            ("items/1", "common rare"),
            ("items/2", "common"),
            ("items/3", "common"),
        ]);
        let rare = evaluate(
            &searcher,
            &Query::Term { field: "body".to_string(), term: "rare".to_string() },
        );
        let common = evaluate(
            &searcher,
            &Query::Term { field: "body".to_string(), term: "common".to_string() },
        );
        assert!(rare[&0] > common[&0]);
    }

    #[test]
    fn test_explain_mentions_term_statistics() {
        let searcher = searcher_over(&[("items/1", "apples")]);
        let explanation = explain(
            &searcher,
            &Query::Term { field: "body".to_string(), term: "apples".to_string() },
            0,
        );
        assert!(explanation.contains("body:apples"));
        assert!(explanation.contains("tf=1"));
    }
}
