use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use ordered_float::OrderedFloat;

use crate::index::definition::{DISTANCE_FIELD, RANGE_SUFFIX};
use crate::query::SortField;
use crate::query::spatial::{haversine_km, parse_point};
use crate::reader::Searcher;
use crate::DocOrd;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredHit {
    pub doc: DocOrd,
    pub score: f32,
}

/// Outcome of one search execution. `total_hits` counts every matching
/// document; `hits` holds the requested prefix in result order.
#[derive(Debug, Clone, Default)]
pub struct SearchHits {
    pub hits: Vec<ScoredHit>,
    pub total_hits: usize,
}

impl SearchHits {
    /// Whether every matching document is already in `hits`.
    pub fn is_exhaustive(&self) -> bool {
        self.hits.len() >= self.total_hits
    }
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum SortValue {
    Missing,
    Number(OrderedFloat<f64>),
    Text(String),
}

fn sort_value(searcher: &Searcher, doc: DocOrd, field: &str, origin: Option<(f64, f64)>) -> SortValue {
    if field == DISTANCE_FIELD {
        let Some((origin_lat, origin_lng)) = origin else {
            return SortValue::Missing;
        };
        let Some(stored) = searcher.stored(doc) else {
            return SortValue::Missing;
        };
        for stored_field in &stored.fields {
            if let Some((lng, lat)) = parse_point(&stored_field.value) {
                return SortValue::Number(OrderedFloat(haversine_km(
                    origin_lat, origin_lng, lat, lng,
                )));
            }
        }
        return SortValue::Missing;
    }

    let Some(stored) = searcher.stored(doc) else {
        return SortValue::Missing;
    };
    // a `_Range` sort field falls back to its base field's stored value
    let value = stored
        .first_value(field)
        .or_else(|| field.strip_suffix(RANGE_SUFFIX).and_then(|base| stored.first_value(base)));
    match value {
        Some(text) => match text.parse::<f64>() {
            Ok(number) => SortValue::Number(OrderedFloat(number)),
            Err(_) => SortValue::Text(text.to_lowercase()),
        },
        None => SortValue::Missing,
    }
}

fn compare_sort_values(left: &SortValue, right: &SortValue) -> Ordering {
    match (left, right) {
        (SortValue::Missing, SortValue::Missing) => Ordering::Equal,
        (SortValue::Missing, _) => Ordering::Greater,
        (_, SortValue::Missing) => Ordering::Less,
        (SortValue::Number(a), SortValue::Number(b)) => a.cmp(b),
        (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
        (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
        (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
    }
}

/// Orders the scored set and keeps the requested prefix.
///
/// With sort fields, documents order by each field in turn (missing
/// values last, `__distance` resolved against the spatial origin);
/// without, by descending score. Ties break by ascending ordinal so
/// pagination is stable.
pub(crate) fn collect_hits(
    searcher: &Searcher,
    scored: BTreeMap<DocOrd, f32>,
    requested: usize,
    sort: &[SortField],
    spatial_origin: Option<(f64, f64)>,
) -> SearchHits {
    let total_hits = scored.len();
    let mut hits: Vec<ScoredHit> =
        scored.into_iter().map(|(doc, score)| ScoredHit { doc, score }).collect();

    if sort.is_empty() {
        hits.sort_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then_with(|| a.doc.cmp(&b.doc))
        });
    } else {
        let mut keys: HashMap<DocOrd, Vec<SortValue>> = HashMap::with_capacity(hits.len());
        for hit in &hits {
            let values = sort
                .iter()
                .map(|sort_field| {
                    sort_value(searcher, hit.doc, &sort_field.field, spatial_origin)
                })
                .collect();
            keys.insert(hit.doc, values);
        }
        hits.sort_by(|a, b| {
            let left = &keys[&a.doc];
            let right = &keys[&b.doc];
            for (index, sort_field) in sort.iter().enumerate() {
                let mut ordering = compare_sort_values(&left[index], &right[index]);
                if sort_field.descending {
                    ordering = ordering.reverse();
                }
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.doc.cmp(&b.doc)
        });
    }

    hits.truncate(requested);
    SearchHits { hits, total_hits }
}

/// Counts, per document of the base query, how many of the subsequent
/// INTERSECT sub-queries matched it.
#[derive(Debug, Default)]
pub struct IntersectionCollector {
    match_counts: HashMap<DocOrd, usize>,
}

impl IntersectionCollector {
    pub fn new() -> IntersectionCollector {
        IntersectionCollector::default()
    }

    pub fn collect_matches(&mut self, docs: &HashSet<DocOrd>) {
        for doc in docs {
            *self.match_counts.entry(*doc).or_insert(0) += 1;
        }
    }

    /// Documents matched by all `required` sub-queries.
    pub fn matching_all(&self, required: usize) -> HashSet<DocOrd> {
        self.match_counts
            .iter()
            .filter(|(_, count)| **count >= required)
            .map(|(doc, _)| *doc)
            .collect()
    }
}
