use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::analyzer::{
    Analyzer, AnalyzerRegistry, KeywordAnalyzer, StandardAnalyzer, Token,
};
use crate::index::definition::{FieldIndexing, IndexDefinition};
use crate::index::extensions::AnalyzerGenerator;

/// Definition key that replaces the default analyzer for every field.
pub const ALL_FIELDS: &str = "__all_fields";

/// Dispatches analysis per field, falling back to a default.
pub struct PerFieldAnalyzer {
    default_analyzer: Arc<dyn Analyzer>,
    per_field: HashMap<String, Arc<dyn Analyzer>>,
}

impl PerFieldAnalyzer {
    pub fn new(default_analyzer: Arc<dyn Analyzer>) -> PerFieldAnalyzer {
        PerFieldAnalyzer { default_analyzer, per_field: HashMap::new() }
    }

    pub fn add_analyzer(&mut self, field: impl Into<String>, analyzer: Arc<dyn Analyzer>) {
        self.per_field.insert(field.into(), analyzer);
    }

    pub fn analyzer_for(&self, field: &str) -> &Arc<dyn Analyzer> {
        self.per_field.get(field).unwrap_or(&self.default_analyzer)
    }
}

impl Analyzer for PerFieldAnalyzer {
    fn name(&self) -> &str {
        "PerField"
    }

    fn analyze(&self, field: &str, text: &str) -> Vec<Token> {
        self.analyzer_for(field).analyze(field, text)
    }
}

/// Dispose list for analyzers created within a single apply or query
/// call. Dropped on every exit path; closes in reverse creation order.
#[derive(Default)]
pub struct AnalyzerScope {
    to_close: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerScope {
    pub fn track(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.to_close.push(analyzer);
    }
}

impl Drop for AnalyzerScope {
    fn drop(&mut self) {
        for analyzer in self.to_close.drain(..).rev() {
            analyzer.close();
        }
    }
}

/// Assembles the per-field analyzer wrapper for indexing or querying.
///
/// Rules are applied in order, later rules overriding earlier ones for
/// the same field:
/// 1. start from the caller's default analyzer;
/// 2. an `__all_fields` entry replaces that default;
/// 3. each named analyzer attaches to its field — when building the
///    querying wrapper, analyzers marked not-for-querying are skipped;
/// 4. fields marked `NotAnalyzed` get a keyword analyzer, fields marked
///    `Analyzed` without an explicit analyzer get the standard one;
/// 5. each registered generator may replace the whole chain; a replaced
///    chain is closed unless it was the caller's input.
pub fn build_analyzer(
    definition: &IndexDefinition,
    registry: &AnalyzerRegistry,
    default_analyzer: Arc<dyn Analyzer>,
    for_querying: bool,
    generators: &[Arc<dyn AnalyzerGenerator>],
    scope: &mut AnalyzerScope,
) -> crate::Result<Arc<dyn Analyzer>> {
    let caller_input = default_analyzer.clone();

    let mut effective_default = default_analyzer;
    if let Some(name) = definition.analyzers.get(ALL_FIELDS) {
        effective_default = registry.resolve(name)?;
    }
    let mut wrapper = PerFieldAnalyzer::new(effective_default);

    for (field, name) in &definition.analyzers {
        if field == ALL_FIELDS {
            continue;
        }
        let analyzer = registry.resolve(name)?;
        if for_querying && !analyzer.for_querying() {
            continue;
        }
        wrapper.add_analyzer(field.clone(), analyzer);
    }

    for (field, indexing) in &definition.indexes {
        match indexing {
            FieldIndexing::NotAnalyzed => {
                wrapper.add_analyzer(field.clone(), Arc::new(KeywordAnalyzer));
            }
            FieldIndexing::Analyzed => {
                if !definition.analyzers.contains_key(field) {
                    wrapper.add_analyzer(field.clone(), Arc::new(StandardAnalyzer));
                }
            }
            FieldIndexing::NotIndexed => {}
        }
    }

    let mut current: Arc<dyn Analyzer> = Arc::new(wrapper);
    scope.track(current.clone());

    for generator in generators {
        if let Some(replacement) = generator.generate(definition, current.clone(), for_querying) {
            if !Arc::ptr_eq(&current, &caller_input) {
                current.close();
            }
            scope.track(replacement.clone());
            current = replacement;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::LowercaseKeywordAnalyzer;

    fn definition_with(
        analyzers: &[(&str, &str)],
        indexes: &[(&str, FieldIndexing)],
    ) -> IndexDefinition {
        let mut definition = IndexDefinition::new("test", 1);
        for (field, name) in analyzers {
            definition.analyzers.insert(field.to_string(), name.to_string());
        }
        for (field, indexing) in indexes {
            definition.indexes.insert(field.to_string(), *indexing);
        }
        definition
    }

    struct NotForQuerying;

    impl Analyzer for NotForQuerying {
        fn name(&self) -> &str {
            "IndexOnly"
        }

        fn analyze(&self, _field: &str, text: &str) -> Vec<Token> {
            vec![Token { text: format!("ix:{text}"), start: 0, end: text.len(), position: 0 }]
        }

        fn for_querying(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_not_analyzed_gets_keyword() {
        let definition = definition_with(&[], &[("tag", FieldIndexing::NotAnalyzed)]);
        let registry = AnalyzerRegistry::default();
        let mut scope = AnalyzerScope::default();
        let analyzer = build_analyzer(
            &definition,
            &registry,
            Arc::new(LowercaseKeywordAnalyzer),
            false,
            &[],
            &mut scope,
        )
        .unwrap();
        // keyword keeps case, the default would have lowercased
        assert_eq!(analyzer.analyze("tag", "Foo Bar")[0].text, "Foo Bar");
        assert_eq!(analyzer.analyze("other", "Foo Bar")[0].text, "foo bar");
    }

    #[test]
    fn test_analyzed_without_explicit_analyzer_gets_standard() {
        let definition = definition_with(&[], &[("body", FieldIndexing::Analyzed)]);
        let registry = AnalyzerRegistry::default();
        let mut scope = AnalyzerScope::default();
        let analyzer = build_analyzer(
            &definition,
            &registry,
            Arc::new(LowercaseKeywordAnalyzer),
            false,
            &[],
            &mut scope,
        )
        .unwrap();
        let tokens = analyzer.analyze("body", "red green");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_querying_skips_not_for_querying_analyzer() {
        let mut registry = AnalyzerRegistry::default();
        registry.register(Arc::new(NotForQuerying));
        let definition = definition_with(&[("body", "IndexOnly")], &[]);
        let mut scope = AnalyzerScope::default();

        let indexing = build_analyzer(
            &definition,
            &registry,
            Arc::new(LowercaseKeywordAnalyzer),
            false,
            &[],
            &mut scope,
        )
        .unwrap();
        assert_eq!(indexing.analyze("body", "x")[0].text, "ix:x");

        let querying = build_analyzer(
            &definition,
            &registry,
            Arc::new(LowercaseKeywordAnalyzer),
            true,
            &[],
            &mut scope,
        )
        .unwrap();
        assert_eq!(querying.analyze("body", "X")[0].text, "x");
    }

    #[test]
    fn test_all_fields_overrides_default() {
        let definition = definition_with(&[(ALL_FIELDS, "Keyword")], &[]);
        let registry = AnalyzerRegistry::default();
        let mut scope = AnalyzerScope::default();
        let analyzer = build_analyzer(
            &definition,
            &registry,
            Arc::new(LowercaseKeywordAnalyzer),
            false,
            &[],
            &mut scope,
        )
        .unwrap();
        assert_eq!(analyzer.analyze("anything", "ABC")[0].text, "ABC");
    }
}
