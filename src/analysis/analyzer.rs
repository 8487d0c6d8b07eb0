use std::collections::HashMap;
use std::sync::Arc;

use crate::common::errors::EngineError;

/// One token produced by analysis, with its offsets into the original
/// text and its position in the token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub position: usize,
}

/// Tokenization behavior for one or more fields.
///
/// Analyzers are stateless and shared; instances built for a single
/// apply or query call are registered in an
/// [`AnalyzerScope`](crate::analysis::AnalyzerScope) and closed when the
/// call ends, whatever the exit path.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(&self, field: &str, text: &str) -> Vec<Token>;

    /// Analyzers marked not-for-querying are skipped when the query-time
    /// wrapper is assembled.
    fn for_querying(&self) -> bool {
        true
    }

    /// Deterministic release hook. Most analyzers hold nothing, but
    /// generator-produced ones may wrap external resources.
    fn close(&self) {}
}

fn single_token(text: String, end: usize) -> Vec<Token> {
    vec![Token { text, start: 0, end, position: 0 }]
}

/// Emits the whole value as a single token, unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordAnalyzer;

impl Analyzer for KeywordAnalyzer {
    fn name(&self) -> &str {
        "Keyword"
    }

    fn analyze(&self, _field: &str, text: &str) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }
        single_token(text.to_string(), text.len())
    }
}

/// Emits the whole value as a single lowercased token. This is the
/// engine default for both indexing and querying.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowercaseKeywordAnalyzer;

impl Analyzer for LowercaseKeywordAnalyzer {
    fn name(&self) -> &str {
        "LowercaseKeyword"
    }

    fn analyze(&self, _field: &str, text: &str) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }
        single_token(text.to_lowercase(), text.len())
    }
}

/// Splits on non-alphanumeric characters and lowercases, the behavior
/// fields marked `Analyzed` get when no explicit analyzer is declared.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardAnalyzer;

impl Analyzer for StandardAnalyzer {
    fn name(&self) -> &str {
        "Standard"
    }

    fn analyze(&self, _field: &str, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut start = None;
        for (offset, character) in text.char_indices() {
            if character.is_alphanumeric() {
                if start.is_none() {
                    start = Some(offset);
                }
            } else if let Some(token_start) = start.take() {
                tokens.push((token_start, offset));
            }
        }
        if let Some(token_start) = start {
            tokens.push((token_start, text.len()));
        }
        tokens
            .into_iter()
            .enumerate()
            .map(|(position, (token_start, token_end))| Token {
                text: text[token_start..token_end].to_lowercase(),
                start: token_start,
                end: token_end,
                position,
            })
            .collect()
    }
}

/// Splits on whitespace without further normalization.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn name(&self) -> &str {
        "Whitespace"
    }

    fn analyze(&self, _field: &str, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0;
        let mut offset = 0;
        for part in text.split_whitespace() {
            // locate the part to recover offsets
            let start = text[offset..].find(part).map(|found| offset + found).unwrap_or(offset);
            let end = start + part.len();
            tokens.push(Token { text: part.to_string(), start, end, position });
            position += 1;
            offset = end;
        }
        tokens
    }
}

/// Named analyzers available to index definitions.
///
/// The built-in set is registered on construction; deployments add
/// their own under the identifier the definition refers to.
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn Analyzer>>,
}

impl Default for AnalyzerRegistry {
    fn default() -> AnalyzerRegistry {
        let mut registry = AnalyzerRegistry { analyzers: HashMap::new() };
        registry.register(Arc::new(KeywordAnalyzer));
        registry.register(Arc::new(LowercaseKeywordAnalyzer));
        registry.register(Arc::new(StandardAnalyzer));
        registry.register(Arc::new(WhitespaceAnalyzer));
        registry
    }
}

impl AnalyzerRegistry {
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.name().to_string(), analyzer);
    }

    pub fn resolve(&self, name: &str) -> crate::Result<Arc<dyn Analyzer>> {
        self.analyzers.get(name).cloned().ok_or_else(|| {
            EngineError::InvalidArgument(format!("unknown analyzer: '{name}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_analyzer_splits_and_lowercases() {
        let tokens = StandardAnalyzer.analyze("body", "Hello, World-42!");
        let texts: Vec<&str> = tokens.iter().map(|token| token.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "world", "42"]);
        assert_eq!(tokens[0].start, 0);
        assert_eq!(tokens[0].end, 5);
        assert_eq!(tokens[2].position, 2);
    }

    #[test]
    fn test_keyword_analyzers() {
        assert_eq!(KeywordAnalyzer.analyze("f", "Items/1")[0].text, "Items/1");
        assert_eq!(LowercaseKeywordAnalyzer.analyze("f", "Items/1")[0].text, "items/1");
        assert!(KeywordAnalyzer.analyze("f", "").is_empty());
    }

    #[test]
    fn test_whitespace_offsets() {
        let tokens = WhitespaceAnalyzer.analyze("f", "ab  cd");
        assert_eq!(tokens.len(), 2);
        assert_eq!((tokens[1].start, tokens[1].end), (4, 6));
    }

    #[test]
    fn test_registry_resolves_builtins() {
        let registry = AnalyzerRegistry::default();
        assert!(registry.resolve("Standard").is_ok());
        assert!(registry.resolve("NoSuchAnalyzer").is_err());
    }
}
