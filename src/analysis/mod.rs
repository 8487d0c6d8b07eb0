pub mod analyzer;
pub mod per_field;

pub use analyzer::{
    Analyzer, AnalyzerRegistry, KeywordAnalyzer, LowercaseKeywordAnalyzer, StandardAnalyzer,
    Token, WhitespaceAnalyzer,
};
pub use per_field::{build_analyzer, AnalyzerScope, PerFieldAnalyzer, ALL_FIELDS};
