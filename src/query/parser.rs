use std::ops::Bound;

use crate::analysis::Analyzer;
use crate::common::errors::EngineError;
use crate::index::definition::CATCH_ALL_FIELD;
use crate::query::query::{BooleanClause, Occur, Query};

/// Lucene-style query parser.
///
/// Grammar: bare terms, `field:term`, quoted phrases, trailing-`*`
/// prefixes, `[a TO b]` / `{a TO b}` ranges with `*` as an open bound,
/// `AND`/`OR`/`NOT` keywords, `+`/`-` prefixes and parentheses. Empty
/// or whitespace input parses to match-all. Term text goes through the
/// query-time analyzer of its field; a multi-token result becomes a
/// phrase, a zero-token result drops the clause.
pub struct QueryParser<'a> {
    analyzer: &'a dyn Analyzer,
    default_field: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    LParen,
    RParen,
    Plus,
    Minus,
    And,
    Or,
    Not,
    /// `word` or `field:word`, `field:[a TO b]`, `field:"phrase"` — the
    /// raw text, colon included.
    Text(String),
    /// Bare quoted phrase.
    Quoted(String),
}

impl<'a> QueryParser<'a> {
    pub fn new(analyzer: &'a dyn Analyzer) -> QueryParser<'a> {
        QueryParser { analyzer, default_field: CATCH_ALL_FIELD.to_string() }
    }

    pub fn with_default_field(mut self, field: impl Into<String>) -> QueryParser<'a> {
        self.default_field = field.into();
        self
    }

    pub fn parse(&self, text: &str) -> crate::Result<Query> {
        if text.trim().is_empty() {
            return Ok(Query::MatchAll);
        }
        let lexemes = lex(text)?;
        let mut position = 0;
        let query = self.parse_clauses(&lexemes, &mut position)?;
        if position < lexemes.len() {
            return Err(EngineError::QueryParse(format!(
                "unexpected ')' at clause {position} in {text:?}"
            )));
        }
        Ok(query)
    }

    fn parse_clauses(&self, lexemes: &[Lexeme], position: &mut usize) -> crate::Result<Query> {
        let mut clauses: Vec<BooleanClause> = Vec::new();
        let mut pending_and = false;
        let mut pending_or = false;

        while *position < lexemes.len() {
            match &lexemes[*position] {
                Lexeme::RParen => break,
                Lexeme::And => {
                    pending_and = true;
                    *position += 1;
                }
                Lexeme::Or => {
                    pending_or = true;
                    *position += 1;
                }
                _ => {
                    let mut occur = if pending_and {
                        // AND also binds the clause to its left
                        if let Some(last) = clauses.last_mut() {
                            if last.occur == Occur::Should {
                                last.occur = Occur::Must;
                            }
                        }
                        Occur::Must
                    } else {
                        Occur::Should
                    };
                    if pending_or {
                        occur = Occur::Should;
                    }
                    pending_and = false;
                    pending_or = false;

                    match &lexemes[*position] {
                        Lexeme::Plus => {
                            *position += 1;
                            occur = Occur::Must;
                        }
                        Lexeme::Minus | Lexeme::Not => {
                            *position += 1;
                            occur = Occur::MustNot;
                        }
                        _ => {}
                    }
                    if let Some(query) = self.parse_primary(lexemes, position)? {
                        clauses.push(BooleanClause { occur, query });
                    }
                }
            }
        }

        match clauses.len() {
            0 => Ok(Query::MatchNone),
            1 if clauses[0].occur != Occur::MustNot => {
                Ok(clauses.into_iter().next().expect("one clause").query)
            }
            _ => Ok(Query::Boolean { clauses }),
        }
    }

    fn parse_primary(
        &self,
        lexemes: &[Lexeme],
        position: &mut usize,
    ) -> crate::Result<Option<Query>> {
        match lexemes.get(*position) {
            Some(Lexeme::LParen) => {
                *position += 1;
                let inner = self.parse_clauses(lexemes, position)?;
                match lexemes.get(*position) {
                    Some(Lexeme::RParen) => {
                        *position += 1;
                        Ok(Some(inner))
                    }
                    _ => Err(EngineError::QueryParse("unbalanced parentheses".to_string())),
                }
            }
            Some(Lexeme::Quoted(phrase)) => {
                *position += 1;
                Ok(self.phrase_query(&self.default_field, phrase))
            }
            Some(Lexeme::Text(text)) => {
                *position += 1;
                self.text_query(text)
            }
            Some(other) => Err(EngineError::QueryParse(format!(
                "unexpected token {other:?}"
            ))),
            None => Err(EngineError::QueryParse("unexpected end of query".to_string())),
        }
    }

    fn text_query(&self, text: &str) -> crate::Result<Option<Query>> {
        let (field, rest) = match text.find(':') {
            // a trailing colon with nothing behind it is a parse error
            Some(at) if at + 1 == text.len() => {
                return Err(EngineError::QueryParse(format!("missing value after {text:?}")));
            }
            Some(at) => (&text[..at], &text[at + 1..]),
            None => (self.default_field.as_str(), text),
        };

        if let Some(stripped) = rest.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')) {
            return self.range_query(field, stripped, true);
        }
        if let Some(stripped) = rest.strip_prefix('{').and_then(|inner| inner.strip_suffix('}')) {
            return self.range_query(field, stripped, false);
        }
        if let Some(stripped) = rest.strip_prefix('"').and_then(|inner| inner.strip_suffix('"')) {
            return Ok(self.phrase_query(field, stripped));
        }
        if let Some(prefix) = rest.strip_suffix('*') {
            if !prefix.is_empty() {
                let analyzed = self.analyze_single(field, prefix).unwrap_or_else(|| prefix.to_string());
                return Ok(Some(Query::Prefix { field: field.to_string(), prefix: analyzed }));
            }
            // a lone `field:*` matches every document with the field —
            // expressed as an unbounded range
            return Ok(Some(Query::Range {
                field: field.to_string(),
                low: Bound::Unbounded,
                high: Bound::Unbounded,
            }));
        }

        let tokens = self.analyzer.analyze(field, rest);
        match tokens.len() {
            0 => Ok(None),
            1 => Ok(Some(Query::Term {
                field: field.to_string(),
                term: tokens.into_iter().next().expect("one token").text,
            })),
            _ => Ok(Some(Query::Phrase {
                field: field.to_string(),
                terms: tokens.into_iter().map(|token| token.text).collect(),
            })),
        }
    }

    fn range_query(
        &self,
        field: &str,
        inner: &str,
        inclusive: bool,
    ) -> crate::Result<Option<Query>> {
        let Some((low_raw, high_raw)) = inner.split_once(" TO ") else {
            return Err(EngineError::QueryParse(format!(
                "a range must have the form [low TO high], got {inner:?}"
            )));
        };
        let bound = |raw: &str| -> Bound<String> {
            let trimmed = raw.trim();
            if trimmed == "*" || trimmed.is_empty() {
                return Bound::Unbounded;
            }
            let value =
                self.analyze_single(field, trimmed).unwrap_or_else(|| trimmed.to_string());
            if inclusive {
                Bound::Included(value)
            } else {
                Bound::Excluded(value)
            }
        };
        Ok(Some(Query::Range {
            field: field.to_string(),
            low: bound(low_raw),
            high: bound(high_raw),
        }))
    }

    fn phrase_query(&self, field: &str, phrase: &str) -> Option<Query> {
        let tokens = self.analyzer.analyze(field, phrase);
        match tokens.len() {
            0 => None,
            1 => Some(Query::Term {
                field: field.to_string(),
                term: tokens.into_iter().next().expect("one token").text,
            }),
            _ => Some(Query::Phrase {
                field: field.to_string(),
                terms: tokens.into_iter().map(|token| token.text).collect(),
            }),
        }
    }

    fn analyze_single(&self, field: &str, text: &str) -> Option<String> {
        let tokens = self.analyzer.analyze(field, text);
        if tokens.len() == 1 {
            tokens.into_iter().next().map(|token| token.text)
        } else {
            None
        }
    }
}

fn lex(text: &str) -> crate::Result<Vec<Lexeme>> {
    let mut lexemes = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut at = 0;

    while at < chars.len() {
        let character = chars[at];
        match character {
            character if character.is_whitespace() => {
                at += 1;
            }
            '(' => {
                lexemes.push(Lexeme::LParen);
                at += 1;
            }
            ')' => {
                lexemes.push(Lexeme::RParen);
                at += 1;
            }
            '+' => {
                lexemes.push(Lexeme::Plus);
                at += 1;
            }
            '-' => {
                lexemes.push(Lexeme::Minus);
                at += 1;
            }
            '"' => {
                let (phrase, consumed) = read_quoted(&chars, at)?;
                lexemes.push(Lexeme::Quoted(phrase));
                at = consumed;
            }
            _ => {
                let (word, consumed) = read_word(&chars, at)?;
                match word.as_str() {
                    "AND" => lexemes.push(Lexeme::And),
                    "OR" => lexemes.push(Lexeme::Or),
                    "NOT" => lexemes.push(Lexeme::Not),
                    _ => lexemes.push(Lexeme::Text(word)),
                }
                at = consumed;
            }
        }
    }
    Ok(lexemes)
}

fn read_quoted(chars: &[char], start: usize) -> crate::Result<(String, usize)> {
    let mut at = start + 1;
    let mut phrase = String::new();
    while at < chars.len() {
        if chars[at] == '"' {
            return Ok((phrase, at + 1));
        }
        phrase.push(chars[at]);
        at += 1;
    }
    Err(EngineError::QueryParse("unterminated quoted phrase".to_string()))
}

/// Reads one word. A `:[`, `:{` or `:"` continues through the matching
/// terminator, whitespace included, so `price_Range:[10 TO 20]` is one
/// lexeme.
fn read_word(chars: &[char], start: usize) -> crate::Result<(String, usize)> {
    let mut at = start;
    let mut word = String::new();
    while at < chars.len() {
        let character = chars[at];
        if character.is_whitespace() || character == '(' || character == ')' {
            break;
        }
        if character == ':' && at + 1 < chars.len() {
            let next = chars[at + 1];
            if next == '[' || next == '{' || next == '"' {
                let terminator = match next {
                    '[' => ']',
                    '{' => '}',
                    _ => '"',
                };
                word.push(':');
                word.push(next);
                at += 2;
                while at < chars.len() && chars[at] != terminator {
                    word.push(chars[at]);
                    at += 1;
                }
                if at == chars.len() {
                    return Err(EngineError::QueryParse(format!(
                        "unterminated '{next}' in {word:?}"
                    )));
                }
                word.push(terminator);
                at += 1;
                return Ok((word, at));
            }
        }
        word.push(character);
        at += 1;
    }
    Ok((word, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{LowercaseKeywordAnalyzer, PerFieldAnalyzer, StandardAnalyzer};
    use std::sync::Arc;

    fn parser_analyzer() -> PerFieldAnalyzer {
        let mut analyzer = PerFieldAnalyzer::new(Arc::new(LowercaseKeywordAnalyzer));
        analyzer.add_analyzer("body", Arc::new(StandardAnalyzer));
        analyzer
    }

    #[test]
    fn test_empty_query_is_match_all() {
        let analyzer = parser_analyzer();
        let parser = QueryParser::new(&analyzer);
        assert_eq!(parser.parse("").unwrap(), Query::MatchAll);
        assert_eq!(parser.parse("   \t").unwrap(), Query::MatchAll);
    }

    #[test]
    fn test_field_term() {
        let analyzer = parser_analyzer();
        let parser = QueryParser::new(&analyzer);
        assert_eq!(
            parser.parse("name:Apples").unwrap(),
            Query::Term { field: "name".to_string(), term: "apples".to_string() },
        );
    }

    #[test]
    fn test_multi_token_value_becomes_phrase() {
        let analyzer = parser_analyzer();
        let parser = QueryParser::new(&analyzer);
        assert_eq!(
            parser.parse("body:\"Red Apples\"").unwrap(),
            Query::Phrase {
                field: "body".to_string(),
                terms: vec!["red".to_string(), "apples".to_string()],
            },
        );
    }

    #[test]
    fn test_boolean_operators() {
        let analyzer = parser_analyzer();
        let parser = QueryParser::new(&analyzer);
        let query = parser.parse("name:a AND name:b").unwrap();
        let Query::Boolean { clauses } = query else {
            panic!("expected boolean");
        };
        assert_eq!(clauses.len(), 2);
        assert!(clauses.iter().all(|clause| clause.occur == Occur::Must));

        let query = parser.parse("name:a OR name:b").unwrap();
        let Query::Boolean { clauses } = query else {
            panic!("expected boolean");
        };
        assert!(clauses.iter().all(|clause| clause.occur == Occur::Should));

        let query = parser.parse("name:a -name:b").unwrap();
        let Query::Boolean { clauses } = query else {
            panic!("expected boolean");
        };
        assert_eq!(clauses[1].occur, Occur::MustNot);
    }

    #[test]
    fn test_range_with_spaces_is_one_clause() {
        let analyzer = parser_analyzer();
        let parser = QueryParser::new(&analyzer);
        assert_eq!(
            parser.parse("price_Range:[10 TO 20]").unwrap(),
            Query::Range {
                field: "price_Range".to_string(),
                low: Bound::Included("10".to_string()),
                high: Bound::Included("20".to_string()),
            },
        );
        assert_eq!(
            parser.parse("price_Range:{* TO 20}").unwrap(),
            Query::Range {
                field: "price_Range".to_string(),
                low: Bound::Unbounded,
                high: Bound::Excluded("20".to_string()),
            },
        );
    }

    #[test]
    fn test_prefix_query() {
        let analyzer = parser_analyzer();
        let parser = QueryParser::new(&analyzer);
        assert_eq!(
            parser.parse("name:App*").unwrap(),
            Query::Prefix { field: "name".to_string(), prefix: "app".to_string() },
        );
    }

    #[test]
    fn test_parens_group() {
        let analyzer = parser_analyzer();
        let parser = QueryParser::new(&analyzer);
        let query = parser.parse("name:a AND (name:b OR name:c)").unwrap();
        let Query::Boolean { clauses } = query else {
            panic!("expected boolean");
        };
        assert_eq!(clauses.len(), 2);
        assert!(matches!(clauses[1].query, Query::Boolean { .. }));
    }

    #[test]
    fn test_parse_errors() {
        let analyzer = parser_analyzer();
        let parser = QueryParser::new(&analyzer);
        assert!(parser.parse("\"unterminated").is_err());
        assert!(parser.parse("(a OR b").is_err());
        assert!(parser.parse("price_Range:[10 TO").is_err());
        assert!(parser.parse("name:").is_err());
    }
}
