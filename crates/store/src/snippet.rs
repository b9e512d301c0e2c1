//! Highlighted excerpts of stored field text

use quarry_core::{Analyzer, QueryNode};
use std::collections::HashMap;

pub const HIGHLIGHT_START: &str = "<b>";
pub const HIGHLIGHT_END: &str = "</b>";
pub const ELLIPSIS: &str = "...";

/// Terms a document must contain to match; excluded branches are ignored
///
/// Each term keeps the field its leaf was scoped to, `None` meaning any field.
#[derive(Debug, Default)]
pub struct Highlighter {
    terms: HashMap<String, Vec<Option<String>>>,
    prefixes: Vec<(Option<String>, String)>,
}

fn in_scope(scope: Option<&str>, field: &str) -> bool {
    scope.is_none_or(|scope| scope == field)
}

impl Highlighter {
    pub fn new(node: &QueryNode) -> Self {
        let mut highlighter = Self::default();
        highlighter.collect(node);
        highlighter
    }

    fn collect(&mut self, node: &QueryNode) {
        match node {
            QueryNode::Empty => {}
            QueryNode::Term { field, term } => {
                self.terms.entry(term.clone()).or_default().push(field.clone());
            }
            QueryNode::Prefix { field, prefix } => self.prefixes.push((field.clone(), prefix.clone())),
            QueryNode::Phrase { field, terms } => {
                for t in terms {
                    self.terms.entry(t.term.clone()).or_default().push(field.clone());
                }
            }
            QueryNode::And(children) | QueryNode::Or(children) => {
                for child in children {
                    self.collect(child);
                }
            }
            QueryNode::Not { include, .. } => self.collect(include),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.prefixes.is_empty()
    }

    /// Whether `term` is highlighted in text of `field`
    pub fn matches(&self, field: &str, term: &str) -> bool {
        self.terms
            .get(term)
            .is_some_and(|scopes| scopes.iter().any(|scope| in_scope(scope.as_deref(), field)))
            || self
                .prefixes
                .iter()
                .any(|(scope, prefix)| in_scope(scope.as_deref(), field) && term.starts_with(prefix.as_str()))
    }

    /// Excerpt of at most `window` tokens of `field` around the first match
    ///
    /// Returns `None` when no token of `text` matches.
    pub fn snippet(&self, analyzer: &Analyzer, field: &str, text: &str, window: usize) -> Option<String> {
        let tokens = analyzer.analyze(text);
        let first = tokens.iter().position(|t| self.matches(field, &t.term))?;

        let window = window.max(1);
        let lead = (window / 4).min(first);
        let start = first - lead;
        let end = (start + window).min(tokens.len());

        let mut out = String::new();
        if start > 0 {
            out.push_str(ELLIPSIS);
        }

        let mut cursor = tokens[start].offset;
        for token in &tokens[start..end] {
            out.push_str(&text[cursor..token.offset]);
            let word = &text[token.offset..token.offset + token.len];
            if self.matches(field, &token.term) {
                out.push_str(HIGHLIGHT_START);
                out.push_str(word);
                out.push_str(HIGHLIGHT_END);
            } else {
                out.push_str(word);
            }
            cursor = token.offset + token.len;
        }

        if end < tokens.len() {
            out.push_str(ELLIPSIS);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{DocumentSchema, FieldDef, IndexConfig, QueryParser};

    fn highlighter(query: &str) -> (Analyzer, Highlighter) {
        let analyzer = Analyzer::from_config(&IndexConfig::default());
        let schema = DocumentSchema::new(vec![FieldDef::new("content"), FieldDef::new("title")]).unwrap();
        let node = QueryParser::new(&analyzer, &schema).parse(query).unwrap();
        let highlighter = Highlighter::new(&node);
        (analyzer, highlighter)
    }

    #[test]
    fn test_highlights_every_match() {
        let (analyzer, h) = highlighter("fox");
        let snippet = h.snippet(&analyzer, "content", "The Fox saw another fox.", 32).unwrap();
        assert_eq!(snippet, "The <b>Fox</b> saw another <b>fox</b>");
    }

    #[test]
    fn test_window_marks_elided_ends() {
        let (analyzer, h) = highlighter("seven");
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let snippet = h.snippet(&analyzer, "content", text, 4).unwrap();
        assert_eq!(snippet, "...six <b>seven</b> eight nine...");
    }

    #[test]
    fn test_excluded_terms_are_not_highlighted() {
        let (analyzer, h) = highlighter("quick NOT fox");
        assert!(h.matches("content", "quick"));
        assert!(!h.matches("content", "fox"));
        assert_eq!(h.snippet(&analyzer, "content", "only a fox here", 8), None);
    }

    #[test]
    fn test_prefix_and_phrase() {
        let (analyzer, h) = highlighter("\"brown dog\" OR qui*");
        let snippet = h.snippet(&analyzer, "content", "quite a brown dog", 8).unwrap();
        assert_eq!(snippet, "<b>quite</b> a <b>brown</b> <b>dog</b>");
    }

    #[test]
    fn test_field_scope_limits_highlighting() {
        let (analyzer, h) = highlighter("title:fox OR dog");
        assert!(h.matches("title", "fox"));
        assert!(!h.matches("content", "fox"));
        assert!(h.matches("content", "dog"));

        assert_eq!(h.snippet(&analyzer, "content", "a fox and a dog", 8).unwrap(), "...and a <b>dog</b>");
        assert_eq!(h.snippet(&analyzer, "title", "a fox", 8).unwrap(), "a <b>fox</b>");
        assert_eq!(h.snippet(&analyzer, "content", "only a fox", 8), None);
    }

    #[test]
    fn test_empty_query() {
        let h = Highlighter::new(&QueryNode::Empty);
        assert!(h.is_empty());
    }
}
