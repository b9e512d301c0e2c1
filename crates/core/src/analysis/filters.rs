use crate::analysis::language::Language;
use crate::analysis::token::Token;

use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// A stage in the analysis pipeline that rewrites or drops tokens
pub trait TokenFilter: Send + Sync {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token>;

    fn name(&self) -> &str;

    /// Whether prefix queries run through this stage
    fn applies_to_prefix(&self) -> bool {
        true
    }

    /// Whether this stage removes tokens instead of rewriting them
    fn drops_tokens(&self) -> bool {
        false
    }
}

/// Unicode lowercasing, with Turkic dotted/dotless `i` handling when enabled
pub struct LowercaseFilter {
    turkic: bool,
}

impl LowercaseFilter {
    pub fn new() -> Self {
        Self { turkic: false }
    }

    pub fn for_language(language: Language) -> Self {
        Self { turkic: language.has_turkic_casing() }
    }

    fn lowercase(&self, term: &str) -> String {
        if !self.turkic {
            return term.to_lowercase();
        }

        let mut out = String::with_capacity(term.len());
        for ch in term.chars() {
            match ch {
                'I' => out.push('ı'),
                'İ' => out.push('i'),
                _ => out.extend(ch.to_lowercase()),
            }
        }
        out
    }
}

impl Default for LowercaseFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenFilter for LowercaseFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens
            .into_iter()
            .map(|mut token| {
                token.term = self.lowercase(&token.term);
                token
            })
            .collect()
    }

    fn name(&self) -> &str {
        if self.turkic { "lowercase:turkic" } else { "lowercase" }
    }
}

/// Strips combining marks after canonical decomposition (`é` becomes `e`)
#[derive(Default)]
pub struct DiacriticFilter;

impl DiacriticFilter {
    pub fn fold(term: &str) -> String {
        term.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
    }
}

impl TokenFilter for DiacriticFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens
            .into_iter()
            .filter_map(|mut token| {
                token.term = Self::fold(&token.term);
                (!token.term.is_empty()).then_some(token)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "fold_diacritics"
    }
}

/// Drops tokens found in a stop-word list; positions are left untouched
pub struct StopWordFilter {
    stop_words: HashSet<String>,
    name: String,
}

impl StopWordFilter {
    pub fn new(name: impl Into<String>, stop_words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { stop_words: stop_words.into_iter().map(Into::into).collect(), name: name.into() }
    }

    pub fn for_language(language: Language) -> Self {
        Self::new(format!("stop_words:{}", language.code()), language.stop_words().iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.stop_words.is_empty()
    }
}

impl TokenFilter for StopWordFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens
            .into_iter()
            .filter(|token| !self.stop_words.contains(&token.term))
            .collect()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to_prefix(&self) -> bool {
        false
    }

    fn drops_tokens(&self) -> bool {
        true
    }
}

/// Snowball stemming
pub struct StemmerFilter {
    stemmer: Stemmer,
    name: String,
}

impl StemmerFilter {
    pub fn new(algorithm: Algorithm, language: Language) -> Self {
        Self { stemmer: Stemmer::create(algorithm), name: format!("stemmer:{}", language.code()) }
    }

    pub fn for_language(language: Language) -> Option<Self> {
        language.stemmer().map(|algorithm| Self::new(algorithm, language))
    }
}

impl TokenFilter for StemmerFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens
            .into_iter()
            .map(|mut token| {
                token.term = self.stemmer.stem(&token.term).into_owned();
                token
            })
            .collect()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to_prefix(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(terms: &[&str]) -> Vec<Token> {
        terms
            .iter()
            .enumerate()
            .map(|(i, t)| Token::new(*t, i as u32, 0, t.len()))
            .collect()
    }

    fn terms(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.term.as_str()).collect()
    }

    #[test]
    fn test_lowercase() {
        let out = LowercaseFilter::new().filter(tokens(&["Hello", "WORLD", "Ärger"]));
        assert_eq!(terms(&out), vec!["hello", "world", "ärger"]);
    }

    #[test]
    fn test_lowercase_turkic() {
        let out = LowercaseFilter::for_language(Language::Turkish).filter(tokens(&["ISTANBUL", "İzmir"]));
        assert_eq!(terms(&out), vec!["ıstanbul", "izmir"]);
    }

    #[test]
    fn test_diacritic_fold() {
        assert_eq!(DiacriticFilter::fold("café"), "cafe");
        assert_eq!(DiacriticFilter::fold("naïve"), "naive");
        assert_eq!(DiacriticFilter::fold("Ångström"), "Angstrom");
        let out = DiacriticFilter.filter(tokens(&["\u{0301}", "résumé"]));
        assert_eq!(terms(&out), vec!["resume"]);
        assert_eq!(out[0].position, 1);
    }

    #[test]
    fn test_stop_words_keep_positions() {
        let out = StopWordFilter::for_language(Language::English).filter(tokens(&["the", "quick", "fox"]));
        assert_eq!(terms(&out), vec!["quick", "fox"]);
        assert_eq!(out[0].position, 1);
        assert_eq!(out[1].position, 2);
    }

    #[test]
    fn test_stemmer() {
        let stemmer = StemmerFilter::for_language(Language::English).unwrap();
        let out = stemmer.filter(tokens(&["running", "foxes"]));
        assert_eq!(terms(&out), vec!["run", "fox"]);
        assert!(StemmerFilter::for_language(Language::None).is_none());
    }

    #[test]
    fn test_prefix_participation() {
        assert!(LowercaseFilter::new().applies_to_prefix());
        assert!(DiacriticFilter.applies_to_prefix());
        assert!(!StopWordFilter::for_language(Language::English).applies_to_prefix());
        assert!(!StemmerFilter::for_language(Language::English).unwrap().applies_to_prefix());
    }
}
