//! Text analysis: tokenization and the filter pipeline that normalizes terms.
//!
//! Indexing and querying must run the exact same pipeline, so an [`Analyzer`]
//! is deterministic and can describe itself with a [`Analyzer::fingerprint`]
//! that the store persists next to the index.
//!
//! ```
//! use quarry_core::analysis::Analyzer;
//! use quarry_core::config::IndexConfig;
//!
//! let config = IndexConfig { language: "en".to_string(), ..Default::default() };
//! let analyzer = Analyzer::from_config(&config);
//! let terms: Vec<_> = analyzer.analyze("The Foxes ran").into_iter().map(|t| t.term).collect();
//! assert_eq!(terms, vec!["fox", "ran"]);
//! ```

pub mod filters;
pub mod language;
pub mod token;
pub mod tokenizer;

pub use filters::{DiacriticFilter, LowercaseFilter, StemmerFilter, StopWordFilter, TokenFilter};
pub use language::Language;
pub use token::Token;
pub use tokenizer::{StandardTokenizer, Tokenizer};

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use std::fmt;

/// Tokenizer plus an ordered list of token filters
pub struct Analyzer {
    tokenizer: Box<dyn Tokenizer>,
    filters: Vec<Box<dyn TokenFilter>>,
    name: String,
}

impl Analyzer {
    pub fn new(name: impl Into<String>, tokenizer: Box<dyn Tokenizer>) -> Self {
        Self { tokenizer, filters: Vec::new(), name: name.into() }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Build the pipeline selected by the index configuration
    ///
    /// An unknown `language` builds the [`Language::None`] pipeline; [`IndexConfig::validate`]
    /// rejects such a configuration before any index uses it.
    pub fn from_config(config: &IndexConfig) -> Self {
        let language = Language::from_locale(&config.language).unwrap_or(Language::None);
        Self::for_language(language, config)
    }

    /// Build the configured pipeline for a specific locale tag
    pub fn for_locale(locale: &str, config: &IndexConfig) -> Result<Self> {
        let language =
            Language::from_locale(locale).ok_or_else(|| Error::config(format!("unknown locale: {locale:?}")))?;
        Ok(Self::for_language(language, config))
    }

    pub fn for_language(language: Language, config: &IndexConfig) -> Self {
        let mut analyzer = Analyzer::new(
            format!("standard:{}", language.code()),
            Box::new(StandardTokenizer::new(config.max_token_length)),
        )
        .add_filter(Box::new(LowercaseFilter::for_language(language)));

        if config.stop_words {
            let stop_words = StopWordFilter::for_language(language);
            if !stop_words.is_empty() {
                analyzer = analyzer.add_filter(Box::new(stop_words));
            }
        }

        if config.stemming
            && let Some(stemmer) = StemmerFilter::for_language(language)
        {
            analyzer = analyzer.add_filter(Box::new(stemmer));
        }

        if config.fold_diacritics {
            analyzer = analyzer.add_filter(Box::new(DiacriticFilter));
        }

        analyzer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the full pipeline
    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);

        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }

        tokens
    }

    /// Run the full pipeline, tagging each token with its field
    pub fn analyze_field(&self, field: &str, text: &str) -> Vec<Token> {
        let mut tokens = self.analyze(text);
        for token in &mut tokens {
            token.field = Some(field.to_string());
        }
        tokens
    }

    /// Normalize the stem of a prefix query: filters that rewrite whole words are skipped
    pub fn analyze_prefix(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);

        for filter in self.filters.iter().filter(|f| f.applies_to_prefix()) {
            tokens = filter.filter(tokens);
        }

        tokens
    }

    /// Stemmed form of a prefix stem: every filter runs except those that drop tokens
    ///
    /// The dictionary only holds stemmed terms, so `running*` has to reach `run`.
    pub fn stem_prefix(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);

        for filter in self.filters.iter().filter(|f| !f.drops_tokens()) {
            tokens = filter.filter(tokens);
        }

        tokens
    }

    /// Stable description of the pipeline
    pub fn fingerprint(&self) -> String {
        std::iter::once(self.tokenizer.name())
            .chain(self.filters.iter().map(|f| f.name()))
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn terms(analyzer: &Analyzer, text: &str) -> Vec<String> {
        analyzer.analyze(text).into_iter().map(|t| t.term).collect()
    }

    #[test]
    fn test_default_pipeline_lowercases_and_folds() {
        let analyzer = Analyzer::default();
        assert_eq!(terms(&analyzer, "Crème BRÛLÉE"), vec!["creme", "brulee"]);
        assert_eq!(terms(&analyzer, "the quick fox"), vec!["the", "quick", "fox"]);
    }

    #[test]
    fn test_english_pipeline() {
        let config = IndexConfig { language: "en_US".to_string(), ..Default::default() };
        let analyzer = Analyzer::from_config(&config);
        let tokens = analyzer.analyze("The runners are running");
        let got: Vec<_> = tokens.iter().map(|t| (t.term.as_str(), t.position)).collect();
        assert_eq!(got, vec![("runner", 1), ("run", 3)]);
    }

    #[test]
    fn test_switches_disable_filters() {
        let config = IndexConfig {
            language: "en".to_string(),
            stop_words: false,
            stemming: false,
            fold_diacritics: false,
            ..Default::default()
        };
        let analyzer = Analyzer::from_config(&config);
        assert_eq!(terms(&analyzer, "The Cafés"), vec!["the", "cafés"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(Analyzer::default().analyze("").is_empty());
        assert!(Analyzer::default().analyze("   \n\t").is_empty());
    }

    #[test]
    fn test_analyze_field_tags_tokens() {
        let tokens = Analyzer::default().analyze_field("title", "Hello world");
        assert!(tokens.iter().all(|t| t.field.as_deref() == Some("title")));
    }

    #[test]
    fn test_prefix_skips_stemming() {
        let config = IndexConfig { language: "en".to_string(), ..Default::default() };
        let analyzer = Analyzer::from_config(&config);
        let tokens = analyzer.analyze_prefix("Runni");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].term, "runni");
    }

    #[test]
    fn test_stem_prefix_keeps_stop_words() {
        let config = IndexConfig { language: "en".to_string(), ..Default::default() };
        let analyzer = Analyzer::from_config(&config);
        assert_eq!(analyzer.stem_prefix("Running")[0].term, "run");
        assert_eq!(analyzer.stem_prefix("the")[0].term, "the");
        assert_eq!(Analyzer::default().stem_prefix("Café")[0].term, "cafe");
    }

    #[test]
    fn test_fingerprint_tracks_configuration() {
        let plain = Analyzer::default();
        let english = Analyzer::from_config(&IndexConfig { language: "en".to_string(), ..Default::default() });
        assert_ne!(plain.fingerprint(), english.fingerprint());
        assert_eq!(english.fingerprint(), Analyzer::for_language(Language::English, &IndexConfig::default()).fingerprint());
        assert!(english.fingerprint().contains("stemmer:en"));
    }

    #[test]
    fn test_unknown_locale_is_rejected() {
        let err = Analyzer::for_locale("xx-unknown", &IndexConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(Analyzer::for_locale("de_DE", &IndexConfig::default()).unwrap().name(), "standard:de");
    }

    proptest! {
        #[test]
        fn analysis_is_deterministic(text in "\\PC{0,80}") {
            let config = IndexConfig { language: "en".to_string(), ..Default::default() };
            let first = Analyzer::from_config(&config).analyze(&text);
            let second = Analyzer::from_config(&config).analyze(&text);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn positions_are_strictly_increasing(text in "[a-zA-Z ,.éü]{0,60}") {
            let tokens = Analyzer::default().analyze(&text);
            for pair in tokens.windows(2) {
                prop_assert!(pair[0].position < pair[1].position);
            }
        }
    }
}
