use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::Language;
use crate::document::{DocumentSchema, FieldDef};
use crate::error::{Error, Result};

/// Default index name; it prefixes every table of the index
pub const DEFAULT_INDEX_NAME: &str = "search_index";

/// BM25 parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankingConfig {
    /// Term frequency saturation
    #[serde(default = "default_k1")]
    pub k1: f64,
    /// Field length normalization strength, 0 disables it
    #[serde(default = "default_b")]
    pub b: f64,
}

fn default_k1() -> f64 {
    1.2
}

fn default_b() -> f64 {
    0.75
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { k1: default_k1(), b: default_b() }
    }
}

/// File logging section of `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Directory for daily log files; `QUARRY_LOG_DIR` wins when set
    #[serde(default)]
    pub directory: Option<String>,
}

/// `[logging]` section as read from TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: FileLoggingConfig,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format(), file: FileLoggingConfig::default() }
    }
}

/// Configuration of one search index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Index name, used as the table prefix
    #[serde(default = "default_index_name")]
    pub name: String,

    /// Locale tag selecting stemmer and stop words (`en`, `de_DE`, `none`, ...)
    #[serde(default = "default_language")]
    pub language: String,

    /// Strip diacritics (`é` matches `e`)
    #[serde(default = "default_true")]
    pub fold_diacritics: bool,

    /// Drop the language's stop words
    #[serde(default = "default_true")]
    pub stop_words: bool,

    /// Apply the language's stemmer
    #[serde(default = "default_true")]
    pub stemming: bool,

    /// Longer words are not indexed
    #[serde(default = "default_max_token_length")]
    pub max_token_length: usize,

    /// Commit every mutation immediately; when false, mutations wait for `flush`
    #[serde(default = "default_true")]
    pub auto_flush: bool,

    /// How long a writer waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub ranking: RankingConfig,

    /// Indexed fields
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldDef>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_string()
}

fn default_language() -> String {
    "none".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_token_length() -> usize {
    255
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_fields() -> Vec<FieldDef> {
    DocumentSchema::default().fields().to_vec()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            language: default_language(),
            fold_diacritics: true,
            stop_words: true,
            stemming: true,
            max_token_length: default_max_token_length(),
            auto_flush: true,
            busy_timeout_ms: default_busy_timeout_ms(),
            ranking: RankingConfig::default(),
            fields: default_fields(),
            logging: LoggingConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Load configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: IndexConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Replace the field list
    pub fn with_fields(mut self, fields: Vec<FieldDef>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// The document schema described by `fields`
    pub fn schema(&self) -> Result<DocumentSchema> {
        DocumentSchema::new(self.fields.clone())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !is_valid_index_name(&self.name) {
            return Err(Error::config(format!(
                "index name must match [A-Za-z_][A-Za-z0-9_]* and not start with sqlite_: {:?}",
                self.name
            )));
        }

        if Language::from_locale(&self.language).is_none() {
            return Err(Error::config(format!("unknown language: {}", self.language)));
        }

        if self.max_token_length == 0 {
            return Err(Error::config("max_token_length must be at least 1"));
        }

        if !(self.ranking.k1.is_finite() && self.ranking.k1 >= 0.0) {
            return Err(Error::config("ranking.k1 must be a non-negative number"));
        }

        if !(0.0..=1.0).contains(&self.ranking.b) {
            return Err(Error::config("ranking.b must be between 0 and 1"));
        }

        self.schema()?;
        Ok(())
    }

    /// Get example configuration (as a string)
    pub fn example() -> &'static str {
        r#"# Quarry index configuration

# Table prefix inside the database
name = "notes"
# Locale tag: selects stemmer and stop words ("none" disables both)
language = "en"
fold_diacritics = true
stop_words = true
stemming = true
max_token_length = 255
# Commit after every mutation; set to false to batch until flush()
auto_flush = true
busy_timeout_ms = 5000

[ranking]
k1 = 1.2
b = 0.75

[[fields]]
name = "title"
weight = 2.0

[[fields]]
name = "body"
stored = true

[logging]
level = "warn"
format = "compact"
"#
    }
}

/// Index names become table prefixes, so only plain identifiers are allowed
///
/// `{name}_meta` and friends must also stay clear of SQLite's reserved `sqlite_` prefix.
pub fn is_valid_index_name(name: &str) -> bool {
    let mut chars = name.chars();
    let identifier = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };

    let lower = name.to_ascii_lowercase();
    identifier && lower != "sqlite" && !lower.starts_with("sqlite_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IndexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.name, DEFAULT_INDEX_NAME);
        assert_eq!(config.fields.len(), 1);
        assert!(config.auto_flush);
    }

    #[test]
    fn test_example_parses() {
        let config = IndexConfig::from_toml_str(IndexConfig::example()).unwrap();
        assert_eq!(config.name, "notes");
        assert_eq!(config.language, "en");
        assert_eq!(config.fields.len(), 2);
        assert_eq!(config.fields[0].weight, 2.0);
        assert!(config.fields[1].stored);
        assert!(!config.fields[0].stored);
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = IndexConfig::from_toml_str("language = \"fr\"").unwrap();
        assert_eq!(config.name, DEFAULT_INDEX_NAME);
        assert_eq!(config.ranking, RankingConfig::default());
        assert_eq!(config.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(IndexConfig::from_toml_str("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(IndexConfig::from_toml_str("name = \"drop table\"").is_err());
        assert!(IndexConfig::from_toml_str("language = \"klingon\"").is_err());
        assert!(IndexConfig::from_toml_str("max_token_length = 0").is_err());
        assert!(IndexConfig::from_toml_str("[ranking]\nb = 1.5").is_err());
        assert!(IndexConfig::from_toml_str("fields = []").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quarry.toml");
        std::fs::write(&path, IndexConfig::example()).unwrap();
        let config = IndexConfig::from_file(&path).unwrap();
        assert_eq!(config.name, "notes");
    }

    #[test]
    fn test_index_name_rules() {
        assert!(is_valid_index_name("search_index"));
        assert!(is_valid_index_name("_idx2"));
        assert!(!is_valid_index_name(""));
        assert!(!is_valid_index_name("2idx"));
        assert!(!is_valid_index_name("idx;drop"));
        assert!(!is_valid_index_name("idx-name"));
        assert!(!is_valid_index_name("sqlite"));
        assert!(!is_valid_index_name("SQLite_docs"));
        assert!(is_valid_index_name("sqlitefts"));
    }
}
