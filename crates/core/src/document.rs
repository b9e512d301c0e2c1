//! Document model and the explicit field schema documents are validated against.

use crate::analysis::Language;
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// Application-supplied document identifier
///
/// Integers order numerically before strings, which order lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    Text(String),
}

impl Ord for DocumentId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DocumentId::Int(a), DocumentId::Int(b)) => a.cmp(b),
            (DocumentId::Text(a), DocumentId::Text(b)) => a.cmp(b),
            (DocumentId::Int(_), DocumentId::Text(_)) => Ordering::Less,
            (DocumentId::Text(_), DocumentId::Int(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for DocumentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(id) => write!(f, "{id}"),
            DocumentId::Text(id) => write!(f, "{id:?}"),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        DocumentId::Int(id)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId::Text(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        DocumentId::Text(id)
    }
}

/// A record to index: an id, named text fields and optional metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    /// Field name and text pairs, in the order they were added
    pub fields: Vec<(String, String)>,
    /// Application category, searches can filter on it
    #[serde(default)]
    pub item_type: i64,
    /// Score multiplier applied to every match of this document
    #[serde(default = "default_boost")]
    pub boost: f64,
    /// Locale tag overriding the index language for this document
    #[serde(default)]
    pub language: Option<String>,
    /// Opaque data returned with hits; never searchable
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

fn default_boost() -> f64 {
    1.0
}

impl Document {
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self { id: id.into(), fields: Vec::new(), item_type: 0, boost: default_boost(), language: None, meta: None }
    }

    pub fn with_field(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.push((name.into(), text.into()));
        self
    }

    pub fn with_item_type(mut self, item_type: i64) -> Self {
        self.item_type = item_type;
        self
    }

    pub fn with_boost(mut self, boost: f64) -> Self {
        self.boost = boost;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Text of the named field, if present
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t.as_str())
    }
}

/// Definition of one indexed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub name: String,
    /// Score multiplier for matches in this field
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Keep the raw text for snippets and reindexing
    #[serde(default)]
    pub stored: bool,
}

fn default_weight() -> f64 {
    1.0
}

impl FieldDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), weight: default_weight(), stored: false }
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn stored(mut self) -> Self {
        self.stored = true;
        self
    }
}

/// The enumerated set of fields an index accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSchema {
    fields: Vec<FieldDef>,
}

impl DocumentSchema {
    /// Build a schema, rejecting empty, duplicate or non-positive-weight fields
    pub fn new(fields: Vec<FieldDef>) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::config("schema must define at least one field"));
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.is_empty() || field.name.contains(char::is_whitespace) || field.name.contains(':') {
                return Err(Error::config(format!("invalid field name: {:?}", field.name)));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::config(format!("duplicate field: {}", field.name)));
            }
            if !(field.weight.is_finite() && field.weight > 0.0) {
                return Err(Error::config(format!(
                    "field '{}' weight must be a positive number",
                    field.name
                )));
            }
        }

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Check a document against the schema before it is indexed
    pub fn validate(&self, doc: &Document) -> Result<()> {
        if doc.fields.is_empty() {
            return Err(Error::invalid_document(format!("document {} has no fields", doc.id)));
        }

        let mut seen = HashSet::new();
        for (name, _) in &doc.fields {
            if !self.contains(name) {
                return Err(Error::invalid_document(format!(
                    "document {} has unknown field '{}'",
                    doc.id, name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::invalid_document(format!(
                    "document {} repeats field '{}'",
                    doc.id, name
                )));
            }
        }

        if let Some(language) = &doc.language
            && Language::from_locale(language).is_none()
        {
            return Err(Error::invalid_document(format!(
                "document {} has unknown language {:?}",
                doc.id, language
            )));
        }

        if !(doc.boost.is_finite() && doc.boost > 0.0) {
            return Err(Error::invalid_document(format!(
                "document {} boost must be a positive number",
                doc.id
            )));
        }

        Ok(())
    }
}

impl Default for DocumentSchema {
    fn default() -> Self {
        Self { fields: vec![FieldDef::new("content").stored()] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> DocumentSchema {
        DocumentSchema::new(vec![FieldDef::new("title").weight(2.0), FieldDef::new("body").stored()]).unwrap()
    }

    #[test]
    fn test_document_id_ordering() {
        let mut ids = vec![DocumentId::from("b"), DocumentId::from(10), DocumentId::from("a"), DocumentId::from(2)];
        ids.sort();
        assert_eq!(
            ids,
            vec![DocumentId::Int(2), DocumentId::Int(10), DocumentId::from("a"), DocumentId::from("b")]
        );
    }

    #[test]
    fn test_document_id_serde_untagged() {
        let id: DocumentId = serde_json::from_str("42").unwrap();
        assert_eq!(id, DocumentId::Int(42));
        let id: DocumentId = serde_json::from_str("\"doc-1\"").unwrap();
        assert_eq!(id, DocumentId::from("doc-1"));
    }

    #[test]
    fn test_validate_accepts_known_fields() {
        let doc = Document::new(1).with_field("title", "Hello").with_field("body", "World");
        assert!(schema().validate(&doc).is_ok());
        assert_eq!(doc.field("body"), Some("World"));
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let doc = Document::new(1).with_field("author", "someone");
        let err = schema().validate(&doc).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
        assert!(err.to_string().contains("author"));
    }

    #[test]
    fn test_validate_rejects_empty_and_repeated() {
        assert!(schema().validate(&Document::new(1)).is_err());

        let doc = Document::new(1).with_field("title", "a").with_field("title", "b");
        assert!(schema().validate(&doc).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_boost() {
        let doc = Document::new(1).with_field("title", "a").with_boost(0.0);
        assert!(schema().validate(&doc).is_err());
        let doc = Document::new(1).with_field("title", "a").with_boost(f64::NAN);
        assert!(schema().validate(&doc).is_err());
    }

    #[test]
    fn test_validate_language() {
        let doc = Document::new(1).with_field("title", "foxes").with_language("klingon");
        let err = schema().validate(&doc).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
        assert!(err.to_string().contains("klingon"));

        let doc = Document::new(1).with_field("title", "foxes").with_language("en_GB");
        assert!(schema().validate(&doc).is_ok());
    }

    #[test]
    fn test_schema_rejects_duplicates_and_bad_weights() {
        assert!(DocumentSchema::new(vec![]).is_err());
        assert!(DocumentSchema::new(vec![FieldDef::new("a"), FieldDef::new("a")]).is_err());
        assert!(DocumentSchema::new(vec![FieldDef::new("a").weight(-1.0)]).is_err());
        assert!(DocumentSchema::new(vec![FieldDef::new("a:b")]).is_err());
    }

    #[test]
    fn test_default_schema() {
        let schema = DocumentSchema::default();
        assert_eq!(schema.fields().len(), 1);
        assert!(schema.field("content").unwrap().stored);
    }
}
