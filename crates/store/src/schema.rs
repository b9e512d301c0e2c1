//! SQLite schema for a search index
//!
//! Every table is prefixed with the index name, so several indexes can share
//! one database file:
//! - `{name}_meta`: schema version and analyzer fingerprint
//! - `{name}_fields`: field ids and total indexed length per field
//! - `{name}_terms`: term dictionary with document frequencies
//! - `{name}_postings`: one row per (term, document, field) with encoded positions
//! - `{name}_docs`: document records keyed by an internal integer

use crate::error::{Error, Result};
use quarry_core::config::is_valid_index_name;

/// Current schema version
pub const SCHEMA_VERSION: i64 = 1;

/// `{name}_meta` key holding the schema version
pub const META_SCHEMA_VERSION: &str = "schema_version";

/// `{name}_meta` key holding the analyzer fingerprint
pub const META_ANALYZER: &str = "analyzer";

/// Table names of one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub prefix: String,
    pub meta: String,
    pub fields: String,
    pub terms: String,
    pub postings: String,
    pub docs: String,
}

impl TableNames {
    /// Derive table names from a validated index name
    pub fn new(index_name: &str) -> Result<Self> {
        if !is_valid_index_name(index_name) {
            return Err(Error::InvalidIndexName(index_name.to_string()));
        }

        Ok(Self {
            prefix: index_name.to_string(),
            meta: format!("{index_name}_meta"),
            fields: format!("{index_name}_fields"),
            terms: format!("{index_name}_terms"),
            postings: format!("{index_name}_postings"),
            docs: format!("{index_name}_docs"),
        })
    }

    /// All tables, in creation order
    pub fn all(&self) -> [&str; 5] {
        [&self.meta, &self.fields, &self.terms, &self.docs, &self.postings]
    }

    /// SQL to create the complete schema
    pub fn create_sql(&self) -> String {
        let Self { prefix, meta, fields, terms, postings, docs } = self;
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {meta} (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS {fields} (
    field_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    total_length INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS {terms} (
    term_id INTEGER PRIMARY KEY,
    term TEXT NOT NULL UNIQUE,
    doc_freq INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS {docs} (
    doc_id INTEGER PRIMARY KEY,
    external_id NOT NULL UNIQUE,
    item_type INTEGER NOT NULL DEFAULT 0,
    generation INTEGER NOT NULL DEFAULT 1,
    field_lengths TEXT NOT NULL,
    boost REAL NOT NULL DEFAULT 1.0,
    language TEXT,
    meta_json TEXT,
    stored_json TEXT,
    indexed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS {prefix}_docs_item_type ON {docs}(item_type);

CREATE TABLE IF NOT EXISTS {postings} (
    term_id INTEGER NOT NULL,
    doc_id INTEGER NOT NULL,
    field_id INTEGER NOT NULL,
    freq INTEGER NOT NULL,
    positions BLOB NOT NULL,
    PRIMARY KEY (term_id, doc_id, field_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS {prefix}_postings_doc ON {postings}(doc_id);
"#
        )
    }
}
