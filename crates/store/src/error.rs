//! Error types for the search index

use quarry_core::DocumentId;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while maintaining or querying an index
#[derive(Error, Debug)]
pub enum Error {
    /// The stored schema version differs from the one this library writes
    #[error("Schema mismatch: found version {found}, expected {expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    /// The index was built with a different analysis pipeline
    #[error("Analyzer mismatch: index was built with '{stored}', configured '{configured}'")]
    AnalyzerMismatch { stored: String, configured: String },

    /// Document already exists
    #[error("Document already exists: {0}")]
    DuplicateDocument(DocumentId),

    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(DocumentId),

    /// Malformed query text
    #[error("Query syntax error at position {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    /// Document does not satisfy the index schema
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Index names prefix table names and must be plain identifiers
    #[error("Invalid index name: {0:?}")]
    InvalidIndexName(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQLite error with the operation that failed
    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Stored data could not be decoded
    #[error("Corrupt index data: {0}")]
    Codec(String),
}

impl Error {
    /// Wrap a SQLite error with the operation that failed
    pub fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Storage { context: context.into(), source }
    }

    /// Create a codec error with a message
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<quarry_core::Error> for Error {
    fn from(err: quarry_core::Error) -> Self {
        match err {
            quarry_core::Error::Io(e) => Self::Io(e),
            quarry_core::Error::Config(msg) => Self::Config(msg),
            quarry_core::Error::Toml(e) => Self::Config(e.to_string()),
            quarry_core::Error::QuerySyntax { position, message } => Self::QuerySyntax { position, message },
            quarry_core::Error::InvalidDocument(msg) => Self::InvalidDocument(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SchemaMismatch { found: 0, expected: 1 };
        assert_eq!(err.to_string(), "Schema mismatch: found version 0, expected 1");

        let err = Error::NotFound(DocumentId::from("doc-1"));
        assert_eq!(err.to_string(), "Document not found: \"doc-1\"");

        let err = Error::DuplicateDocument(DocumentId::from(7));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_storage_keeps_source() {
        let err = Error::storage("Failed to insert posting", rusqlite::Error::InvalidQuery);
        assert!(err.to_string().starts_with("Failed to insert posting"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_from_sqlite() {
        let sqlite_err = rusqlite::Error::InvalidPath("test path".into());
        let err: Error = sqlite_err.into();
        assert!(matches!(err, Error::Sqlite(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_from_core() {
        let err: Error = quarry_core::Error::query_syntax(3, "unbalanced quote").into();
        assert!(matches!(err, Error::QuerySyntax { position: 3, .. }));

        let err: Error = quarry_core::Error::invalid_document("no fields").into();
        assert!(matches!(err, Error::InvalidDocument(_)));

        let err: Error = quarry_core::Error::config("bad").into();
        assert!(matches!(err, Error::Config(_)));
    }
}
