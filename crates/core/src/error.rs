use thiserror::Error;

/// Result type alias for quarry-core
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for analysis, query parsing and configuration
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error for file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed query text, carrying the 0-based character position of the problem
    #[error("query syntax error at position {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    /// Document does not satisfy the index schema
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl Error {
    /// Create a configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a query syntax error at the given character position
    pub fn query_syntax(position: usize, msg: impl Into<String>) -> Self {
        Self::QuerySyntax { position, message: msg.into() }
    }

    /// Create an invalid document error
    pub fn invalid_document(msg: impl Into<String>) -> Self {
        Self::InvalidDocument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_syntax_display() {
        let err = Error::query_syntax(7, "unbalanced quote");
        assert_eq!(err.to_string(), "query syntax error at position 7: unbalanced quote");
        assert!(matches!(err, Error::QuerySyntax { position: 7, .. }));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_toml() {
        let toml_err = toml::from_str::<toml::Table>("not = [valid").unwrap_err();
        let err: Error = toml_err.into();
        assert!(err.to_string().starts_with("TOML parse error"));
    }
}
