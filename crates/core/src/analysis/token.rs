/// A normalized term with its position in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Normalized term text
    pub term: String,
    /// Word position, assigned before any filter drops tokens
    pub position: u32,
    /// Byte offset of the source word
    pub offset: usize,
    /// Byte length of the source word
    pub len: usize,
    /// Field the text came from, when known
    pub field: Option<String>,
}

impl Token {
    pub fn new(term: impl Into<String>, position: u32, offset: usize, len: usize) -> Self {
        Self { term: term.into(), position, offset, len, field: None }
    }
}
