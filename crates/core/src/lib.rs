pub mod analysis;
pub mod config;
pub mod document;
pub mod error;
pub mod logging;
pub mod query;

pub use analysis::{Analyzer, Language, Token, TokenFilter, Tokenizer};
pub use config::{DEFAULT_INDEX_NAME, IndexConfig, RankingConfig};
pub use document::{Document, DocumentId, DocumentSchema, FieldDef};
pub use error::{Error, Result};
pub use query::{PhraseTerm, QueryNode, QueryParser};
