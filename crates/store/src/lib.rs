//! Embedded full-text search over SQLite
//!
//! An index lives in five tables prefixed with its name, inside any SQLite
//! database the application already uses. Documents are analyzed by a
//! [`quarry_core::Analyzer`], their terms and positions are kept in posting
//! tables, and queries are answered by merging sorted posting lists and
//! ranking the matches with BM25F.
//!
//! # Example
//!
//! ```ignore
//! use quarry_core::{Document, FieldDef, IndexConfig};
//! use quarry_store::{SearchIndex, SearchOptions};
//!
//! let config = IndexConfig::default()
//!     .with_fields(vec![FieldDef::new("title").weight(2.0).stored(), FieldDef::new("body")]);
//! let mut index = SearchIndex::open(&db_path, config)?;
//!
//! index.add_document(&Document::new("notes/1").with_field("title", "Testing coverage"))?;
//!
//! for hit in index.search("title:test*", SearchOptions::default().with_limit(10))? {
//!     let hit = hit?;
//!     println!("{}: {:.2}", hit.id, hit.score);
//! }
//! ```

mod async_index;
mod codec;
mod context;
mod error;
mod executor;
mod index;
mod postings;
mod ranking;
mod schema;
mod schema_manager;
mod snippet;
mod writer;

pub use async_index::AsyncSearchIndex;
pub use error::{Error, Result};
pub use executor::{ResultCursor, SearchHit, SearchOptions, SearchOrder};
pub use index::{FieldStats, IndexStats, SearchIndex, StoredDocument};
pub use ranking::Bm25;
pub use schema::SCHEMA_VERSION;
pub use writer::ReindexReport;
