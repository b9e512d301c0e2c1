//! The synchronous index handle

use crate::codec::{id_from_sql, id_to_sql};
use crate::context::IndexContext;
use crate::error::{Error, Result};
use crate::executor::{ResultCursor, SearchOptions};
use crate::schema_manager::{AnalyzerCheck, SchemaManager};
use crate::writer::{self, IndexWriter, ReindexReport};

use chrono::{DateTime, Utc};
use quarry_core::logging::sanitize_path;
use quarry_core::{Analyzer, Document, DocumentId, IndexConfig, QueryNode, QueryParser};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A document as it is recorded in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub item_type: i64,
    /// Starts at 1, incremented by every update
    pub generation: i64,
    pub boost: f64,
    pub language: Option<String>,
    pub meta: Option<serde_json::Value>,
    /// Text of the stored fields
    pub fields: BTreeMap<String, String>,
    /// Number of indexed tokens per field
    pub field_lengths: BTreeMap<String, u32>,
    pub indexed_at: DateTime<Utc>,
}

/// Per-field statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub name: String,
    pub weight: f64,
    pub stored: bool,
    pub total_length: u64,
}

/// Size and configuration summary of an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub schema_version: i64,
    pub analyzer: String,
    pub documents: u64,
    pub terms: u64,
    pub postings: u64,
    pub fields: Vec<FieldStats>,
}

/// A full-text index stored in a SQLite database
///
/// The handle owns its connection. Queries borrow it immutably, mutations
/// mutably, so a [`ResultCursor`] must be dropped before the next write.
///
/// # Example
///
/// ```
/// use quarry_store::{SearchIndex, SearchOptions};
/// use quarry_core::{Document, IndexConfig};
///
/// let mut index = SearchIndex::open_in_memory(IndexConfig::default())?;
/// index.add_document(&Document::new(1).with_field("content", "the quick fox"))?;
/// index.add_document(&Document::new(2).with_field("content", "the slow fox"))?;
///
/// let hits = index
///     .search("fox NOT quick", SearchOptions::default())?
///     .collect::<quarry_store::Result<Vec<_>>>()?;
/// assert_eq!(hits.len(), 1);
/// # Ok::<(), quarry_store::Error>(())
/// ```
pub struct SearchIndex {
    conn: Connection,
    ctx: IndexContext,
}

impl SearchIndex {
    /// Open or create an index in a database file
    ///
    /// Enables WAL journaling so other handles on the same file can read
    /// while this one writes.
    #[instrument(skip_all, fields(path = %sanitize_path(path.as_ref()), index = %config.name))]
    pub fn open(path: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening search index");

        let conn = Connection::open(path).map_err(|e| {
            Error::storage(format!("Failed to open database at {}", sanitize_path(path)), e)
        })?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| Error::storage("Failed to enable WAL journal", e))?;
        debug!(journal_mode = %mode, "Configured journal");

        let analyzer = Analyzer::from_config(&config);
        Self::with_analyzer(conn, config, analyzer)
    }

    /// Create an index in a private in-memory database
    pub fn open_in_memory(config: IndexConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage("Failed to open in-memory database", e))?;
        let analyzer = Analyzer::from_config(&config);
        Self::with_analyzer(conn, config, analyzer)
    }

    /// Use an existing connection and a custom analysis pipeline
    ///
    /// Fails with [`Error::AnalyzerMismatch`] when the index was built with a
    /// different pipeline; use [`SearchIndex::rebuild`] to switch pipelines.
    #[instrument(skip_all, fields(index = %config.name))]
    pub fn with_analyzer(conn: Connection, config: IndexConfig, analyzer: Analyzer) -> Result<Self> {
        Self::connect(conn, config, analyzer, AnalyzerCheck::Strict)
    }

    /// Open an index with a new analysis pipeline and reindex it from stored text
    #[instrument(skip_all, fields(index = %config.name))]
    pub fn rebuild(conn: Connection, config: IndexConfig, analyzer: Analyzer) -> Result<(Self, ReindexReport)> {
        let mut index = Self::connect(conn, config, analyzer, AnalyzerCheck::Rebuild)?;
        let report = index.reindex()?;
        index.flush()?;
        Ok((index, report))
    }

    fn connect(conn: Connection, config: IndexConfig, analyzer: Analyzer, check: AnalyzerCheck) -> Result<Self> {
        let ctx = IndexContext::new(config, analyzer)?;
        conn.busy_timeout(Duration::from_millis(ctx.config.busy_timeout_ms))
            .map_err(|e| Error::storage("Failed to set busy timeout", e))?;

        let mut index = Self { conn, ctx };
        index.ensure_schema_with(check)?;
        info!(analyzer = index.ctx.analyzer.name(), fields = index.ctx.fields.entries().len(), "Search index ready");
        Ok(index)
    }

    /// Create the index tables if missing and validate them otherwise
    pub fn ensure_schema(&mut self) -> Result<()> {
        self.ensure_schema_with(AnalyzerCheck::Strict)
    }

    fn ensure_schema_with(&mut self, check: AnalyzerCheck) -> Result<()> {
        self.ctx.fields = SchemaManager::ensure_schema(
            &mut self.conn,
            &self.ctx.names,
            &self.ctx.schema,
            &self.ctx.analyzer.fingerprint(),
            check,
        )?;
        Ok(())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.ctx.config
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.ctx.analyzer
    }

    /// Mutations not yet made durable by [`SearchIndex::flush`]
    pub fn has_pending(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn add_document(&mut self, doc: &Document) -> Result<()> {
        IndexWriter::new(&mut self.conn, &self.ctx).add_document(doc)
    }

    /// Add several documents; if any is rejected none are added
    pub fn add_documents(&mut self, docs: &[Document]) -> Result<()> {
        IndexWriter::new(&mut self.conn, &self.ctx).add_documents(docs)
    }

    pub fn update_document(&mut self, doc: &Document) -> Result<()> {
        IndexWriter::new(&mut self.conn, &self.ctx).update_document(doc)
    }

    pub fn remove_document(&mut self, id: &DocumentId) -> Result<()> {
        IndexWriter::new(&mut self.conn, &self.ctx).remove_document(id)
    }

    pub fn remove_all(&mut self) -> Result<()> {
        IndexWriter::new(&mut self.conn, &self.ctx).remove_all()
    }

    /// Rebuild every posting from stored field text
    pub fn reindex(&mut self) -> Result<ReindexReport> {
        IndexWriter::new(&mut self.conn, &self.ctx).reindex()
    }

    /// Commit pending mutations when `auto_flush` is disabled
    #[instrument(skip_all, fields(index = %self.ctx.names.prefix))]
    pub fn flush(&mut self) -> Result<()> {
        writer::flush(&self.conn)
    }

    #[instrument(skip_all, fields(index = %self.ctx.names.prefix))]
    pub fn optimize(&mut self) -> Result<()> {
        writer::optimize(&self.conn)
    }

    /// Parse a query with the analyzer of `locale`, or the index analyzer
    pub fn parse_query(&self, query: &str, locale: Option<&str>) -> Result<QueryNode> {
        let analyzer = self.ctx.analyzer_for(locale)?;
        Ok(QueryParser::new(&analyzer, &self.ctx.schema).parse(query)?)
    }

    /// Parse `query` and return a cursor over its hits
    ///
    /// Syntax errors are reported here; the index is read on the first call
    /// to `next`.
    #[instrument(skip(self, options), fields(index = %self.ctx.names.prefix))]
    pub fn search(&self, query: &str, options: SearchOptions) -> Result<ResultCursor<'_>> {
        let node = self.parse_query(query, options.locale.as_deref())?;
        debug!(%node, "Parsed query");
        self.search_node(node, options)
    }

    /// Search with an already built query tree
    pub fn search_node(&self, node: QueryNode, options: SearchOptions) -> Result<ResultCursor<'_>> {
        let analyzer = self.ctx.analyzer_for(options.locale.as_deref())?;
        ResultCursor::new(&self.conn, &self.ctx, node, options, analyzer)
    }

    pub fn get_document(&self, id: &DocumentId) -> Result<StoredDocument> {
        get_document(&self.conn, &self.ctx, id)
    }

    pub fn contains(&self, id: &DocumentId) -> Result<bool> {
        Ok(writer::find_doc_key(&self.conn, &self.ctx, id)?.is_some())
    }

    pub fn document_count(&self) -> Result<u64> {
        document_count(&self.conn, &self.ctx)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        stats(&self.conn, &self.ctx)
    }
}

impl Drop for SearchIndex {
    fn drop(&mut self) {
        if self.has_pending() {
            warn!(index = %self.ctx.names.prefix, "Dropping search index with unflushed mutations, they are discarded");
        }
    }
}

pub(crate) fn get_document(conn: &Connection, ctx: &IndexContext, id: &DocumentId) -> Result<StoredDocument> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT external_id, item_type, generation, boost, language, meta_json, stored_json, field_lengths, indexed_at
         FROM {} WHERE external_id = ?1",
        ctx.names.docs
    ))?;

    let row = stmt
        .query_row([id_to_sql(id)], |row| {
            Ok((
                row.get::<_, Value>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })
        .optional()?;
    let Some((external_id, item_type, generation, boost, language, meta, stored, lengths, indexed_at)) = row else {
        return Err(Error::NotFound(id.clone()));
    };

    let lengths: BTreeMap<i64, u32> = serde_json::from_str(&lengths)?;
    let field_lengths = lengths
        .into_iter()
        .filter_map(|(field_id, len)| ctx.fields.by_id(field_id).map(|entry| (entry.def.name.clone(), len)))
        .collect();
    let indexed_at = DateTime::parse_from_rfc3339(&indexed_at)
        .map_err(|e| Error::codec(format!("invalid indexed_at timestamp {indexed_at:?}: {e}")))?
        .with_timezone(&Utc);

    Ok(StoredDocument {
        id: id_from_sql(external_id)?,
        item_type,
        generation,
        boost,
        language,
        meta: meta.as_deref().map(serde_json::from_str).transpose()?,
        fields: stored.as_deref().map(serde_json::from_str).transpose()?.unwrap_or_default(),
        field_lengths,
        indexed_at,
    })
}

pub(crate) fn document_count(conn: &Connection, ctx: &IndexContext) -> Result<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", ctx.names.docs), [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

pub(crate) fn stats(conn: &Connection, ctx: &IndexContext) -> Result<IndexStats> {
    let count = |table: &str| -> Result<u64> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    };

    let mut fields = Vec::with_capacity(ctx.fields.entries().len());
    let mut stmt = conn.prepare_cached(&format!("SELECT total_length FROM {} WHERE field_id = ?1", ctx.names.fields))?;
    for entry in ctx.fields.entries() {
        let total_length: i64 = stmt.query_row([entry.id], |row| row.get(0))?;
        fields.push(FieldStats {
            name: entry.def.name.clone(),
            weight: entry.def.weight,
            stored: entry.def.stored,
            total_length: total_length.max(0) as u64,
        });
    }

    Ok(IndexStats {
        name: ctx.names.prefix.clone(),
        schema_version: SchemaManager::get_current_version(conn, &ctx.names)?,
        analyzer: SchemaManager::analyzer(conn, &ctx.names)?.unwrap_or_default(),
        documents: count(&ctx.names.docs)?,
        terms: count(&ctx.names.terms)?,
        postings: count(&ctx.names.postings)?,
        fields,
    })
}
