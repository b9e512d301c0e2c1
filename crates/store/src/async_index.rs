//! Async index handle for tokio applications
//!
//! Every operation runs on the connection thread owned by
//! [`tokio_rusqlite::Connection`]; searches collect their hits there.

use crate::context::IndexContext;
use crate::error::Result;
use crate::executor::{ResultCursor, SearchHit, SearchOptions};
use crate::index::{self, IndexStats, StoredDocument};
use crate::schema_manager::{AnalyzerCheck, SchemaManager};
use crate::writer::{self, IndexWriter, ReindexReport};

use quarry_core::logging::sanitize_path;
use quarry_core::{Analyzer, Document, DocumentId, IndexConfig, QueryNode, QueryParser};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_rusqlite::Connection;
use tracing::{debug, info, instrument};

/// Cloneable async handle; clones share one connection
#[derive(Clone)]
pub struct AsyncSearchIndex {
    conn: Connection,
    ctx: Arc<IndexContext>,
}

impl AsyncSearchIndex {
    #[instrument(skip_all, fields(path = %sanitize_path(path.as_ref()), index = %config.name))]
    pub async fn open(path: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        info!("Opening search index");
        let conn = Connection::open(path.as_ref().to_owned()).await?;
        conn.call(|conn| {
            let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(journal_mode = %mode, "Configured journal");
            Ok::<_, rusqlite::Error>(())
        })
        .await?;

        let analyzer = Analyzer::from_config(&config);
        Self::with_analyzer(conn, config, analyzer).await
    }

    pub async fn open_in_memory(config: IndexConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let analyzer = Analyzer::from_config(&config);
        Self::with_analyzer(conn, config, analyzer).await
    }

    /// Use an existing connection and a custom analysis pipeline
    #[instrument(skip_all, fields(index = %config.name))]
    pub async fn with_analyzer(conn: Connection, config: IndexConfig, analyzer: Analyzer) -> Result<Self> {
        let mut ctx = IndexContext::new(config, analyzer)?;
        let names = ctx.names.clone();
        let schema = ctx.schema.clone();
        let fingerprint = ctx.analyzer.fingerprint();
        let timeout = Duration::from_millis(ctx.config.busy_timeout_ms);

        ctx.fields = conn
            .call(move |conn| {
                conn.busy_timeout(timeout)?;
                Ok::<_, rusqlite::Error>(SchemaManager::ensure_schema(
                    conn,
                    &names,
                    &schema,
                    &fingerprint,
                    AnalyzerCheck::Strict,
                ))
            })
            .await??;

        info!(analyzer = ctx.analyzer.name(), "Search index ready");
        Ok(Self { conn, ctx: Arc::new(ctx) })
    }

    /// Run `work` on the connection thread
    async fn run<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection, &IndexContext) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        self.conn
            .call(move |conn| Ok::<_, rusqlite::Error>(work(conn, &ctx)))
            .await?
    }

    pub async fn add_document(&self, doc: Document) -> Result<()> {
        self.run(move |conn, ctx| IndexWriter::new(conn, ctx).add_document(&doc))
            .await
    }

    pub async fn add_documents(&self, docs: Vec<Document>) -> Result<()> {
        self.run(move |conn, ctx| IndexWriter::new(conn, ctx).add_documents(&docs))
            .await
    }

    pub async fn update_document(&self, doc: Document) -> Result<()> {
        self.run(move |conn, ctx| IndexWriter::new(conn, ctx).update_document(&doc))
            .await
    }

    pub async fn remove_document(&self, id: DocumentId) -> Result<()> {
        self.run(move |conn, ctx| IndexWriter::new(conn, ctx).remove_document(&id))
            .await
    }

    pub async fn remove_all(&self) -> Result<()> {
        self.run(|conn, ctx| IndexWriter::new(conn, ctx).remove_all()).await
    }

    pub async fn reindex(&self) -> Result<ReindexReport> {
        self.run(|conn, ctx| IndexWriter::new(conn, ctx).reindex()).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.run(|conn, _| writer::flush(conn)).await
    }

    pub async fn optimize(&self) -> Result<()> {
        self.run(|conn, _| writer::optimize(conn)).await
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.run(|conn, ctx| {
            let fields = SchemaManager::ensure_schema(
                conn,
                &ctx.names,
                &ctx.schema,
                &ctx.analyzer.fingerprint(),
                AnalyzerCheck::Strict,
            )?;
            debug!(fields = fields.entries().len(), "Schema validated");
            Ok(())
        })
        .await
    }

    pub fn parse_query(&self, query: &str, locale: Option<&str>) -> Result<QueryNode> {
        let analyzer = self.ctx.analyzer_for(locale)?;
        Ok(QueryParser::new(&analyzer, &self.ctx.schema).parse(query)?)
    }

    /// Run a search and collect every hit
    #[instrument(skip(self, options), fields(index = %self.ctx.names.prefix))]
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchHit>> {
        let node = self.parse_query(query, options.locale.as_deref())?;
        self.search_node(node, options).await
    }

    pub async fn search_node(&self, node: QueryNode, options: SearchOptions) -> Result<Vec<SearchHit>> {
        self.run(move |conn, ctx| {
            let analyzer = ctx.analyzer_for(options.locale.as_deref())?;
            ResultCursor::new(conn, ctx, node, options, analyzer)?.collect()
        })
        .await
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<StoredDocument> {
        self.run(move |conn, ctx| index::get_document(conn, ctx, &id)).await
    }

    pub async fn contains(&self, id: DocumentId) -> Result<bool> {
        self.run(move |conn, ctx| Ok(writer::find_doc_key(conn, ctx, &id)?.is_some()))
            .await
    }

    pub async fn document_count(&self) -> Result<u64> {
        self.run(|conn, ctx| index::document_count(conn, ctx)).await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.run(|conn, ctx| index::stats(conn, ctx)).await
    }
}
