//! Maintains postings, the term dictionary and field statistics
//!
//! Every mutation runs inside its own savepoint: it is released when the call
//! succeeds and rolled back when any step fails. With `auto_flush` disabled
//! the first mutation also opens an outer `BEGIN IMMEDIATE` transaction that
//! only [`flush`] commits.

use crate::codec::{encode_positions, id_from_sql, id_to_sql};
use crate::context::IndexContext;
use crate::error::{Error, Result};
use crate::postings::DocKey;
use crate::schema_manager::SchemaManager;

use chrono::Utc;
use quarry_core::{Analyzer, Document, DocumentId};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Savepoint, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, trace};

/// Outcome of rebuilding an index from stored field text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexReport {
    /// Documents processed
    pub documents: usize,
    /// Terms in the rebuilt dictionary
    pub terms: usize,
    /// Documents that had indexed text in fields that are not stored
    pub incomplete: Vec<DocumentId>,
}

/// Terms and positions of one field of one document
#[derive(Debug)]
struct AnalyzedField {
    field_id: i64,
    length: u32,
    terms: BTreeMap<String, Vec<u32>>,
}

/// Applies document mutations to one index
pub struct IndexWriter<'a> {
    conn: &'a mut Connection,
    ctx: &'a IndexContext,
}

impl<'a> IndexWriter<'a> {
    pub fn new(conn: &'a mut Connection, ctx: &'a IndexContext) -> Self {
        Self { conn, ctx }
    }

    /// Index a new document
    #[instrument(skip_all, fields(index = %self.ctx.names.prefix, id = %doc.id))]
    pub fn add_document(&mut self, doc: &Document) -> Result<()> {
        self.add_documents(std::slice::from_ref(doc))
    }

    /// Index several documents; either all of them are added or none
    #[instrument(skip_all, fields(index = %self.ctx.names.prefix, count = docs.len()))]
    pub fn add_documents(&mut self, docs: &[Document]) -> Result<()> {
        let ctx = self.ctx;
        let sp = begin(self.conn, ctx)?;

        for doc in docs {
            let doc_key = insert_document(&sp, ctx, doc)?;
            debug!(id = %doc.id, doc_key, "Added document");
        }

        sp.commit()
            .map_err(|e| Error::storage("Failed to release add savepoint", e))?;
        Ok(())
    }

    /// Replace every field and all metadata of an existing document
    #[instrument(skip_all, fields(index = %self.ctx.names.prefix, id = %doc.id))]
    pub fn update_document(&mut self, doc: &Document) -> Result<()> {
        let ctx = self.ctx;
        let sp = begin(self.conn, ctx)?;

        let doc_key = find_doc_key(&sp, ctx, &doc.id)?.ok_or_else(|| Error::NotFound(doc.id.clone()))?;
        let fields = analyze_document(ctx, doc)?;

        remove_postings(&sp, ctx, doc_key)?;
        write_postings(&sp, ctx, doc_key, &fields)?;

        let mut stmt = sp.prepare_cached(&format!(
            "UPDATE {} SET item_type = ?2, generation = generation + 1, field_lengths = ?3, boost = ?4,
                language = ?5, meta_json = ?6, stored_json = ?7, indexed_at = ?8
             WHERE doc_id = ?1",
            ctx.names.docs
        ))?;
        stmt.execute(params![
            doc_key,
            doc.item_type,
            field_lengths_json(&fields)?,
            doc.boost,
            doc.language,
            meta_json(doc)?,
            stored_json(ctx, doc)?,
            Utc::now().to_rfc3339(),
        ])?;
        drop(stmt);

        sp.commit()
            .map_err(|e| Error::storage("Failed to release update savepoint", e))?;
        debug!(doc_key, "Updated document");
        Ok(())
    }

    /// Delete a document and every posting that points at it
    #[instrument(skip_all, fields(index = %self.ctx.names.prefix, %id))]
    pub fn remove_document(&mut self, id: &DocumentId) -> Result<()> {
        let ctx = self.ctx;
        let sp = begin(self.conn, ctx)?;

        let doc_key = find_doc_key(&sp, ctx, id)?.ok_or_else(|| Error::NotFound(id.clone()))?;
        remove_postings(&sp, ctx, doc_key)?;
        sp.prepare_cached(&format!("DELETE FROM {} WHERE doc_id = ?1", ctx.names.docs))?
            .execute([doc_key])?;

        sp.commit()
            .map_err(|e| Error::storage("Failed to release remove savepoint", e))?;
        debug!(doc_key, "Removed document");
        Ok(())
    }

    /// Empty the index, keeping its schema and field ids
    #[instrument(skip_all, fields(index = %self.ctx.names.prefix))]
    pub fn remove_all(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let sp = begin(self.conn, ctx)?;
        clear_index(&sp, ctx)?;
        sp.execute(&format!("DELETE FROM {}", ctx.names.docs), [])?;
        sp.commit()
            .map_err(|e| Error::storage("Failed to release clear savepoint", e))?;
        info!("Removed all documents");
        Ok(())
    }

    /// Rebuild postings and statistics from stored field text with the current analyzer
    #[instrument(skip_all, fields(index = %self.ctx.names.prefix))]
    pub fn reindex(&mut self) -> Result<ReindexReport> {
        let ctx = self.ctx;
        let sp = begin(self.conn, ctx)?;

        let rows = {
            let mut stmt = sp.prepare(&format!(
                "SELECT doc_id, external_id, language, stored_json, field_lengths FROM {} ORDER BY doc_id",
                ctx.names.docs
            ))?;
            stmt.query_map([], |row| {
                Ok((
                    row.get::<_, DocKey>(0)?,
                    row.get::<_, Value>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        };

        info!(documents = rows.len(), "Reindexing");
        clear_index(&sp, ctx)?;

        let mut report = ReindexReport { documents: rows.len(), ..Default::default() };
        let mut update = sp.prepare_cached(&format!(
            "UPDATE {} SET field_lengths = ?2, indexed_at = ?3 WHERE doc_id = ?1",
            ctx.names.docs
        ))?;

        for (doc_key, external_id, language, stored, lengths) in rows {
            let stored: BTreeMap<String, String> = match stored {
                Some(json) => serde_json::from_str(&json)?,
                None => BTreeMap::new(),
            };
            let previous: BTreeMap<i64, u32> = serde_json::from_str(&lengths)?;

            let lost = previous.iter().any(|(field_id, &len)| {
                len > 0
                    && ctx
                        .fields
                        .by_id(*field_id)
                        .is_none_or(|entry| !stored.contains_key(&entry.def.name))
            });
            if lost {
                report.incomplete.push(id_from_sql(external_id)?);
            }

            let analyzer = ctx.analyzer_for(language.as_deref())?;
            let texts: Vec<(&str, &str)> = ctx
                .schema
                .fields()
                .iter()
                .filter_map(|def| stored.get(&def.name).map(|text| (def.name.as_str(), text.as_str())))
                .collect();
            let fields = analyze_fields(ctx, &analyzer, texts)?;

            write_postings(&sp, ctx, doc_key, &fields)?;
            update.execute(params![doc_key, field_lengths_json(&fields)?, Utc::now().to_rfc3339()])?;
            trace!(doc_key, "Reindexed document");
        }
        drop(update);

        SchemaManager::set_analyzer(&sp, &ctx.names, &ctx.analyzer.fingerprint())?;
        report.terms = sp.query_row(&format!("SELECT COUNT(*) FROM {}", ctx.names.terms), [], |row| {
            row.get::<_, i64>(0)
        })? as usize;

        sp.commit()
            .map_err(|e| Error::storage("Failed to release reindex savepoint", e))?;
        info!(documents = report.documents, terms = report.terms, incomplete = report.incomplete.len(), "Reindex complete");
        Ok(report)
    }
}

/// Commit mutations pending in an open write transaction
pub fn flush(conn: &Connection) -> Result<()> {
    if conn.is_autocommit() {
        trace!("Nothing to flush");
        return Ok(());
    }

    conn.execute_batch("COMMIT")
        .map_err(|e| Error::storage("Failed to commit pending mutations", e))?;
    debug!("Flushed pending mutations");
    Ok(())
}

/// Flush, then refresh planner statistics and compact the database file
pub fn optimize(conn: &Connection) -> Result<()> {
    flush(conn)?;
    conn.execute_batch("ANALYZE")
        .map_err(|e| Error::storage("Failed to analyze database", e))?;
    conn.execute_batch("VACUUM")
        .map_err(|e| Error::storage("Failed to vacuum database", e))?;
    info!("Optimized database");
    Ok(())
}

/// Internal key of a document, if it is indexed
pub fn find_doc_key(conn: &Connection, ctx: &IndexContext, id: &DocumentId) -> Result<Option<DocKey>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT doc_id FROM {} WHERE external_id = ?1", ctx.names.docs))?;
    Ok(stmt.query_row([id_to_sql(id)], |row| row.get(0)).optional()?)
}

fn begin<'c>(conn: &'c mut Connection, ctx: &IndexContext) -> Result<Savepoint<'c>> {
    if !ctx.config.auto_flush && conn.is_autocommit() {
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::storage("Failed to open write transaction", e))?;
        trace!("Opened write transaction until flush");
    }

    conn.savepoint()
        .map_err(|e| Error::storage("Failed to start savepoint", e))
}

fn insert_document(conn: &Connection, ctx: &IndexContext, doc: &Document) -> Result<DocKey> {
    if find_doc_key(conn, ctx, &doc.id)?.is_some() {
        return Err(Error::DuplicateDocument(doc.id.clone()));
    }

    let fields = analyze_document(ctx, doc)?;

    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} (external_id, item_type, generation, field_lengths, boost, language, meta_json, stored_json, indexed_at)
         VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8)",
        ctx.names.docs
    ))?;
    stmt.execute(params![
        id_to_sql(&doc.id),
        doc.item_type,
        field_lengths_json(&fields)?,
        doc.boost,
        doc.language,
        meta_json(doc)?,
        stored_json(ctx, doc)?,
        Utc::now().to_rfc3339(),
    ])?;
    let doc_key = conn.last_insert_rowid();

    write_postings(conn, ctx, doc_key, &fields)?;
    Ok(doc_key)
}

fn analyze_document(ctx: &IndexContext, doc: &Document) -> Result<Vec<AnalyzedField>> {
    ctx.schema.validate(doc)?;
    let analyzer = ctx.analyzer_for(doc.language.as_deref())?;
    analyze_fields(ctx, &analyzer, doc.fields.iter().map(|(name, text)| (name.as_str(), text.as_str())))
}

fn analyze_fields<'t>(
    ctx: &IndexContext, analyzer: &Analyzer, texts: impl IntoIterator<Item = (&'t str, &'t str)>,
) -> Result<Vec<AnalyzedField>> {
    let mut out = Vec::new();

    for (name, text) in texts {
        let entry = ctx
            .fields
            .by_name(name)
            .ok_or_else(|| Error::InvalidDocument(format!("field '{name}' is not registered")))?;

        let tokens = analyzer.analyze_field(name, text);
        let mut terms: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for token in &tokens {
            terms.entry(token.term.clone()).or_default().push(token.position);
        }

        out.push(AnalyzedField { field_id: entry.id, length: tokens.len() as u32, terms });
    }

    Ok(out)
}

fn write_postings(conn: &Connection, ctx: &IndexContext, doc_key: DocKey, fields: &[AnalyzedField]) -> Result<()> {
    let mut upsert_term = conn.prepare_cached(&format!(
        "INSERT INTO {} (term, doc_freq) VALUES (?1, 1)
         ON CONFLICT (term) DO UPDATE SET doc_freq = doc_freq + 1
         RETURNING term_id",
        ctx.names.terms
    ))?;
    let mut insert_posting = conn.prepare_cached(&format!(
        "INSERT INTO {} (term_id, doc_id, field_id, freq, positions) VALUES (?1, ?2, ?3, ?4, ?5)",
        ctx.names.postings
    ))?;
    let mut add_length = conn.prepare_cached(&format!(
        "UPDATE {} SET total_length = total_length + ?2 WHERE field_id = ?1",
        ctx.names.fields
    ))?;

    let mut term_ids: BTreeMap<&str, i64> = BTreeMap::new();
    for field in fields {
        for term in field.terms.keys() {
            if !term_ids.contains_key(term.as_str()) {
                let term_id: i64 = upsert_term
                    .query_row([term], |row| row.get(0))
                    .map_err(|e| Error::storage(format!("Failed to record term {term:?}"), e))?;
                term_ids.insert(term, term_id);
            }
        }
    }

    for field in fields {
        for (term, positions) in &field.terms {
            insert_posting.execute(params![
                term_ids[term.as_str()],
                doc_key,
                field.field_id,
                positions.len() as i64,
                encode_positions(positions),
            ])?;
        }
        add_length.execute(params![field.field_id, field.length])?;
    }

    trace!(doc_key, terms = term_ids.len(), "Wrote postings");
    Ok(())
}

fn remove_postings(conn: &Connection, ctx: &IndexContext, doc_key: DocKey) -> Result<()> {
    let lengths: String = conn
        .prepare_cached(&format!("SELECT field_lengths FROM {} WHERE doc_id = ?1", ctx.names.docs))?
        .query_row([doc_key], |row| row.get(0))?;
    let lengths: BTreeMap<i64, u32> = serde_json::from_str(&lengths)?;

    let mut subtract = conn.prepare_cached(&format!(
        "UPDATE {} SET total_length = MAX(total_length - ?2, 0) WHERE field_id = ?1",
        ctx.names.fields
    ))?;
    for (field_id, length) in lengths {
        subtract.execute(params![field_id, length])?;
    }

    let (terms, postings) = (&ctx.names.terms, &ctx.names.postings);
    conn.prepare_cached(&format!(
        "UPDATE {terms} SET doc_freq = doc_freq - 1
         WHERE term_id IN (SELECT DISTINCT term_id FROM {postings} WHERE doc_id = ?1)"
    ))?
    .execute([doc_key])?;
    conn.prepare_cached(&format!(
        "DELETE FROM {terms} WHERE doc_freq <= 0
         AND term_id IN (SELECT term_id FROM {postings} WHERE doc_id = ?1)"
    ))?
    .execute([doc_key])?;
    conn.prepare_cached(&format!("DELETE FROM {postings} WHERE doc_id = ?1"))?
        .execute([doc_key])?;

    trace!(doc_key, "Removed postings");
    Ok(())
}

fn clear_index(conn: &Connection, ctx: &IndexContext) -> Result<()> {
    conn.execute_batch(&format!(
        "DELETE FROM {postings}; DELETE FROM {terms}; UPDATE {fields} SET total_length = 0;",
        postings = ctx.names.postings,
        terms = ctx.names.terms,
        fields = ctx.names.fields,
    ))
    .map_err(|e| Error::storage("Failed to clear index tables", e))
}

fn field_lengths_json(fields: &[AnalyzedField]) -> Result<String> {
    let lengths: BTreeMap<i64, u32> = fields.iter().map(|f| (f.field_id, f.length)).collect();
    Ok(serde_json::to_string(&lengths)?)
}

fn meta_json(doc: &Document) -> Result<Option<String>> {
    Ok(doc.meta.as_ref().map(serde_json::to_string).transpose()?)
}

fn stored_json(ctx: &IndexContext, doc: &Document) -> Result<Option<String>> {
    let stored: BTreeMap<&str, &str> = doc
        .fields
        .iter()
        .filter(|(name, _)| ctx.schema.field(name).is_some_and(|def| def.stored))
        .map(|(name, text)| (name.as_str(), text.as_str()))
        .collect();

    if stored.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(&stored)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_manager::AnalyzerCheck;
    use quarry_core::{FieldDef, IndexConfig};

    fn setup(auto_flush: bool) -> (Connection, IndexContext) {
        let config = IndexConfig {
            auto_flush,
            ..IndexConfig::default().with_fields(vec![FieldDef::new("title").stored(), FieldDef::new("body")])
        };
        let analyzer = Analyzer::from_config(&config);
        let mut ctx = IndexContext::new(config, analyzer).unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        ctx.fields = SchemaManager::ensure_schema(
            &mut conn,
            &ctx.names,
            &ctx.schema,
            &ctx.analyzer.fingerprint(),
            AnalyzerCheck::Strict,
        )
        .unwrap();
        (conn, ctx)
    }

    fn doc_freq(conn: &Connection, term: &str) -> Option<i64> {
        conn.query_row("SELECT doc_freq FROM search_index_terms WHERE term = ?1", [term], |row| row.get(0))
            .optional()
            .unwrap()
    }

    fn total_length(conn: &Connection, field: &str) -> i64 {
        conn.query_row("SELECT total_length FROM search_index_fields WHERE name = ?1", [field], |row| row.get(0))
            .unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_add_updates_statistics() {
        let (mut conn, ctx) = setup(true);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer
            .add_document(&Document::new(1).with_field("title", "fox fox").with_field("body", "the fox"))
            .unwrap();
        writer.add_document(&Document::new(2).with_field("body", "slow fox")).unwrap();

        assert_eq!(doc_freq(&conn, "fox"), Some(2));
        assert_eq!(doc_freq(&conn, "slow"), Some(1));
        assert_eq!(total_length(&conn, "title"), 2);
        assert_eq!(total_length(&conn, "body"), 4);
        assert_eq!(count(&conn, "search_index_postings"), 5);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let (mut conn, ctx) = setup(true);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.add_document(&Document::new("a").with_field("body", "x")).unwrap();
        let err = writer.add_document(&Document::new("a").with_field("body", "y")).unwrap_err();
        assert!(matches!(err, Error::DuplicateDocument(DocumentId::Text(ref id)) if id == "a"));
    }

    #[test]
    fn test_integer_and_string_ids_are_distinct() {
        let (mut conn, ctx) = setup(true);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.add_document(&Document::new(1).with_field("body", "x")).unwrap();
        writer.add_document(&Document::new("1").with_field("body", "x")).unwrap();
        assert_eq!(count(&conn, "search_index_docs"), 2);
    }

    #[test]
    fn test_remove_drops_orphan_terms() {
        let (mut conn, ctx) = setup(true);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.add_document(&Document::new(1).with_field("body", "quick fox")).unwrap();
        writer.add_document(&Document::new(2).with_field("body", "slow fox")).unwrap();
        writer.remove_document(&DocumentId::Int(1)).unwrap();

        assert_eq!(doc_freq(&conn, "quick"), None);
        assert_eq!(doc_freq(&conn, "fox"), Some(1));
        assert_eq!(total_length(&conn, "body"), 2);

        let mut writer = IndexWriter::new(&mut conn, &ctx);
        assert!(matches!(writer.remove_document(&DocumentId::Int(1)), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_update_keeps_key_and_bumps_generation() {
        let (mut conn, ctx) = setup(true);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.add_document(&Document::new(1).with_field("body", "old words")).unwrap();
        let before = find_doc_key(&conn, &ctx, &DocumentId::Int(1)).unwrap();

        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.update_document(&Document::new(1).with_field("body", "new text")).unwrap();
        let after = find_doc_key(&conn, &ctx, &DocumentId::Int(1)).unwrap();

        assert_eq!(before, after);
        assert_eq!(doc_freq(&conn, "old"), None);
        assert_eq!(doc_freq(&conn, "new"), Some(1));
        let generation: i64 = conn
            .query_row("SELECT generation FROM search_index_docs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(generation, 2);

        let mut writer = IndexWriter::new(&mut conn, &ctx);
        assert!(matches!(
            writer.update_document(&Document::new(9).with_field("body", "x")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_batch_leaves_index_unchanged() {
        let (mut conn, ctx) = setup(true);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        let batch = vec![
            Document::new(1).with_field("body", "first"),
            Document::new(2).with_field("colour", "red"),
        ];
        assert!(matches!(writer.add_documents(&batch), Err(Error::InvalidDocument(_))));

        assert_eq!(count(&conn, "search_index_docs"), 0);
        assert_eq!(count(&conn, "search_index_terms"), 0);
        assert_eq!(total_length(&conn, "body"), 0);
    }

    #[test]
    fn test_remove_all_keeps_fields() {
        let (mut conn, ctx) = setup(true);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.add_document(&Document::new(1).with_field("body", "a b c")).unwrap();
        writer.remove_all().unwrap();

        assert_eq!(count(&conn, "search_index_docs"), 0);
        assert_eq!(count(&conn, "search_index_postings"), 0);
        assert_eq!(count(&conn, "search_index_fields"), 2);
        assert_eq!(total_length(&conn, "body"), 0);
    }

    #[test]
    fn test_reindex_reports_unstored_fields() {
        let (mut conn, ctx) = setup(true);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.add_document(&Document::new(1).with_field("title", "Stored title")).unwrap();
        writer
            .add_document(&Document::new(2).with_field("title", "Other").with_field("body", "lost body"))
            .unwrap();

        let report = writer.reindex().unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.incomplete, vec![DocumentId::Int(2)]);
        assert_eq!(doc_freq(&conn, "stored"), Some(1));
        assert_eq!(doc_freq(&conn, "lost"), None);
        assert_eq!(total_length(&conn, "body"), 0);
        assert_eq!(report.terms, 3);
    }

    #[test]
    fn test_manual_flush() {
        let (mut conn, ctx) = setup(false);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.add_document(&Document::new(1).with_field("body", "pending")).unwrap();
        assert!(!conn.is_autocommit());

        flush(&conn).unwrap();
        assert!(conn.is_autocommit());
        assert_eq!(count(&conn, "search_index_docs"), 1);
        flush(&conn).unwrap();
    }

    #[test]
    fn test_optimize() {
        let (mut conn, ctx) = setup(false);
        let mut writer = IndexWriter::new(&mut conn, &ctx);
        writer.add_document(&Document::new(1).with_field("body", "pending")).unwrap();
        optimize(&conn).unwrap();
        assert!(conn.is_autocommit());
    }
}
