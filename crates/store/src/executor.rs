//! Query evaluation and the lazy, ranked result cursor
//!
//! Leaves read posting lists ordered by document key, combinators merge them
//! linearly and the survivors are ranked with [`Bm25`] into a bounded top-k
//! heap. Nothing is read until the cursor is first advanced.

use crate::codec::{decode_positions, id_from_sql};
use crate::context::IndexContext;
use crate::error::{Error, Result};
use crate::postings::{DocKey, ScoredDoc, difference, intersect, phrase_occurrences, union};
use crate::ranking::{Bm25, CollectionStats};
use crate::snippet::Highlighter;

use quarry_core::{Analyzer, DocumentId, PhraseTerm, QueryNode};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::iter::FusedIterator;
use std::sync::Arc;
use tracing::{debug, trace};

/// Order of search results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchOrder {
    /// Descending score, ties by ascending document id
    #[default]
    Relevance,
    /// Indexing order, without ranking
    Natural,
}

/// Options of one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchOptions {
    /// Maximum number of hits
    pub limit: Option<usize>,
    /// Hits to skip
    pub offset: usize,
    /// Restrict matching to these fields
    pub fields: Option<Vec<String>>,
    /// Analyze the query for this locale instead of the index language
    pub locale: Option<String>,
    /// Keep only documents of this type
    pub item_type: Option<i64>,
    pub order: SearchOrder,
    /// Build highlighted snippets from stored fields
    pub snippets: bool,
    /// Snippet window, in tokens
    pub snippet_tokens: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: None,
            offset: 0,
            fields: None,
            locale: None,
            item_type: None,
            order: SearchOrder::Relevance,
            snippets: false,
            snippet_tokens: 32,
        }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_item_type(mut self, item_type: i64) -> Self {
        self.item_type = Some(item_type);
        self
    }

    pub fn with_order(mut self, order: SearchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_snippets(mut self) -> Self {
        self.snippets = true;
        self
    }
}

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: DocumentId,
    /// Relevance score; 0 for natural order
    pub score: f64,
    pub item_type: i64,
    pub meta: Option<serde_json::Value>,
    pub snippet: Option<String>,
}

/// A ranked match waiting to be turned into a hit
#[derive(Debug, Clone)]
struct Candidate {
    doc: DocKey,
    id: DocumentId,
    item_type: i64,
    score: f64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// Better ranked candidates order first
    fn cmp(&self, other: &Self) -> Ordering {
        other.score.total_cmp(&self.score).then_with(|| self.id.cmp(&other.id))
    }
}

/// Keeps the best `k` candidates; the heap top is the worst one kept
struct TopKCollector {
    heap: BinaryHeap<Candidate>,
    k: Option<usize>,
}

impl TopKCollector {
    fn new(k: Option<usize>) -> Self {
        let capacity = k.map_or(0, |k| k.saturating_add(1).min(1024));
        Self { heap: BinaryHeap::with_capacity(capacity), k }
    }

    fn collect(&mut self, candidate: Candidate) {
        if let Some(k) = self.k
            && self.heap.len() >= k
        {
            match self.heap.peek() {
                Some(worst) if candidate < *worst => {
                    self.heap.pop();
                }
                _ => return,
            }
        }
        self.heap.push(candidate);
    }

    fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Cached row of the docs table
#[derive(Debug)]
struct DocInfo {
    id: DocumentId,
    item_type: i64,
    boost: f64,
    lengths: BTreeMap<i64, u32>,
}

/// Field ids a search may match, or `None` for every field
fn resolve_fields(ctx: &IndexContext, options: &SearchOptions) -> Result<Option<HashSet<i64>>> {
    let Some(names) = &options.fields else {
        return Ok(None);
    };

    names
        .iter()
        .map(|name| {
            ctx.fields
                .by_name(name)
                .map(|entry| entry.id)
                .ok_or_else(|| unknown_field(name))
        })
        .collect::<Result<HashSet<_>>>()
        .map(Some)
}

fn unknown_field(name: &str) -> Error {
    Error::QuerySyntax { position: 0, message: format!("unknown field '{name}'") }
}

/// Reject a tree that scopes a leaf to a field the index does not have
fn check_node_fields(ctx: &IndexContext, node: &QueryNode) -> Result<()> {
    match node {
        QueryNode::Empty => Ok(()),
        QueryNode::Term { .. } | QueryNode::Prefix { .. } | QueryNode::Phrase { .. } => match node.field() {
            Some(name) if ctx.fields.by_name(name).is_none() => Err(unknown_field(name)),
            _ => Ok(()),
        },
        QueryNode::And(children) | QueryNode::Or(children) => {
            children.iter().try_for_each(|child| check_node_fields(ctx, child))
        }
        QueryNode::Not { include, exclude } => {
            check_node_fields(ctx, include)?;
            check_node_fields(ctx, exclude)
        }
    }
}

/// Evaluates query trees against the postings of one index
struct Evaluator<'a> {
    conn: &'a Connection,
    ctx: &'a IndexContext,
    stats: CollectionStats,
    allowed: Option<HashSet<i64>>,
    rank: bool,
    docs: HashMap<DocKey, DocInfo>,
}

impl<'a> Evaluator<'a> {
    fn new(conn: &'a Connection, ctx: &'a IndexContext, allowed: Option<HashSet<i64>>, rank: bool) -> Result<Self> {
        let stats = load_stats(conn, ctx)?;
        trace!(doc_count = stats.doc_count, "Loaded collection statistics");
        Ok(Self { conn, ctx, stats, allowed, rank, docs: HashMap::new() })
    }

    fn evaluate(&mut self, node: &QueryNode) -> Result<Vec<ScoredDoc>> {
        match node {
            QueryNode::Empty => Ok(Vec::new()),
            QueryNode::Term { field, term } => self.term(field.as_deref(), term),
            QueryNode::Prefix { field, prefix } => self.prefix(field.as_deref(), prefix),
            QueryNode::Phrase { field, terms } => self.phrase(field.as_deref(), terms),
            QueryNode::And(children) => {
                let mut children = children.iter();
                let Some(first) = children.next() else {
                    return Ok(Vec::new());
                };

                let mut acc = self.evaluate(first)?;
                for child in children {
                    if acc.is_empty() {
                        break;
                    }
                    acc = intersect(&acc, &self.evaluate(child)?);
                }
                Ok(acc)
            }
            QueryNode::Or(children) => {
                let mut acc = Vec::new();
                for child in children {
                    acc = union(&acc, &self.evaluate(child)?);
                }
                Ok(acc)
            }
            QueryNode::Not { include, exclude } => {
                let include = self.evaluate(include)?;
                if include.is_empty() {
                    return Ok(include);
                }
                Ok(difference(&include, &self.evaluate(exclude)?))
            }
        }
    }

    /// Field ids and weights a leaf may match
    fn leaf_fields(&self, field: Option<&str>) -> Result<HashMap<i64, f64>> {
        let entries = match field {
            Some(name) => {
                let entry = self.ctx.fields.by_name(name).ok_or_else(|| unknown_field(name))?;
                vec![entry]
            }
            None => self.ctx.fields.entries().iter().collect(),
        };

        Ok(entries
            .into_iter()
            .filter(|entry| self.allowed.as_ref().is_none_or(|allowed| allowed.contains(&entry.id)))
            .map(|entry| (entry.id, entry.def.weight))
            .collect())
    }

    fn lookup(&self, term: &str) -> Result<Option<(i64, u64)>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT term_id, doc_freq FROM {} WHERE term = ?1", self.ctx.names.terms))?;
        Ok(stmt
            .query_row([term], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .optional()?
            .map(|(id, df)| (id, df.max(0) as u64)))
    }

    fn term(&mut self, field: Option<&str>, term: &str) -> Result<Vec<ScoredDoc>> {
        let fields = self.leaf_fields(field)?;
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        match self.lookup(term)? {
            Some((term_id, doc_freq)) => self.postings(term_id, doc_freq, &fields),
            None => Ok(Vec::new()),
        }
    }

    fn prefix(&mut self, field: Option<&str>, prefix: &str) -> Result<Vec<ScoredDoc>> {
        let fields = self.leaf_fields(field)?;
        if fields.is_empty() || prefix.is_empty() {
            return Ok(Vec::new());
        }

        let upper = format!("{prefix}\u{10FFFF}");
        let terms = {
            let mut stmt = self.conn.prepare_cached(&format!(
                "SELECT term_id, doc_freq FROM {} WHERE term >= ?1 AND term < ?2",
                self.ctx.names.terms
            ))?;
            stmt.query_map(params![prefix, upper], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        trace!(prefix, expansions = terms.len(), "Expanded prefix");

        let mut acc = Vec::new();
        for (term_id, doc_freq) in terms {
            acc = union(&acc, &self.postings(term_id, doc_freq.max(0) as u64, &fields)?);
        }
        Ok(acc)
    }

    fn phrase(&mut self, field: Option<&str>, terms: &[PhraseTerm]) -> Result<Vec<ScoredDoc>> {
        let fields = self.leaf_fields(field)?;
        if fields.is_empty() || terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut idf = 0.0;
        let mut lists = Vec::with_capacity(terms.len());
        for term in terms {
            let Some((term_id, doc_freq)) = self.lookup(&term.term)? else {
                return Ok(Vec::new());
            };
            idf += Bm25::idf(self.stats.doc_count, doc_freq);
            lists.push((self.positions(term_id, &fields)?, term.offset));
        }

        let mut matches = Vec::new();
        if let Some(((first, first_offset), rest)) = lists.split_first() {
            for (key, positions) in first {
                let mut aligned = vec![(positions.as_slice(), *first_offset)];
                for (list, offset) in rest {
                    match list.get(key) {
                        Some(positions) => aligned.push((positions.as_slice(), *offset)),
                        None => break,
                    }
                }
                if aligned.len() < terms.len() {
                    continue;
                }

                let count = phrase_occurrences(&aligned);
                if count > 0 {
                    matches.push((*key, count));
                }
            }
        }

        let mut out = Vec::new();
        for ((doc, field_id), count) in matches {
            let weight = fields.get(&field_id).copied().unwrap_or(1.0);
            let score = self.field_score(doc, field_id, f64::from(count), idf, weight)?;
            push_score(&mut out, doc, score);
        }
        Ok(out)
    }

    /// Scored postings of one term, sorted by document key
    fn postings(&mut self, term_id: i64, doc_freq: u64, fields: &HashMap<i64, f64>) -> Result<Vec<ScoredDoc>> {
        let rows = {
            let mut stmt = self.conn.prepare_cached(&format!(
                "SELECT doc_id, field_id, freq FROM {} WHERE term_id = ?1 ORDER BY doc_id, field_id",
                self.ctx.names.postings
            ))?;
            stmt.query_map([term_id], |row| {
                Ok((row.get::<_, DocKey>(0)?, row.get::<_, i64>(1)?, row.get::<_, u32>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let idf = Bm25::idf(self.stats.doc_count, doc_freq);
        let mut out = Vec::new();
        for (doc, field_id, freq) in rows {
            let Some(&weight) = fields.get(&field_id) else {
                continue;
            };
            let score = self.field_score(doc, field_id, f64::from(freq), idf, weight)?;
            push_score(&mut out, doc, score);
        }
        Ok(out)
    }

    /// Decoded positions of one term per (document, field)
    fn positions(&self, term_id: i64, fields: &HashMap<i64, f64>) -> Result<BTreeMap<(DocKey, i64), Vec<u32>>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT doc_id, field_id, positions FROM {} WHERE term_id = ?1",
            self.ctx.names.postings
        ))?;
        let rows = stmt.query_map([term_id], |row| {
            Ok((row.get::<_, DocKey>(0)?, row.get::<_, i64>(1)?, row.get::<_, Vec<u8>>(2)?))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (doc, field_id, blob) = row?;
            if fields.contains_key(&field_id) {
                out.insert((doc, field_id), decode_positions(&blob)?);
            }
        }
        Ok(out)
    }

    fn field_score(&mut self, doc: DocKey, field_id: i64, tf: f64, idf: f64, weight: f64) -> Result<f64> {
        if !self.rank {
            return Ok(0.0);
        }

        let len = self.doc(doc)?.lengths.get(&field_id).copied().unwrap_or(0);
        Ok(self
            .ctx
            .ranking
            .score(tf, idf, weight, f64::from(len), self.stats.avg_len(field_id)))
    }

    fn doc(&mut self, doc: DocKey) -> Result<&DocInfo> {
        if !self.docs.contains_key(&doc) {
            let info = load_doc_info(self.conn, self.ctx, doc)?;
            self.docs.insert(doc, info);
        }
        Ok(&self.docs[&doc])
    }

    /// Apply the type filter and document boosts, then order and bound the matches
    fn collect(&mut self, matches: Vec<ScoredDoc>, options: &SearchOptions) -> Result<(Vec<Candidate>, usize)> {
        let k = options.limit.map(|limit| options.offset.saturating_add(limit));
        let mut collector = TopKCollector::new(k);
        let mut natural = Vec::new();
        let mut total = 0;

        for matched in matches {
            let info = self.doc(matched.doc)?;
            if options.item_type.is_some_and(|item_type| item_type != info.item_type) {
                continue;
            }
            total += 1;

            let candidate = Candidate {
                doc: matched.doc,
                id: info.id.clone(),
                item_type: info.item_type,
                score: matched.score * info.boost,
            };
            match options.order {
                SearchOrder::Relevance => collector.collect(candidate),
                SearchOrder::Natural if k.is_none_or(|k| natural.len() < k) => natural.push(candidate),
                SearchOrder::Natural => {}
            }
        }

        let ordered = match options.order {
            SearchOrder::Relevance => collector.into_sorted(),
            SearchOrder::Natural => natural,
        };
        Ok((ordered.into_iter().skip(options.offset).collect(), total))
    }
}

fn push_score(out: &mut Vec<ScoredDoc>, doc: DocKey, score: f64) {
    match out.last_mut() {
        Some(last) if last.doc == doc => last.score += score,
        _ => out.push(ScoredDoc::new(doc, score)),
    }
}

fn load_stats(conn: &Connection, ctx: &IndexContext) -> Result<CollectionStats> {
    let doc_count: i64 = conn
        .prepare_cached(&format!("SELECT COUNT(*) FROM {}", ctx.names.docs))?
        .query_row([], |row| row.get(0))?;
    let doc_count = doc_count.max(0) as u64;

    let mut stmt = conn.prepare_cached(&format!("SELECT field_id, total_length FROM {}", ctx.names.fields))?;
    let avg_len = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
        .map(|row| {
            row.map(|(field_id, total)| {
                let avg = if doc_count == 0 { 0.0 } else { total as f64 / doc_count as f64 };
                (field_id, avg)
            })
        })
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;

    Ok(CollectionStats { doc_count, avg_len })
}

fn load_doc_info(conn: &Connection, ctx: &IndexContext, doc: DocKey) -> Result<DocInfo> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT external_id, item_type, boost, field_lengths FROM {} WHERE doc_id = ?1",
        ctx.names.docs
    ))?;
    let (id, item_type, boost, lengths) = stmt.query_row([doc], |row| {
        Ok((
            row.get::<_, Value>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    Ok(DocInfo { id: id_from_sql(id)?, item_type, boost, lengths: serde_json::from_str(&lengths)? })
}

enum CursorState {
    Built,
    Evaluating(std::vec::IntoIter<Candidate>),
    Exhausted,
}

/// Single-pass iterator over the hits of one search
///
/// The query is evaluated on the first call to `next`. After the last hit, an
/// error or [`ResultCursor::close`] it only yields `None`.
pub struct ResultCursor<'a> {
    conn: &'a Connection,
    ctx: &'a IndexContext,
    node: QueryNode,
    options: SearchOptions,
    analyzer: Arc<Analyzer>,
    allowed: Option<HashSet<i64>>,
    highlighter: Option<Highlighter>,
    state: CursorState,
    total: Option<usize>,
}

impl<'a> ResultCursor<'a> {
    /// Validate field restrictions; evaluation is deferred
    pub fn new(
        conn: &'a Connection, ctx: &'a IndexContext, node: QueryNode, options: SearchOptions, analyzer: Arc<Analyzer>,
    ) -> Result<Self> {
        let allowed = resolve_fields(ctx, &options)?;
        check_node_fields(ctx, &node)?;

        Ok(Self {
            conn,
            ctx,
            node,
            options,
            analyzer,
            allowed,
            highlighter: None,
            state: CursorState::Built,
            total: None,
        })
    }

    /// Number of matching documents, once the query has been evaluated
    pub fn total_matches(&self) -> Option<usize> {
        self.total
    }

    /// Stop iterating; later calls to `next` return `None`
    pub fn close(&mut self) {
        self.state = CursorState::Exhausted;
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }

    fn evaluate(&mut self) -> Result<std::vec::IntoIter<Candidate>> {
        if self.node.is_empty() {
            self.total = Some(0);
            return Ok(Vec::new().into_iter());
        }

        let rank = self.options.order == SearchOrder::Relevance;
        let mut evaluator = Evaluator::new(self.conn, self.ctx, self.allowed.take(), rank)?;
        let matches = evaluator.evaluate(&self.node)?;
        let (candidates, total) = evaluator.collect(matches, &self.options)?;

        debug!(query = %self.node, total, returned = candidates.len(), "Evaluated query");
        self.total = Some(total);
        if self.options.snippets {
            self.highlighter = Some(Highlighter::new(&self.node));
        }
        Ok(candidates.into_iter())
    }

    fn load_hit(&self, candidate: Candidate) -> Result<SearchHit> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT meta_json, stored_json FROM {} WHERE doc_id = ?1",
            self.ctx.names.docs
        ))?;
        let (meta, stored) = stmt.query_row([candidate.doc], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let meta: Option<serde_json::Value> = meta.as_deref().map(serde_json::from_str).transpose()?;
        let snippet = match (&self.highlighter, stored) {
            (Some(highlighter), Some(stored)) => self.snippet(highlighter, &stored)?,
            _ => None,
        };

        Ok(SearchHit { id: candidate.id, score: candidate.score, item_type: candidate.item_type, meta, snippet })
    }

    /// Excerpt of the first stored field that contains a match
    fn snippet(&self, highlighter: &Highlighter, stored: &str) -> Result<Option<String>> {
        if highlighter.is_empty() {
            return Ok(None);
        }

        let stored: BTreeMap<String, String> = serde_json::from_str(stored)?;
        let searchable = |name: &str| self.options.fields.as_ref().is_none_or(|fields| fields.iter().any(|f| f == name));

        Ok(self
            .ctx
            .schema
            .fields()
            .iter()
            .filter(|def| def.stored && searchable(&def.name))
            .filter_map(|def| stored.get(&def.name).map(|text| (def.name.as_str(), text)))
            .find_map(|(field, text)| highlighter.snippet(&self.analyzer, field, text, self.options.snippet_tokens)))
    }
}

impl Iterator for ResultCursor<'_> {
    type Item = Result<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {
        if let CursorState::Built = self.state {
            match self.evaluate() {
                Ok(candidates) => self.state = CursorState::Evaluating(candidates),
                Err(e) => {
                    self.state = CursorState::Exhausted;
                    return Some(Err(e));
                }
            }
        }

        let CursorState::Evaluating(candidates) = &mut self.state else {
            return None;
        };

        let Some(candidate) = candidates.next() else {
            self.state = CursorState::Exhausted;
            return None;
        };

        match self.load_hit(candidate) {
            Ok(hit) => Some(Ok(hit)),
            Err(e) => {
                self.state = CursorState::Exhausted;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for ResultCursor<'_> {}
