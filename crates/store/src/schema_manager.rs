//! Creates and validates the index tables
//!
//! Versions are checked, never migrated: an index written by another schema
//! version is reported as a mismatch and left untouched.

use crate::error::{Error, Result};
use crate::schema::{META_ANALYZER, META_SCHEMA_VERSION, SCHEMA_VERSION, TableNames};
use quarry_core::{DocumentSchema, FieldDef};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, trace};

/// What to do when the stored analyzer fingerprint differs from the configured one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerCheck {
    /// Fail with [`Error::AnalyzerMismatch`]
    Strict,
    /// Accept the index as is; the caller is about to rebuild it
    Rebuild,
}

/// A schema field together with its stable id
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub id: i64,
    pub def: FieldDef,
}

/// Field ids of the configured schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTable {
    entries: Vec<FieldEntry>,
}

impl FieldTable {
    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldEntry> {
        self.entries.iter().find(|e| e.def.name == name)
    }

    pub fn by_id(&self, id: i64) -> Option<&FieldEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Manages the schema of one named index
pub struct SchemaManager;

impl SchemaManager {
    /// Get the schema version recorded for an index
    ///
    /// Returns 0 if the meta table doesn't exist or holds no version row.
    pub fn get_current_version(conn: &Connection, names: &TableNames) -> Result<i64> {
        if !table_exists(conn, &names.meta)? {
            trace!("{} does not exist, returning version 0", names.meta);
            return Ok(0);
        }

        let version: Option<String> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", names.meta),
                [META_SCHEMA_VERSION],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::storage("Failed to query schema version", e))?;

        match version {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| {
                debug!(raw, "Schema version marker is not a number");
                Error::SchemaMismatch { found: 0, expected: SCHEMA_VERSION }
            }),
        }
    }

    /// Create the index tables or validate existing ones
    ///
    /// This is idempotent: running it against a valid index changes nothing
    /// apart from registering schema fields the index has not seen yet.
    pub fn ensure_schema(
        conn: &mut Connection, names: &TableNames, schema: &DocumentSchema, fingerprint: &str, check: AnalyzerCheck,
    ) -> Result<FieldTable> {
        let sp = conn
            .savepoint()
            .map_err(|e| Error::storage("Failed to start schema savepoint", e))?;

        let present = names
            .all()
            .into_iter()
            .map(|table| table_exists(&sp, table))
            .collect::<Result<Vec<_>>>()?;

        if present.iter().all(|p| !p) {
            info!(index = %names.prefix, version = SCHEMA_VERSION, "Creating search index schema");
            sp.execute_batch(&names.create_sql())
                .map_err(|e| Error::storage("Failed to create index tables", e))?;
            write_meta(&sp, names, META_SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
            write_meta(&sp, names, META_ANALYZER, fingerprint)?;
        } else {
            let found = Self::get_current_version(&sp, names)?;
            debug!(index = %names.prefix, found, expected = SCHEMA_VERSION, "Validating search index schema");

            if found != SCHEMA_VERSION || present.iter().any(|p| !p) {
                return Err(Error::SchemaMismatch { found, expected: SCHEMA_VERSION });
            }

            let stored = read_meta(&sp, names, META_ANALYZER)?.unwrap_or_default();
            if stored != fingerprint {
                match check {
                    AnalyzerCheck::Strict => {
                        return Err(Error::AnalyzerMismatch { stored, configured: fingerprint.to_string() });
                    }
                    AnalyzerCheck::Rebuild => {
                        debug!(%stored, configured = fingerprint, "Accepting analyzer change ahead of reindex");
                    }
                }
            }
        }

        let fields = register_fields(&sp, names, schema)?;
        sp.commit()
            .map_err(|e| Error::storage("Failed to release schema savepoint", e))?;
        Ok(fields)
    }

    /// Record the analyzer an index is built with
    pub fn set_analyzer(conn: &Connection, names: &TableNames, fingerprint: &str) -> Result<()> {
        write_meta(conn, names, META_ANALYZER, fingerprint)
    }

    /// Analyzer fingerprint stored with the index
    pub fn analyzer(conn: &Connection, names: &TableNames) -> Result<Option<String>> {
        read_meta(conn, names, META_ANALYZER)
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
        [table],
        |row| row.get(0),
    )
    .map_err(|e| Error::storage(format!("Failed to check table {table}"), e))
}

fn read_meta(conn: &Connection, names: &TableNames, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT value FROM {} WHERE key = ?1", names.meta))?;
    Ok(stmt.query_row([key], |row| row.get(0)).optional()?)
}

fn write_meta(conn: &Connection, names: &TableNames, key: &str, value: &str) -> Result<()> {
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} (key, value) VALUES (?1, ?2) ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        names.meta
    ))?;
    stmt.execute(params![key, value])?;
    Ok(())
}

fn register_fields(conn: &Connection, names: &TableNames, schema: &DocumentSchema) -> Result<FieldTable> {
    let mut insert = conn.prepare_cached(&format!(
        "INSERT INTO {} (name) VALUES (?1) ON CONFLICT (name) DO NOTHING",
        names.fields
    ))?;
    let mut select = conn.prepare_cached(&format!("SELECT field_id FROM {} WHERE name = ?1", names.fields))?;

    let mut entries = Vec::with_capacity(schema.fields().len());
    for def in schema.fields() {
        if insert.execute([&def.name])? > 0 {
            debug!(field = %def.name, "Registered field");
        }
        let id: i64 = select.query_row([&def.name], |row| row.get(0))?;
        entries.push(FieldEntry { id, def: def.clone() });
    }

    Ok(FieldTable { entries })
}
