//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits,
//! one file per store.

mod domains;
mod paths;
mod processes;
mod resources;
mod triples;

use crate::graph::{Literal, Term};
use crate::storage::schema::initialize_schema;
use crate::url::CrawlTarget;
use crate::SumiError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SumiError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SumiError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (tests and dry runs)
    pub fn new_in_memory() -> Result<Self, SumiError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn required_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}

/// Column values of a term: kind, value, datatype, language
///
/// Missing datatype and language are stored as empty strings so the natural
/// key of a triple has no NULLs.
fn term_columns(term: &Term) -> (&'static str, &str, &str, &str) {
    match term {
        Term::Named(iri) => ("named", iri.as_str(), "", ""),
        Term::Literal(literal) => (
            "literal",
            literal.value.as_str(),
            literal.datatype.as_deref().unwrap_or(""),
            literal.language.as_deref().unwrap_or(""),
        ),
    }
}

fn term_from_columns(kind: &str, value: String, datatype: String, language: String) -> Term {
    match kind {
        "literal" => Term::Literal(Literal {
            value,
            datatype: Some(datatype).filter(|d| !d.is_empty()),
            language: Some(language).filter(|l| !l.is_empty()),
        }),
        _ => Term::Named(value),
    }
}

/// Creates the domain and resource rows of a crawl target if missing
fn ensure_target(conn: &Connection, target: &CrawlTarget, now: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO domains (origin, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![target.origin, now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO resources (url, origin, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![target.resource, target.origin, now],
    )?;
    Ok(())
}
