//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the Sumi-Paths database.
//! Timestamps are stored as milliseconds since the Unix epoch.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Per-origin politeness state and lease
CREATE TABLE IF NOT EXISTS domains (
    origin TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'unvisited',
    robots_status TEXT NOT NULL DEFAULT 'unvisited',
    robots_text TEXT,
    robots_checked_at INTEGER,
    crawl_delay_ms INTEGER NOT NULL DEFAULT 0,
    last_accessed INTEGER,
    next_allowed INTEGER,
    queued INTEGER NOT NULL DEFAULT 0,
    ongoing INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    path_heads INTEGER NOT NULL DEFAULT 0,
    worker_id TEXT,
    job_id INTEGER,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_domains_status ON domains(status, robots_status);

-- Typed warning counters
CREATE TABLE IF NOT EXISTS domain_warnings (
    origin TEXT NOT NULL REFERENCES domains(origin),
    kind TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (origin, kind)
);

-- Fetchable documents
CREATE TABLE IF NOT EXISTS resources (
    url TEXT PRIMARY KEY,
    origin TEXT NOT NULL REFERENCES domains(origin),
    status TEXT NOT NULL DEFAULT 'unvisited',
    job_id INTEGER,
    error_kind TEXT,
    error_message TEXT,
    triple_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resources_origin ON resources(origin, status);
CREATE INDEX IF NOT EXISTS idx_resources_status ON resources(status);

-- Deduplicated facts; literal columns default to '' so the natural key is total
CREATE TABLE IF NOT EXISTS triples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object_kind TEXT NOT NULL,
    object_value TEXT NOT NULL,
    datatype TEXT NOT NULL DEFAULT '',
    language TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    UNIQUE(subject, predicate, object_kind, object_value, datatype, language)
);

CREATE INDEX IF NOT EXISTS idx_triples_subject ON triples(subject);
CREATE INDEX IF NOT EXISTS idx_triples_object ON triples(object_kind, object_value);
CREATE INDEX IF NOT EXISTS idx_triples_predicate ON triples(predicate);

-- Provenance: which documents asserted a triple
CREATE TABLE IF NOT EXISTS triple_sources (
    triple_id INTEGER NOT NULL REFERENCES triples(id),
    source_url TEXT NOT NULL,
    PRIMARY KEY (triple_id, source_url)
);

-- Crawl runs
CREATE TABLE IF NOT EXISTS processes (
    pid INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL,
    path_type TEXT NOT NULL,
    current_step INTEGER NOT NULL DEFAULT 0,
    ext_total INTEGER NOT NULL DEFAULT 0,
    ext_done INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processes_status ON processes(status);

-- Append-only step log of a process
CREATE TABLE IF NOT EXISTS process_steps (
    process_id INTEGER NOT NULL REFERENCES processes(pid),
    step_index INTEGER NOT NULL,
    definition TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (process_id, step_index)
);

CREATE TABLE IF NOT EXISTS process_seeds (
    process_id INTEGER NOT NULL REFERENCES processes(pid),
    position INTEGER NOT NULL,
    url TEXT NOT NULL,
    PRIMARY KEY (process_id, position)
);

-- Triples that produced a path in a process
CREATE TABLE IF NOT EXISTS process_triples (
    process_id INTEGER NOT NULL REFERENCES processes(pid),
    triple_id INTEGER NOT NULL REFERENCES triples(id),
    PRIMARY KEY (process_id, triple_id)
);

-- Traversal and endpoint paths; path_key is the content identity within a process
CREATE TABLE IF NOT EXISTS paths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    process_id INTEGER NOT NULL REFERENCES processes(pid),
    path_type TEXT NOT NULL,
    path_key TEXT NOT NULL,
    seed TEXT NOT NULL,
    head_kind TEXT NOT NULL,
    head_value TEXT NOT NULL,
    head_datatype TEXT NOT NULL DEFAULT '',
    head_language TEXT NOT NULL DEFAULT '',
    head_resource TEXT,
    nodes TEXT NOT NULL DEFAULT '[]',
    nodes_count INTEGER NOT NULL DEFAULT 0,
    predicates TEXT NOT NULL DEFAULT '[]',
    predicates_count INTEGER NOT NULL DEFAULT 0,
    seed_paths TEXT NOT NULL DEFAULT '{}',
    frontier INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'active',
    extended_step INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(process_id, path_type, path_key)
);

CREATE INDEX IF NOT EXISTS idx_paths_head ON paths(process_id, head_kind, head_value);
CREATE INDEX IF NOT EXISTS idx_paths_head_resource ON paths(process_id, head_resource);
CREATE INDEX IF NOT EXISTS idx_paths_open ON paths(process_id, status, frontier, extended_step);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
