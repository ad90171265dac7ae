//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Domain leases and politeness state
//! - Resource crawl state
//! - The deduplicated triple store with provenance
//! - Paths and crawl processes

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{
    DomainStore, PathStore, ProcessStore, ResourceStore, Storage, StorageError, StorageResult,
    TripleStore,
};

use crate::graph::StoredTriple;
use crate::SumiError;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared by the dispatch loop and the lease timers
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(SumiError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, SumiError> {
    SqliteStorage::new(path)
}

/// Wraps a storage backend for sharing between tasks
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks shared storage, mapping a poisoned lock to a storage error
pub fn lock(storage: &SharedStorage) -> Result<MutexGuard<'_, SqliteStorage>, SumiError> {
    storage
        .lock()
        .map_err(|e| SumiError::Storage(format!("storage lock poisoned: {}", e)))
}

/// Result of inserting a path that may already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(i64),
    Existing(i64),
}

impl InsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Created(id) | Self::Existing(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of a triple upsert batch
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    /// Every triple of the deduplicated batch with its stored id
    pub stored: Vec<StoredTriple>,
    /// How many of them were new
    pub inserted: usize,
}
