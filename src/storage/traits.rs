//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types. Every state transition that guards a lease is a
//! conditional update: it reports whether a row actually changed.

use crate::graph::{StoredTriple, Triple, TripleFilter};
use crate::jobs::JobType;
use crate::paths::{DirectionMetric, Path, PathStatus, PathType};
use crate::process::{ExtensionCounter, Process, ProcessDefinition, ProcessStatus, StepDefinition};
use crate::state::{
    DomainRecord, DomainStatus, ResourceOutcome, ResourceRecord, ResourceStatus, RobotsOutcome,
    WarningKind,
};
use crate::storage::{InsertOutcome, UpsertReport};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(i64),

    #[error("Path not found: {0}")]
    PathNotFound(i64),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Per-origin politeness state and leases
pub trait DomainStore {
    /// Creates an unvisited domain if it does not exist yet
    fn ensure_domain(&mut self, origin: &str, now: DateTime<Utc>) -> StorageResult<()>;

    fn get_domain(&self, origin: &str) -> StorageResult<Option<DomainRecord>>;

    /// Transitions an unvisited domain to `checking`
    ///
    /// # Returns
    ///
    /// `true` only if this call took the lease
    fn try_lock_for_robots(
        &mut self,
        origin: &str,
        worker_id: &str,
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Transitions a `ready` domain whose next allowed time has passed to `crawling`
    ///
    /// # Returns
    ///
    /// `true` only if this call took the lease
    fn try_lock_for_crawl(
        &mut self,
        origin: &str,
        worker_id: &str,
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Applies a robots-check result to the domain holding `job_id`
    fn save_robots_outcome(
        &mut self,
        origin: &str,
        job_id: u64,
        outcome: &RobotsOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Records a request issued at `accessed_at`; the next allowed time never moves earlier
    ///
    /// Returns the resulting next allowed time, or `None` for an unknown domain.
    fn advance_next_allowed(
        &mut self,
        origin: &str,
        accessed_at: DateTime<Utc>,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    /// Returns a crawled domain to `ready` once its job finished
    ///
    /// Resources the job left `crawling` become unvisited again.
    fn release_crawl(&mut self, origin: &str, job_id: u64, now: DateTime<Utc>)
        -> StorageResult<bool>;

    /// Returns a leased domain and its resources to a crawlable/checkable state
    fn rollback_job(
        &mut self,
        origin: &str,
        job_type: JobType,
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Marks a crawling domain as unreachable
    fn mark_host_not_found(
        &mut self,
        origin: &str,
        job_id: u64,
        message: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Operator reset: forgets the robots policy and lease of a domain
    fn reset_domain(&mut self, origin: &str, now: DateTime<Utc>) -> StorageResult<bool>;

    fn increment_warning(&mut self, origin: &str, kind: WarningKind) -> StorageResult<()>;

    fn get_warnings(&self, origin: &str) -> StorageResult<BTreeMap<WarningKind, u32>>;

    /// Stamps the counters of a freshly dispatched crawl job
    fn set_job_counters(&mut self, origin: &str, queued: u32, path_heads: u32)
        -> StorageResult<()>;

    /// Counts one finished resource of the current crawl job
    fn record_resource_outcome(&mut self, origin: &str, success: bool) -> StorageResult<()>;

    /// Unvisited domains that host a crawlable head of the process
    ///
    /// Heads of paths already `max_path_length` nodes long cannot grow and
    /// are skipped here and in the other head queries.
    fn robots_candidates(
        &self,
        process_id: i64,
        max_path_length: u32,
        limit: usize,
    ) -> StorageResult<Vec<String>>;

    /// Ready domains past their next allowed time that host an unvisited head
    /// of the process, most heads first
    fn crawl_candidates(
        &self,
        process_id: i64,
        max_path_length: u32,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<String>>;

    /// Highest job id ever stamped on a domain or resource
    fn max_job_id(&self) -> StorageResult<u64>;

    /// Startup sweep: clears leases left behind by a previous run
    ///
    /// Returns the number of domains and resources reset.
    fn reset_interrupted(&mut self, now: DateTime<Utc>) -> StorageResult<(usize, usize)>;

    fn count_domains_by_status(&self) -> StorageResult<HashMap<DomainStatus, u64>>;
}

/// Per-document crawl state
pub trait ResourceStore {
    /// Creates an unvisited resource (and its domain) if it does not exist yet
    fn ensure_resource(&mut self, url: &str, origin: &str, now: DateTime<Utc>)
        -> StorageResult<()>;

    fn get_resource(&self, url: &str) -> StorageResult<Option<ResourceRecord>>;

    /// Unvisited resources of `origin` that are heads of open paths of the
    /// process shorter than `max_path_length`
    fn head_resources(
        &self,
        process_id: i64,
        max_path_length: u32,
        origin: &str,
        limit: usize,
    ) -> StorageResult<Vec<String>>;

    /// Unvisited resources of `origin`, oldest first
    fn unvisited_resources(&self, origin: &str, limit: usize) -> StorageResult<Vec<String>>;

    /// Leases unvisited resources to a job; returns those actually leased
    fn mark_resources_crawling(
        &mut self,
        urls: &[String],
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<String>>;

    /// Applies a crawl result to a resource leased by `job_id`
    fn complete_resource(
        &mut self,
        url: &str,
        job_id: u64,
        outcome: &ResourceOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Fails an unvisited resource without fetching it
    fn fail_unvisited_resource(
        &mut self,
        url: &str,
        outcome: &ResourceOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Resource counts by status, restricted to heads of a process when given
    fn count_resources_by_status(
        &self,
        process_id: Option<i64>,
    ) -> StorageResult<HashMap<ResourceStatus, u64>>;
}

/// Deduplicated fact store
pub trait TripleStore {
    /// Inserts each triple if absent and records `source_url` as an asserting source
    ///
    /// Also creates resource and domain records for every crawlable named node.
    fn upsert_triples(
        &mut self,
        source_url: &str,
        triples: &[Triple],
        now: DateTime<Utc>,
    ) -> StorageResult<UpsertReport>;

    /// Stored triples whose subject or named object is the filter's node
    fn triples_touching(&self, filter: &TripleFilter) -> StorageResult<Vec<StoredTriple>>;

    fn triple_sources(&self, triple_id: i64) -> StorageResult<BTreeSet<String>>;

    fn count_triples(&self) -> StorageResult<u64>;

    /// Distinct subject/object counts per predicate
    fn predicate_metrics(&self) -> StorageResult<BTreeMap<String, DirectionMetric>>;
}

/// Path records of all processes
pub trait PathStore {
    /// Inserts a path unless one with the same identity exists in its process
    fn insert_path(&mut self, path: &Path) -> StorageResult<InsertOutcome>;

    fn get_path(&self, id: i64) -> StorageResult<Option<Path>>;

    fn find_path_by_key(
        &self,
        process_id: i64,
        path_type: PathType,
        key: &str,
    ) -> StorageResult<Option<Path>>;

    /// Persists merged hop counts and the frontier flag of an endpoint path
    fn update_endpoint(
        &mut self,
        id: i64,
        seed_paths: &BTreeMap<String, u32>,
        frontier: bool,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    fn mark_path_deleted(&mut self, id: i64, now: DateTime<Utc>) -> StorageResult<bool>;

    fn set_frontier(&mut self, id: i64, frontier: bool, now: DateTime<Utc>) -> StorageResult<()>;

    fn set_extended_step(&mut self, id: i64, step: usize, now: DateTime<Utc>)
        -> StorageResult<()>;

    /// Open paths of the process whose head is the named node
    fn open_paths_at(&self, process_id: i64, node: &str) -> StorageResult<Vec<Path>>;

    /// Open paths of the process whose head lives in the resource
    fn open_paths_in_resource(&self, process_id: i64, resource: &str)
        -> StorageResult<Vec<Path>>;

    /// Open paths last extended under a step before `step_index`
    fn paths_pending_extension(
        &self,
        process_id: i64,
        step_index: usize,
        limit: usize,
    ) -> StorageResult<Vec<Path>>;

    fn count_paths_pending_extension(&self, process_id: i64, step_index: usize)
        -> StorageResult<u64>;

    fn record_process_triple(&mut self, process_id: i64, triple_id: i64) -> StorageResult<()>;

    fn count_process_triples(&self, process_id: i64) -> StorageResult<u64>;

    fn count_paths_by_status(&self, process_id: i64) -> StorageResult<HashMap<PathStatus, u64>>;

    // ===== Completion =====

    /// Open paths shorter than `max_path_length` whose head resource is still
    /// unvisited or crawling on a domain that is not in error
    fn count_crawlable_heads(&self, process_id: i64, max_path_length: u32)
        -> StorageResult<u64>;

    /// Domains mid robots-check that host a head of an open path
    fn count_checking_domains(&self, process_id: i64) -> StorageResult<u64>;

    /// Resources mid-crawl that are heads of open paths
    fn count_crawling_resources(&self, process_id: i64) -> StorageResult<u64>;
}

/// Crawl runs and their step logs
pub trait ProcessStore {
    fn create_process(
        &mut self,
        definition: &ProcessDefinition,
        now: DateTime<Utc>,
    ) -> StorageResult<i64>;

    fn get_process(&self, pid: i64) -> StorageResult<Option<Process>>;

    /// A process left mid-run by a previous manager, else the oldest queued one
    fn next_process(&self) -> StorageResult<Option<Process>>;

    fn list_processes(&self) -> StorageResult<Vec<Process>>;

    fn set_process_status(
        &mut self,
        pid: i64,
        status: ProcessStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Appends a step and makes it the active one; returns its index
    fn append_step(
        &mut self,
        pid: i64,
        step: &StepDefinition,
        now: DateTime<Utc>,
    ) -> StorageResult<usize>;

    fn set_extension_counter(
        &mut self,
        pid: i64,
        counter: ExtensionCounter,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;
}

/// Trait for storage backend implementations
///
/// This trait bundles all database operations needed by the crawler.
pub trait Storage: DomainStore + ResourceStore + TripleStore + PathStore + ProcessStore {}

impl<T> Storage for T where T: DomainStore + ResourceStore + TripleStore + PathStore + ProcessStore {}
