//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! per-process statistics from the storage layer.

use crate::paths::PathStatus;
use crate::process::{Process, ProcessStatus};
use crate::state::{DomainStatus, ResourceStatus};
use crate::storage::Storage;
use crate::SumiError;
use std::collections::HashMap;

/// Statistics of one crawl process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStatistics {
    pub pid: i64,
    pub status: ProcessStatus,

    /// Count of paths by status
    pub paths_by_status: HashMap<PathStatus, u64>,

    /// Triples that produced a path in this process
    pub process_triples: u64,

    /// Count of head resources by crawl status
    pub resources_by_status: HashMap<ResourceStatus, u64>,

    /// Count of all known domains by status
    pub domains_by_status: HashMap<DomainStatus, u64>,

    /// Size of the shared triple store
    pub total_triples: u64,
}

impl ProcessStatistics {
    pub fn active_paths(&self) -> u64 {
        self.paths_by_status
            .get(&PathStatus::Active)
            .copied()
            .unwrap_or(0)
    }
}

/// Loads statistics of a process from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `process` - The process to describe
///
/// # Returns
///
/// * `Ok(ProcessStatistics)` - Successfully loaded statistics
/// * `Err(SumiError)` - Failed to query statistics
pub fn load_statistics<S: Storage + ?Sized>(
    storage: &S,
    process: &Process,
) -> Result<ProcessStatistics, SumiError> {
    Ok(ProcessStatistics {
        pid: process.pid,
        status: process.status,
        paths_by_status: storage.count_paths_by_status(process.pid)?,
        process_triples: storage.count_process_triples(process.pid)?,
        resources_by_status: storage.count_resources_by_status(Some(process.pid))?,
        domains_by_status: storage.count_domains_by_status()?,
        total_triples: storage.count_triples()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &ProcessStatistics) {
    println!("=== Process {} ({}) ===\n", stats.pid, stats.status.to_db_string());

    println!("Paths:");
    for status in [PathStatus::Active, PathStatus::Deleted] {
        println!(
            "  {}: {}",
            status.to_db_string(),
            stats.paths_by_status.get(&status).unwrap_or(&0)
        );
    }
    println!("  triples used: {}", stats.process_triples);
    println!();

    println!("Head resources:");
    let total_resources: u64 = stats.resources_by_status.values().sum();
    for status in ResourceStatus::all_states() {
        let count = stats.resources_by_status.get(&status).unwrap_or(&0);
        let percentage = if total_resources > 0 {
            (*count as f64 / total_resources as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    println!("Domains:");
    for status in DomainStatus::all_states() {
        if let Some(count) = stats.domains_by_status.get(&status) {
            println!("  {}: {}", status.to_db_string(), count);
        }
    }
    println!();

    println!("Triple store: {} triples", stats.total_triples);
}
