//! Growing paths from stored triples
//!
//! [`evaluate`] decides what a single triple means for a single path. The
//! [`ExtensionEngine`] applies those decisions against storage, draining an
//! explicit work queue so that every newly created path is immediately offered
//! the triples already known about its head.

use crate::graph::{StoredTriple, Term, Triple};
use crate::paths::{Path, PathContract, PathStatus, PathType, SpawnContext};
use crate::process::StepDefinition;
use crate::storage::{InsertOutcome, Storage, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};

/// Why a triple cannot extend a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The path ends in a literal
    TerminalHead,
    /// Subject and object are the same resource
    Reflexive,
    /// The predicate is the head itself
    PredicateIsHead,
    /// The head is neither subject nor object
    NotAdjacent,
    /// The new head is already part of the path
    Cycle,
    /// Excluded by the step's whitelist or blacklist
    PredicateFiltered,
    /// Followed against the predicate's dominant direction
    AgainstDirection,
}

/// Outcome of offering one triple to one path
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Extend {
        new_head: Term,
        predicate: String,
        /// Subject to object
        forward: bool,
    },
    Discard(DiscardReason),
    /// Would exceed the step's length or predicate limits
    OutOfBounds,
}

/// Decides whether `triple` extends `path` under `step`
pub fn evaluate<P: PathContract + ?Sized>(
    path: &P,
    triple: &Triple,
    step: &StepDefinition,
) -> Verdict {
    let Some(head) = path.head().as_named() else {
        return Verdict::Discard(DiscardReason::TerminalHead);
    };
    if triple.is_reflexive() {
        return Verdict::Discard(DiscardReason::Reflexive);
    }
    if triple.predicate == head {
        return Verdict::Discard(DiscardReason::PredicateIsHead);
    }

    let (new_head, forward) = if triple.subject == head {
        (triple.object.clone(), true)
    } else if triple.object.as_named() == Some(head) {
        (Term::Named(triple.subject.clone()), false)
    } else {
        return Verdict::Discard(DiscardReason::NotAdjacent);
    };

    if path.contains_node(&new_head.node_key()) {
        return Verdict::Discard(DiscardReason::Cycle);
    }
    if !step.predicates.allows(&triple.predicate) {
        return Verdict::Discard(DiscardReason::PredicateFiltered);
    }
    if path.length() + 1 > step.max_path_length || !path.admits_predicate(&triple.predicate, step)
    {
        return Verdict::OutOfBounds;
    }

    if step.follow_direction {
        if let Some(metric) = step.direction_metrics.get(&triple.predicate) {
            let direction = metric.direction(step.upper_threshold, step.lower_threshold);
            if !direction.allows(forward) {
                return Verdict::Discard(DiscardReason::AgainstDirection);
            }
        }
    }

    Verdict::Extend {
        new_head,
        predicate: triple.predicate.clone(),
        forward,
    }
}

/// Counters of one extension run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionReport {
    /// Paths taken from the work queue
    pub processed: usize,
    pub created: usize,
    /// Children that already existed unchanged
    pub duplicates: usize,
    /// Endpoint paths whose hop counts improved
    pub improved: usize,
    pub out_of_bounds: usize,
    pub discarded: usize,
    /// Parents retired after producing children
    pub superseded: usize,
}

impl ExtensionReport {
    pub fn merge(&mut self, other: &ExtensionReport) {
        self.processed += other.processed;
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.improved += other.improved;
        self.out_of_bounds += other.out_of_bounds;
        self.discarded += other.discarded;
        self.superseded += other.superseded;
    }
}

/// Extends the paths of one process under its active step
pub struct ExtensionEngine<'a, S: Storage + ?Sized> {
    storage: &'a mut S,
    process_id: i64,
    step_index: usize,
    step: &'a StepDefinition,
    now: DateTime<Utc>,
}

impl<'a, S: Storage + ?Sized> ExtensionEngine<'a, S> {
    pub fn new(
        storage: &'a mut S,
        process_id: i64,
        step_index: usize,
        step: &'a StepDefinition,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            storage,
            process_id,
            step_index,
            step,
            now,
        }
    }

    fn ctx(&self) -> SpawnContext {
        SpawnContext::new(self.step_index, self.step, self.now)
    }

    /// Creates the seed paths of the process and extends the new ones
    ///
    /// Seeds that already have a path are left to the re-extension pass.
    pub fn register_seeds(
        &mut self,
        path_type: PathType,
        seeds: &[String],
    ) -> StorageResult<ExtensionReport> {
        let ctx = self.ctx();
        let mut created = Vec::new();

        for seed in seeds {
            let path = Path::new_seed(path_type, self.process_id, seed, &ctx);
            if let InsertOutcome::Created(id) = self.storage.insert_path(&path)? {
                tracing::debug!("Created seed path {} for {}", id, seed);
                if let Some(path) = self.storage.get_path(id)? {
                    created.push(path);
                }
            }
        }

        let count = created.len();
        let mut report = self.extend_paths(created)?;
        report.created += count;
        Ok(report)
    }

    /// Offers every path the stored triples touching its head, then drains
    /// the paths this creates
    pub fn extend_paths(&mut self, paths: Vec<Path>) -> StorageResult<ExtensionReport> {
        let mut queue: VecDeque<Path> = paths.into();
        let mut report = ExtensionReport::default();

        while let Some(path) = queue.pop_front() {
            report.processed += 1;
            let candidates = match path.existing_triples_filter() {
                Some(filter) => self.storage.triples_touching(&filter)?,
                None => Vec::new(),
            };
            self.extend(&path, &candidates, &mut queue, &mut report)?;
        }

        Ok(report)
    }

    /// Offers `candidates` to one path; new children go to `queue`
    pub fn extend(
        &mut self,
        path: &Path,
        candidates: &[StoredTriple],
        queue: &mut VecDeque<Path>,
        report: &mut ExtensionReport,
    ) -> StorageResult<()> {
        let Some(id) = path.id() else {
            return Ok(());
        };
        if !path.is_open() {
            return Ok(());
        }

        let ctx = self.ctx();
        let mut seen = HashSet::new();
        let mut produced = false;

        for stored in candidates {
            match evaluate(path, &stored.triple, self.step) {
                Verdict::Discard(_) => report.discarded += 1,
                Verdict::OutOfBounds => report.out_of_bounds += 1,
                Verdict::Extend {
                    new_head,
                    predicate,
                    ..
                } => {
                    produced = true;
                    self.storage
                        .record_process_triple(self.process_id, stored.id)?;
                    if !seen.insert((new_head.node_key(), predicate.clone())) {
                        continue;
                    }
                    let child = path.spawn(new_head, &predicate, &ctx);
                    self.store_child(child, queue, report)?;
                }
            }
        }

        if produced && path.head_is_settled() {
            match path {
                Path::Traversal(_) => {
                    if self.storage.mark_path_deleted(id, self.now)? {
                        report.superseded += 1;
                    }
                }
                Path::Endpoint(_) => {
                    self.storage.set_frontier(id, false, self.now)?;
                    report.superseded += 1;
                }
            }
        }

        if path.meta().extended_step < self.step_index {
            self.storage.set_extended_step(id, self.step_index, self.now)?;
        }
        Ok(())
    }

    fn store_child(
        &mut self,
        child: Path,
        queue: &mut VecDeque<Path>,
        report: &mut ExtensionReport,
    ) -> StorageResult<()> {
        if let Path::Endpoint(endpoint) = &child {
            let existing = self.storage.find_path_by_key(
                self.process_id,
                PathType::Endpoint,
                &endpoint.identity_key(),
            )?;
            if let Some(Path::Endpoint(mut existing)) = existing {
                let Some(existing_id) = existing.meta.id else {
                    return Ok(());
                };
                if !existing.merge_seed_paths(&endpoint.seed_paths) {
                    report.duplicates += 1;
                    return Ok(());
                }

                let frontier =
                    !existing.head.is_literal() && existing.meta.status == PathStatus::Active;
                self.storage
                    .update_endpoint(existing_id, &existing.seed_paths, frontier, self.now)?;
                existing.frontier = frontier;
                report.improved += 1;
                if frontier {
                    queue.push_back(Path::Endpoint(existing));
                }
                return Ok(());
            }
        }

        match self.storage.insert_path(&child)? {
            InsertOutcome::Created(id) => {
                report.created += 1;
                if !child.is_terminal() {
                    if let Some(stored) = self.storage.get_path(id)? {
                        queue.push_back(stored);
                    }
                }
            }
            InsertOutcome::Existing(_) => report.duplicates += 1,
        }
        Ok(())
    }
}
