//! Process lifecycle: queued → extending → running → done | error

use crate::config::{validate_process_definition, validate_step_definition};
use crate::graph::StoredTriple;
use crate::output::load_statistics;
use crate::paths::{ExtensionEngine, ExtensionReport, Path};
use crate::process::{
    CompletionNotifier, ExtensionCounter, Process, ProcessDefinition, ProcessStatus,
    StepDefinition,
};
use crate::storage::{self, PathStore, ProcessStore, SharedStorage, TripleStore};
use crate::SumiError;
use chrono::Utc;
use std::collections::BTreeSet;

/// Paths re-offered per storage lock during the extending phase
const EXTENSION_BATCH: usize = 100;

/// Drives processes through their lifecycle
pub struct ProcessController {
    storage: SharedStorage,
    notifier: Box<dyn CompletionNotifier>,
}

impl ProcessController {
    pub fn new(storage: SharedStorage, notifier: Box<dyn CompletionNotifier>) -> Self {
        Self { storage, notifier }
    }

    /// Validates and queues a new process
    pub fn create_process(&self, definition: &ProcessDefinition) -> Result<i64, SumiError> {
        validate_process_definition(definition)?;
        let pid = storage::lock(&self.storage)?.create_process(definition, Utc::now())?;
        tracing::info!(
            "Queued process {} ({} seeds, {} steps)",
            pid,
            definition.seeds.len(),
            definition.steps.len()
        );
        Ok(pid)
    }

    /// Appends a step and makes it active
    ///
    /// A running process goes back to `extending`; a finished one is queued
    /// again.
    pub fn add_step(&self, pid: i64, step: &StepDefinition) -> Result<usize, SumiError> {
        validate_step_definition(step)?;
        let now = Utc::now();
        let mut storage = storage::lock(&self.storage)?;

        let process = storage
            .get_process(pid)?
            .ok_or(SumiError::ProcessNotFound(pid))?;
        let index = storage.append_step(pid, step, now)?;

        let status = match process.status {
            ProcessStatus::Running => ProcessStatus::Extending,
            ProcessStatus::Done | ProcessStatus::Error => ProcessStatus::Queued,
            other => other,
        };
        storage.set_process_status(pid, status, None, now)?;

        tracing::info!("Process {} now uses step {} ({})", pid, index, status.to_db_string());
        Ok(index)
    }

    /// Reloads a process from storage
    pub fn refresh(&self, pid: i64) -> Result<Process, SumiError> {
        storage::lock(&self.storage)?
            .get_process(pid)?
            .ok_or(SumiError::ProcessNotFound(pid))
    }

    /// Picks the next process to work on and brings it to `running`
    ///
    /// Processes that fail to start are marked `error` and skipped.
    pub fn start_next(&self) -> Result<Option<Process>, SumiError> {
        loop {
            let next = storage::lock(&self.storage)?.next_process()?;
            let Some(process) = next else {
                return Ok(None);
            };

            let pid = process.pid;
            match self.start(process) {
                Ok(process) => return Ok(Some(process)),
                Err(e) => {
                    tracing::error!("Process {} failed to start: {}", pid, e);
                    storage::lock(&self.storage)?.set_process_status(
                        pid,
                        ProcessStatus::Error,
                        Some(&e.to_string()),
                        Utc::now(),
                    )?;
                }
            }
        }
    }

    /// Runs the extending phase of a process and marks it `running`
    pub fn start(&self, process: Process) -> Result<Process, SumiError> {
        let pid = process.pid;
        storage::lock(&self.storage)?.set_process_status(
            pid,
            ProcessStatus::Extending,
            None,
            Utc::now(),
        )?;

        let mut process = self.prepare(process)?;
        process.status = ProcessStatus::Extending;
        tracing::info!(
            "Process {} extending under step {}",
            pid,
            process.current_step
        );

        let report = self.extend_pending(&mut process)?;
        tracing::info!(
            "Process {} extended: {} paths offered, {} created, {} out of bounds",
            pid,
            report.processed,
            report.created,
            report.out_of_bounds
        );

        storage::lock(&self.storage)?.set_process_status(
            pid,
            ProcessStatus::Running,
            None,
            Utc::now(),
        )?;
        process.status = ProcessStatus::Running;
        Ok(process)
    }

    /// Fills in direction metrics of the active step from the triple store
    /// when the step follows directions without giving any
    fn prepare(&self, mut process: Process) -> Result<Process, SumiError> {
        let current = process.current_step;
        let Some(step) = process.steps.get_mut(current) else {
            return Err(SumiError::InvariantViolation(format!(
                "process {} has no step {}",
                process.pid, current
            )));
        };

        if step.follow_direction && step.direction_metrics.is_empty() {
            step.direction_metrics = storage::lock(&self.storage)?.predicate_metrics()?;
            tracing::debug!(
                "Computed direction metrics for {} predicates",
                step.direction_metrics.len()
            );
        }
        Ok(process)
    }

    fn active_step(process: &Process) -> Result<&StepDefinition, SumiError> {
        process.active_step().ok_or_else(|| {
            SumiError::InvariantViolation(format!(
                "process {} has no step {}",
                process.pid, process.current_step
            ))
        })
    }

    /// Registers seeds, then re-offers every open path last extended under
    /// an older step
    fn extend_pending(&self, process: &mut Process) -> Result<ExtensionReport, SumiError> {
        let step = Self::active_step(process)?.clone();
        let step_index = process.current_step;
        let mut report = ExtensionReport::default();

        {
            let mut guard = storage::lock(&self.storage)?;
            let seeds = ExtensionEngine::new(&mut *guard, process.pid, step_index, &step, Utc::now())
                .register_seeds(process.path_type, &process.seeds)?;
            report.merge(&seeds);
        }

        let total = storage::lock(&self.storage)?
            .count_paths_pending_extension(process.pid, step_index)?;
        let mut counter = ExtensionCounter { total, done: 0 };
        storage::lock(&self.storage)?.set_extension_counter(process.pid, counter, Utc::now())?;

        loop {
            let mut guard = storage::lock(&self.storage)?;
            let batch = guard.paths_pending_extension(process.pid, step_index, EXTENSION_BATCH)?;
            if batch.is_empty() {
                break;
            }

            let size = batch.len() as u64;
            let batch_report =
                ExtensionEngine::new(&mut *guard, process.pid, step_index, &step, Utc::now())
                    .extend_paths(batch)?;
            report.merge(&batch_report);

            counter.done += size;
            guard.set_extension_counter(process.pid, counter, Utc::now())?;
        }

        process.extension = counter;
        Ok(report)
    }

    /// Extends the paths affected by a crawled resource
    ///
    /// Paths whose head lives in the resource are re-offered everything known
    /// about their head, and so are paths ending at any named node of the new
    /// triples.
    pub fn on_resource_crawled(
        &self,
        process: &Process,
        resource: &str,
        stored: &[StoredTriple],
    ) -> Result<ExtensionReport, SumiError> {
        let step = Self::active_step(process)?;
        let mut guard = storage::lock(&self.storage)?;

        let mut seen = BTreeSet::new();
        let mut affected: Vec<Path> = Vec::new();
        let mut collect = |paths: Vec<Path>| {
            for path in paths {
                if let Some(id) = path.id() {
                    if seen.insert(id) {
                        affected.push(path);
                    }
                }
            }
        };

        collect(guard.open_paths_in_resource(process.pid, resource)?);
        let nodes: BTreeSet<&str> = stored.iter().flat_map(|t| t.triple.nodes()).collect();
        for node in nodes {
            collect(guard.open_paths_at(process.pid, node)?);
        }

        if affected.is_empty() {
            return Ok(ExtensionReport::default());
        }

        let report = ExtensionEngine::new(
            &mut *guard,
            process.pid,
            process.current_step,
            step,
            Utc::now(),
        )
        .extend_paths(affected)?;

        tracing::debug!(
            "Resource {} extended process {}: {} created, {} superseded",
            resource,
            process.pid,
            report.created,
            report.superseded
        );
        Ok(report)
    }

    /// True when nothing tied to an open path of the process can still change
    ///
    /// Paths already as long as the active step allows do not count.
    pub fn is_done(&self, process: &Process) -> Result<bool, SumiError> {
        let max_path_length = Self::active_step(process)?.max_path_length;
        let guard = storage::lock(&self.storage)?;
        Ok(guard.count_crawlable_heads(process.pid, max_path_length)? == 0
            && guard.count_checking_domains(process.pid)? == 0
            && guard.count_crawling_resources(process.pid)? == 0)
    }

    /// Marks a process `done` and notifies the completion notifier
    pub fn complete(&self, process: &mut Process) -> Result<(), SumiError> {
        let stats = {
            let mut guard = storage::lock(&self.storage)?;
            guard.set_process_status(process.pid, ProcessStatus::Done, None, Utc::now())?;
            process.status = ProcessStatus::Done;
            load_statistics(&*guard, process)?
        };

        tracing::info!("Process {} complete", process.pid);
        self.notifier.process_done(process, &stats);
        Ok(())
    }
}
