//! Orchestrator: the manager's dispatch loop
//!
//! This module reacts to three sources:
//! - The poll timer, which broadcasts capacity requests and checks for completion
//! - Worker frames from the message bus
//! - Expiry events from the job registry
//!
//! All of them are handled on a single task. Storage is locked per step and
//! never held across a registry call.

use crate::bus::{
    decode_worker_frame, Capacity, CrawlDomain, FetchError, FetchErrorKind, Frame, JobDone,
    JobSpec, ManagerEndpoint, ManagerMessage, Outbound, ResourceDone, ResultStatus,
    WorkerMessage,
};
use crate::config::Config;
use crate::crawler::gate::{DomainGate, LockedDomain, RobotsErrorClass};
use crate::jobs::{JobIdMinter, JobRegistry, JobTimeouts, JobType, RegistryEvent};
use crate::process::{CompletionNotifier, Process, ProcessController, ProcessStatus};
use crate::state::{ResourceOutcome, WarningKind};
use crate::storage::{self, DomainStore, ResourceStore, SharedStorage, TripleStore};
use crate::SumiError;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// What the loop should do after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    /// No process left and nothing outstanding
    Idle,
}

/// Selects the heads of a process that can still grow
#[derive(Debug, Clone, Copy)]
struct HeadBound {
    pid: i64,
    max_path_length: u32,
}

/// The manager: leases domains to workers and routes their results
pub struct Orchestrator {
    config: Arc<Config>,
    storage: SharedStorage,
    gate: DomainGate,
    registry: JobRegistry,
    controller: ProcessController,
    endpoint: ManagerEndpoint,
    outbound: Outbound,
    events: mpsc::UnboundedReceiver<RegistryEvent>,
    process: Option<Process>,
    idle_polls: u32,
    dispatched_since_poll: bool,
}

impl Orchestrator {
    /// Creates the orchestrator and runs the startup sweep
    ///
    /// Leases left behind by a previous run are reset, and job ids continue
    /// after the highest one found in storage.
    pub fn new(
        config: Config,
        storage: SharedStorage,
        endpoint: ManagerEndpoint,
        notifier: Box<dyn CompletionNotifier>,
    ) -> Result<Self, SumiError> {
        let last_job_id = {
            let mut guard = storage::lock(&storage)?;
            let (domains, resources) = guard.reset_interrupted(Utc::now())?;
            if domains > 0 || resources > 0 {
                tracing::info!(
                    "Startup sweep reset {} domain(s) and {} resource(s) left leased",
                    domains,
                    resources
                );
            }
            guard.max_job_id()?
        };

        let minter = Arc::new(JobIdMinter::starting_after(last_job_id));
        let gate = DomainGate::new(
            config.politeness.clone(),
            config.user_agent.crawler_name.clone(),
            minter,
        );

        let (events_tx, events) = mpsc::unbounded_channel();
        let registry = JobRegistry::new(storage.clone(), JobTimeouts::from_config(&config), events_tx);
        let controller = ProcessController::new(storage.clone(), notifier);
        let outbound = endpoint.outbound();

        Ok(Self {
            config: Arc::new(config),
            storage,
            gate,
            registry,
            controller,
            endpoint,
            outbound,
            events,
            process: None,
            idle_polls: 0,
            dispatched_since_poll: false,
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn current_process(&self) -> Option<&Process> {
        self.process.as_ref()
    }

    /// Runs the dispatch loop until `shutdown` resolves
    ///
    /// With `exit_when_idle` the loop also ends once no process is left and
    /// no lease is outstanding.
    pub async fn run<F>(&mut self, shutdown: F, exit_when_idle: bool) -> Result<(), SumiError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.manager.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Manager started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.poll()?;
                    if outcome == PollOutcome::Idle && exit_when_idle {
                        tracing::info!("No work left, stopping");
                        break;
                    }
                }
                frame = self.endpoint.recv_frame() => {
                    let Some(frame) = frame else {
                        tracing::info!("Message bus closed");
                        break;
                    };
                    self.handle_frame(frame);
                }
                Some(event) = self.events.recv() => {
                    self.handle_event(event)?;
                }
            }
        }

        let outstanding = self.registry.outstanding()?;
        if outstanding > 0 {
            tracing::info!(
                "{} lease(s) outstanding at shutdown; the next start resets them",
                outstanding
            );
        }
        Ok(())
    }

    /// One tick of the poll timer
    pub fn poll(&mut self) -> Result<PollOutcome, SumiError> {
        self.sync_process()?;

        let outstanding = self.registry.outstanding()?;
        if outstanding == 0 && !self.dispatched_since_poll {
            self.idle_polls += 1;
        } else {
            self.idle_polls = 0;
        }
        self.dispatched_since_poll = false;

        if self.idle_polls >= self.config.manager.idle_polls_before_check {
            self.idle_polls = 0;
            self.check_completion()?;
        }

        if self.process.is_none() {
            self.process = self.controller.start_next()?;
        }

        if self.process.is_none() && outstanding == 0 {
            return Ok(PollOutcome::Idle);
        }

        let reached = self.outbound.broadcast(&ManagerMessage::AskCurCap)?;
        tracing::debug!(
            "Asked {} worker(s) for capacity ({} robots checks, {} crawls outstanding)",
            reached,
            self.registry.outstanding_for(JobType::RobotsCheck)?,
            self.registry.outstanding_for(JobType::DomainCrawl)?
        );
        Ok(PollOutcome::Continue)
    }

    /// Picks up steps added to the current process from outside the loop
    fn sync_process(&mut self) -> Result<(), SumiError> {
        let Some(current) = &self.process else {
            return Ok(());
        };

        let stored = self.controller.refresh(current.pid)?;
        match stored.status {
            ProcessStatus::Extending | ProcessStatus::Queued => {
                tracing::info!("Process {} has a new step, re-extending", stored.pid);
                self.process = Some(self.controller.start(stored)?);
            }
            ProcessStatus::Done | ProcessStatus::Error => {
                self.process = None;
            }
            ProcessStatus::Running => {}
        }
        Ok(())
    }

    fn check_completion(&mut self) -> Result<(), SumiError> {
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };
        if self.controller.is_done(process)? {
            self.controller.complete(process)?;
            self.process = None;
        }
        Ok(())
    }

    /// Decodes and routes one worker frame; failures are logged
    pub fn handle_frame(&mut self, frame: Frame) {
        let message = match decode_worker_frame(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Bad frame from worker {}: {}", frame.worker_id, e);
                return;
            }
        };
        if let Err(e) = self.handle_message(&frame.worker_id, message) {
            tracing::error!("Error handling message from {}: {}", frame.worker_id, e);
        }
    }

    pub fn handle_message(
        &mut self,
        worker_id: &str,
        message: WorkerMessage,
    ) -> Result<(), SumiError> {
        match message {
            WorkerMessage::RepCurCap(capacity) => self.dispatch(worker_id, capacity),
            WorkerMessage::JobDone(done) => self.on_job_done(done),
            WorkerMessage::ResourceDone(done) => self.on_resource_done(done),
            WorkerMessage::NoCapacity { job_id } => {
                if let Some(info) = self.registry.release_refused(job_id)? {
                    tracing::debug!("Worker {} had no capacity for job {} ({})", worker_id, job_id, info.origin);
                }
                Ok(())
            }
            WorkerMessage::AlreadyBeingDone { job_id } => {
                if let Some(info) = self.registry.release_refused(job_id)? {
                    tracing::warn!(
                        "Worker {} already works on {}; job {} released",
                        worker_id,
                        info.origin,
                        job_id
                    );
                }
                Ok(())
            }
            WorkerMessage::Shutdown { ongoing_jobs } => {
                let cancelled = self.registry.cancel_worker_jobs(worker_id)?;
                tracing::info!(
                    "Worker {} shut down ({} job(s) reported, {} lease(s) reclaimed)",
                    worker_id,
                    ongoing_jobs.len(),
                    cancelled.len()
                );
                self.outbound.disconnect(worker_id)
            }
        }
    }

    pub fn handle_event(&mut self, event: RegistryEvent) -> Result<(), SumiError> {
        match event {
            RegistryEvent::TimedOut(info) => {
                self.outbound.broadcast(&ManagerMessage::JobTimeout {
                    origin: info.origin,
                    job_type: info.job_type,
                })?;
                Ok(())
            }
            RegistryEvent::Fault(message) => Err(SumiError::InvariantViolation(message)),
        }
    }

    // ===== Dispatch =====

    fn dispatch(&mut self, worker_id: &str, capacity: Capacity) -> Result<(), SumiError> {
        let Some(process) = self.process.as_ref() else {
            return Ok(());
        };
        if process.status != ProcessStatus::Running {
            return Ok(());
        }
        let Some(step) = process.active_step() else {
            return Ok(());
        };
        let bound = HeadBound {
            pid: process.pid,
            max_path_length: step.max_path_length,
        };

        if capacity.robots_check.capacity > 0 {
            self.dispatch_robots_checks(worker_id, bound, capacity.robots_check.capacity)?;
        }
        if capacity.domain_crawl.capacity > 0 {
            let per_domain = capacity
                .domain_crawl
                .resources_per_domain
                .min(self.config.manager.resources_per_domain)
                .max(1);
            self.dispatch_crawls(worker_id, bound, capacity.domain_crawl.capacity, per_domain)?;
        }
        Ok(())
    }

    fn dispatch_robots_checks(
        &mut self,
        worker_id: &str,
        bound: HeadBound,
        capacity: u32,
    ) -> Result<(), SumiError> {
        let locked = {
            let mut guard = storage::lock(&self.storage)?;
            let candidates =
                guard.robots_candidates(bound.pid, bound.max_path_length, capacity as usize)?;
            self.gate
                .lock_for_robots_check(&mut *guard, worker_id, &candidates, Utc::now())?
        };

        for LockedDomain { origin, job_id } in locked {
            let job = JobSpec::RobotsCheck {
                job_id,
                origin: origin.clone(),
            };
            self.send_job(worker_id, &origin, JobType::RobotsCheck, job)?;
        }
        Ok(())
    }

    fn dispatch_crawls(
        &mut self,
        worker_id: &str,
        bound: HeadBound,
        capacity: u32,
        per_domain: u32,
    ) -> Result<(), SumiError> {
        let now = Utc::now();
        let mut jobs = Vec::new();
        {
            let mut guard = storage::lock(&self.storage)?;
            let candidates = guard.crawl_candidates(
                bound.pid,
                bound.max_path_length,
                now,
                capacity as usize,
            )?;
            let locked = self
                .gate
                .lock_for_crawl(&mut *guard, worker_id, &candidates, now)?;

            for LockedDomain { origin, job_id } in locked {
                let limit = per_domain as usize;
                let heads =
                    guard.head_resources(bound.pid, bound.max_path_length, &origin, limit)?;
                let mut resources = heads.clone();
                if resources.len() < limit {
                    for url in guard.unvisited_resources(&origin, limit)? {
                        if resources.len() >= limit {
                            break;
                        }
                        if !resources.contains(&url) {
                            resources.push(url);
                        }
                    }
                }

                let Some(domain) = guard.get_domain(&origin)? else {
                    continue;
                };
                let mut allowed = Vec::with_capacity(resources.len());
                for url in resources {
                    if self.gate.is_allowed(&domain, &url) {
                        allowed.push(url);
                    } else {
                        let outcome =
                            ResourceOutcome::error("robots_disallowed", "disallowed by robots.txt");
                        guard.fail_unvisited_resource(&url, &outcome, now)?;
                        guard.increment_warning(&origin, WarningKind::RobotsDisallowed)?;
                        tracing::debug!("{} disallowed by robots.txt", url);
                    }
                }

                let leased = guard.mark_resources_crawling(&allowed, job_id, now)?;
                if leased.is_empty() {
                    self.gate.release_crawl(&mut *guard, &origin, job_id, now)?;
                    continue;
                }

                let path_heads = heads.iter().filter(|url| leased.contains(url)).count();
                guard.set_job_counters(&origin, leased.len() as u32, path_heads as u32)?;
                jobs.push(JobSpec::DomainCrawl {
                    job_id,
                    domain: CrawlDomain {
                        origin,
                        crawl_delay_ms: domain.crawl_delay_ms,
                    },
                    resources: leased,
                });
            }
        }

        for job in jobs {
            let origin = job.origin().to_string();
            self.send_job(worker_id, &origin, JobType::DomainCrawl, job)?;
        }
        Ok(())
    }

    /// Registers the lease of a locked domain and hands the job to the worker
    fn send_job(
        &mut self,
        worker_id: &str,
        origin: &str,
        job_type: JobType,
        job: JobSpec,
    ) -> Result<(), SumiError> {
        let job_id = job.job_id();
        match self.registry.register(origin, job_type, job_id, worker_id) {
            Ok(()) => {}
            Err(SumiError::JobAlreadyLeased { .. }) => return Ok(()),
            Err(e) => return Err(e),
        }

        if let Err(e) = self.outbound.send_to(worker_id, &ManagerMessage::DoJob(job)) {
            tracing::warn!("Could not send job {} to {}: {}", job_id, worker_id, e);
            self.registry.release_refused(job_id)?;
            return Ok(());
        }

        tracing::debug!("Sent {} job {} for {} to {}", job_type, job_id, origin, worker_id);
        self.dispatched_since_poll = true;
        Ok(())
    }

    // ===== Results =====

    fn on_job_done(&mut self, done: JobDone) -> Result<(), SumiError> {
        if !self.registry.begin_save(&done.origin, done.job_id)? {
            tracing::debug!("Discarding late result of job {} for {}", done.job_id, done.origin);
            return Ok(());
        }

        let saved = self.save_job_done(&done);
        self.registry.end_save(&done.origin, done.job_id)?;
        self.registry.finish(&done.origin, done.job_id)?;
        self.dispatched_since_poll = true;
        saved
    }

    fn save_job_done(&self, done: &JobDone) -> Result<(), SumiError> {
        let now = Utc::now();
        let mut guard = storage::lock(&self.storage)?;
        let origin = done.origin.as_str();

        match (done.job_type, done.status) {
            (JobType::RobotsCheck, ResultStatus::Ok) => {
                let text = done
                    .details
                    .as_ref()
                    .and_then(|d| d.robots_txt.as_deref())
                    .unwrap_or("");
                self.gate
                    .save_robots_ok(&mut *guard, origin, done.job_id, text, now)?;
            }
            (JobType::RobotsCheck, ResultStatus::Error) => {
                let err = reported_error(done.err.as_ref());
                let (class, _) =
                    self.gate
                        .save_robots_error(&mut *guard, origin, done.job_id, &err, now)?;
                if class != RobotsErrorClass::HostNotFound {
                    tracing::debug!("robots.txt of {} unavailable: {}", origin, err);
                }
            }
            (JobType::DomainCrawl, ResultStatus::Ok) => {
                self.gate
                    .release_crawl(&mut *guard, origin, done.job_id, now)?;
            }
            (JobType::DomainCrawl, ResultStatus::Error) => {
                let err = reported_error(done.err.as_ref());
                if err.kind == FetchErrorKind::HostNotFound {
                    self.gate.mark_host_not_found(
                        &mut *guard,
                        origin,
                        done.job_id,
                        &err.to_string(),
                        now,
                    )?;
                } else {
                    guard.rollback_job(origin, JobType::DomainCrawl, done.job_id, now)?;
                    tracing::warn!("Crawl job {} for {} failed: {}", done.job_id, origin, err);
                }
                guard.increment_warning(origin, err.warning())?;
            }
        }
        Ok(())
    }

    fn on_resource_done(&mut self, done: ResourceDone) -> Result<(), SumiError> {
        if !self.registry.begin_save(&done.origin, done.job_id)? {
            tracing::debug!("Discarding late result for {} (job {})", done.url, done.job_id);
            return Ok(());
        }
        self.registry.postpone_timeout(&done.origin, done.job_id)?;

        let saved = self.save_resource_done(&done);
        self.registry.end_save(&done.origin, done.job_id)?;
        self.dispatched_since_poll = true;

        let Some(stored) = saved? else {
            return Ok(());
        };
        if let Some(process) = &self.process {
            self.controller
                .on_resource_crawled(process, &done.url, &stored)?;
        }
        Ok(())
    }

    /// Applies one resource result; returns the stored triples of a success
    fn save_resource_done(
        &self,
        done: &ResourceDone,
    ) -> Result<Option<Vec<crate::graph::StoredTriple>>, SumiError> {
        let now = Utc::now();
        let mut guard = storage::lock(&self.storage)?;

        if let Some(fetched_at) = done.fetched_at {
            self.gate
                .set_next_crawl_allowed(&mut *guard, &done.origin, fetched_at)?;
        }

        match done.status {
            ResultStatus::Ok => {
                let report = guard.upsert_triples(&done.url, &done.triples, now)?;
                let outcome = ResourceOutcome::done(report.stored.len() as u32);
                if !guard.complete_resource(&done.url, done.job_id, &outcome, now)? {
                    tracing::debug!("{} was not leased to job {}", done.url, done.job_id);
                }
                guard.record_resource_outcome(&done.origin, true)?;
                tracing::debug!(
                    "{}: {} triples, {} new",
                    done.url,
                    report.stored.len(),
                    report.inserted
                );
                Ok(Some(report.stored))
            }
            ResultStatus::Error => {
                let err = reported_error(done.err.as_ref());
                let outcome = ResourceOutcome::error(err.kind_str(), err.message.clone());
                guard.complete_resource(&done.url, done.job_id, &outcome, now)?;
                guard.record_resource_outcome(&done.origin, false)?;
                guard.increment_warning(&done.origin, err.warning())?;
                tracing::debug!("{} failed: {}", done.url, err);
                Ok(None)
            }
        }
    }
}

fn reported_error(err: Option<&FetchError>) -> FetchError {
    err.cloned()
        .unwrap_or_else(|| FetchError::new(FetchErrorKind::Transport, "worker reported no error"))
}
