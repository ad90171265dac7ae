//! Local worker: executes robots checks and domain crawls sent over the bus
//!
//! A worker runs each job on its own task. Within a domain crawl resources
//! are fetched one after the other, waiting the domain's crawl delay between
//! requests; different domains proceed in parallel.

mod fetcher;
mod ntriples;

pub use fetcher::{build_http_client, classify_error, fetch_document, fetch_robots, FetchedDocument};
pub use ntriples::{accept_header, parser_for, NTriplesParser, ParseError, RdfParser};

use crate::bus::{
    Capacity, CrawlCapacity, FetchError, FetchErrorKind, JobDetails, JobDone, JobSpec,
    ManagerMessage, ResourceDone, ResultStatus, RobotsCapacity, WorkerEndpoint, WorkerMessage,
    WorkerSender,
};
use crate::config::{UserAgentConfig, WorkerConfig};
use crate::jobs::JobType;
use crate::SumiError;
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct RunningJob {
    origin: String,
    job_type: JobType,
    handle: JoinHandle<()>,
}

/// Everything a job task needs
struct JobContext {
    client: Client,
    parsers: Arc<Vec<Box<dyn RdfParser>>>,
    accept: String,
    sender: WorkerSender,
}

pub struct LocalWorker {
    endpoint: WorkerEndpoint,
    config: WorkerConfig,
    context: Arc<JobContext>,
    jobs: HashMap<u64, RunningJob>,
    finished_tx: mpsc::UnboundedSender<u64>,
    finished_rx: mpsc::UnboundedReceiver<u64>,
}

impl LocalWorker {
    /// Creates a worker with the built-in N-Triples parser
    pub fn new(
        endpoint: WorkerEndpoint,
        user_agent: &UserAgentConfig,
        config: WorkerConfig,
    ) -> Result<Self, SumiError> {
        Self::with_parsers(endpoint, user_agent, config, vec![Box::new(NTriplesParser)])
    }

    pub fn with_parsers(
        endpoint: WorkerEndpoint,
        user_agent: &UserAgentConfig,
        config: WorkerConfig,
        parsers: Vec<Box<dyn RdfParser>>,
    ) -> Result<Self, SumiError> {
        let client = build_http_client(user_agent, &config)?;
        let accept = accept_header(&parsers);
        let context = Arc::new(JobContext {
            client,
            parsers: Arc::new(parsers),
            accept,
            sender: endpoint.sender(),
        });
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        Ok(Self {
            endpoint,
            config,
            context,
            jobs: HashMap::new(),
            finished_tx,
            finished_rx,
        })
    }

    /// Serves manager messages until `shutdown` resolves or the bus closes
    ///
    /// On shutdown the running jobs are aborted and reported to the manager.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), SumiError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!("Worker {} started", self.endpoint.worker_id());

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let ongoing_jobs = self.abort_all();
                    tracing::info!(
                        "Worker {} shutting down with {} job(s) running",
                        self.endpoint.worker_id(),
                        ongoing_jobs.len()
                    );
                    // The manager may already be gone
                    let _ = self.endpoint.send(&WorkerMessage::Shutdown { ongoing_jobs });
                    return Ok(());
                }
                Some(job_id) = self.finished_rx.recv() => {
                    self.jobs.remove(&job_id);
                }
                message = self.endpoint.recv() => {
                    let Some(message) = message else {
                        self.abort_all();
                        return Ok(());
                    };
                    if let Err(e) = self.handle(message) {
                        tracing::error!("Worker {} failed: {}", self.endpoint.worker_id(), e);
                        self.abort_all();
                        return Err(e);
                    }
                }
            }
        }
    }

    fn handle(&mut self, message: ManagerMessage) -> Result<(), SumiError> {
        self.jobs.retain(|_, job| !job.handle.is_finished());
        match message {
            ManagerMessage::AskCurCap => {
                self.endpoint.send(&WorkerMessage::RepCurCap(self.capacity()))
            }
            ManagerMessage::DoJob(job) => self.accept_job(job),
            ManagerMessage::JobTimeout { origin, job_type } => {
                let expired: Vec<u64> = self
                    .jobs
                    .iter()
                    .filter(|(_, job)| job.origin == origin && job.job_type == job_type)
                    .map(|(id, _)| *id)
                    .collect();
                for job_id in expired {
                    if let Some(job) = self.jobs.remove(&job_id) {
                        job.handle.abort();
                        tracing::warn!("Job {} for {} timed out, aborted", job_id, origin);
                    }
                }
                Ok(())
            }
        }
    }

    /// Free slots per job type
    pub fn capacity(&self) -> Capacity {
        let running = |job_type: JobType| {
            self.jobs
                .values()
                .filter(|job| job.job_type == job_type)
                .count() as u32
        };
        Capacity {
            domain_crawl: CrawlCapacity {
                capacity: self
                    .config
                    .domain_crawl_capacity
                    .saturating_sub(running(JobType::DomainCrawl)),
                resources_per_domain: self.config.resources_per_domain,
            },
            robots_check: RobotsCapacity {
                capacity: self
                    .config
                    .robots_check_capacity
                    .saturating_sub(running(JobType::RobotsCheck)),
            },
        }
    }

    fn accept_job(&mut self, job: JobSpec) -> Result<(), SumiError> {
        let job_id = job.job_id();
        if self.jobs.values().any(|running| running.origin == job.origin()) {
            return self
                .endpoint
                .send(&WorkerMessage::AlreadyBeingDone { job_id });
        }

        let capacity = self.capacity();
        let free = match job.job_type() {
            JobType::RobotsCheck => capacity.robots_check.capacity,
            JobType::DomainCrawl => capacity.domain_crawl.capacity,
        };
        if free == 0 {
            return self.endpoint.send(&WorkerMessage::NoCapacity { job_id });
        }

        let origin = job.origin().to_string();
        let job_type = job.job_type();
        let context = Arc::clone(&self.context);
        let finished = self.finished_tx.clone();

        let handle = tokio::spawn(async move {
            let result = match job {
                JobSpec::RobotsCheck { job_id, origin } => {
                    run_robots_check(&context, job_id, origin).await
                }
                JobSpec::DomainCrawl {
                    job_id,
                    domain,
                    resources,
                } => {
                    run_domain_crawl(&context, job_id, domain.origin, domain.crawl_delay_ms, resources)
                        .await
                }
            };
            if let Err(e) = result {
                tracing::warn!("Job {} could not report: {}", job_id, e);
            }
            let _ = finished.send(job_id);
        });

        tracing::debug!("Worker started {} job {} for {}", job_type, job_id, origin);
        self.jobs.insert(
            job_id,
            RunningJob {
                origin,
                job_type,
                handle,
            },
        );
        Ok(())
    }

    fn abort_all(&mut self) -> Vec<u64> {
        self.jobs
            .drain()
            .filter(|(_, job)| !job.handle.is_finished())
            .map(|(job_id, job)| {
                job.handle.abort();
                job_id
            })
            .collect()
    }
}

async fn run_robots_check(
    context: &JobContext,
    job_id: u64,
    origin: String,
) -> Result<(), SumiError> {
    let done = match fetch_robots(&context.client, &origin).await {
        Ok(text) => JobDone {
            job_type: JobType::RobotsCheck,
            job_id,
            origin,
            status: ResultStatus::Ok,
            details: Some(JobDetails {
                robots_txt: Some(text),
                resources: 0,
            }),
            err: None,
        },
        Err(err) => JobDone {
            job_type: JobType::RobotsCheck,
            job_id,
            origin,
            status: ResultStatus::Error,
            details: None,
            err: Some(err),
        },
    };
    context.sender.send(&WorkerMessage::JobDone(done))
}

async fn run_domain_crawl(
    context: &JobContext,
    job_id: u64,
    origin: String,
    crawl_delay_ms: u64,
    resources: Vec<String>,
) -> Result<(), SumiError> {
    let delay = Duration::from_millis(crawl_delay_ms);
    let mut reported = 0;

    for (index, url) in resources.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(delay).await;
        }

        let fetched_at = Utc::now();
        let result = fetch_document(&context.client, url, &context.accept, |content_type| {
            parser_for(&context.parsers, content_type).is_some()
        })
        .await
        .and_then(|document| {
            let parser = parser_for(&context.parsers, &document.content_type).ok_or_else(|| {
                FetchError::new(FetchErrorKind::UnsupportedContentType, &document.content_type)
            })?;
            parser
                .parse(&document.body)
                .map_err(|e| FetchError::new(FetchErrorKind::Parse, e.to_string()))
        });

        let host_not_found = matches!(&result, Err(e) if e.kind == FetchErrorKind::HostNotFound);
        let done = match result {
            Ok(triples) => ResourceDone {
                job_id,
                origin: origin.clone(),
                url: url.clone(),
                status: ResultStatus::Ok,
                triples,
                err: None,
                fetched_at: Some(fetched_at),
            },
            Err(err) => ResourceDone {
                job_id,
                origin: origin.clone(),
                url: url.clone(),
                status: ResultStatus::Error,
                triples: Vec::new(),
                err: Some(err),
                fetched_at: Some(fetched_at),
            },
        };

        if host_not_found {
            // The rest of the domain would fail the same way
            let err = done.err.clone();
            context.sender.send(&WorkerMessage::JobDone(JobDone {
                job_type: JobType::DomainCrawl,
                job_id,
                origin,
                status: ResultStatus::Error,
                details: None,
                err,
            }))?;
            return Ok(());
        }

        context.sender.send(&WorkerMessage::ResourceDone(done))?;
        reported += 1;
    }

    context.sender.send(&WorkerMessage::JobDone(JobDone {
        job_type: JobType::DomainCrawl,
        job_id,
        origin,
        status: ResultStatus::Ok,
        details: Some(JobDetails {
            robots_txt: None,
            resources: reported,
        }),
        err: None,
    }))
}
