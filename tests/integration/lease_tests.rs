//! Lease expiry as seen from a worker that never answers

use crate::common::{definition, in_memory_storage, test_config};
use std::time::Duration;
use sumi_paths::bus::{
    message_bus, Capacity, CrawlCapacity, JobDetails, JobDone, JobSpec, ManagerMessage,
    ResultStatus, RobotsCapacity, WorkerMessage,
};
use sumi_paths::crawler::Orchestrator;
use sumi_paths::jobs::JobType;
use sumi_paths::process::{LogNotifier, ProcessController};
use sumi_paths::state::{DomainStatus, WarningKind};
use sumi_paths::storage::{self, DomainStore};
use tokio::sync::oneshot;
use tokio::time::Instant;

const SEED: &str = "http://slow.example.org/seed";
const ORIGIN: &str = "http://slow.example.org";

fn robots_capacity(capacity: u32) -> WorkerMessage {
    WorkerMessage::RepCurCap(Capacity {
        domain_crawl: CrawlCapacity {
            capacity: 0,
            resources_per_domain: 1,
        },
        robots_check: RobotsCapacity { capacity },
    })
}

#[tokio::test(start_paused = true)]
async fn test_expired_lease_times_out_once() {
    let storage = in_memory_storage();
    ProcessController::new(storage.clone(), Box::new(LogNotifier))
        .create_process(&definition(&[SEED.to_string()], 2, 1))
        .unwrap();

    let (endpoint, connector) = message_bus();
    let mut worker = connector.connect("w1").unwrap();
    let mut orchestrator = Orchestrator::new(
        test_config(100, 1),
        storage.clone(),
        endpoint,
        Box::new(LogNotifier),
    )
    .unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let manager = orchestrator.run(
        async {
            let _ = stop_rx.await;
        },
        false,
    );

    // Robots leases expire after 3 x 10s; watch well past that
    let worker_side = async move {
        let deadline = Instant::now() + Duration::from_secs(120);
        let mut offered = false;
        let mut jobs = Vec::new();
        let mut timeouts = Vec::new();

        while let Ok(Some(message)) = tokio::time::timeout_at(deadline, worker.recv()).await {
            match message {
                ManagerMessage::AskCurCap if !offered => {
                    offered = true;
                    worker.send(&robots_capacity(1)).unwrap();
                }
                ManagerMessage::AskCurCap => {}
                ManagerMessage::DoJob(job) => jobs.push(job),
                ManagerMessage::JobTimeout { origin, job_type } => {
                    // A result arriving after the timeout must not be applied
                    if let Some(job) = jobs.last() {
                        worker
                            .send(&WorkerMessage::JobDone(JobDone {
                                job_type,
                                job_id: job.job_id(),
                                origin: origin.clone(),
                                status: ResultStatus::Ok,
                                details: Some(JobDetails {
                                    robots_txt: Some("User-agent: *\nDisallow: /\n".to_string()),
                                    resources: 0,
                                }),
                                err: None,
                            }))
                            .unwrap();
                    }
                    timeouts.push((origin, job_type));
                }
            }
        }

        let _ = stop_tx.send(());
        (jobs, timeouts)
    };

    let (result, (jobs, timeouts)) = tokio::join!(manager, worker_side);
    result.unwrap();

    assert_eq!(jobs.len(), 1);
    assert!(matches!(&jobs[0], JobSpec::RobotsCheck { origin, .. } if origin == ORIGIN));
    assert_eq!(timeouts, vec![(ORIGIN.to_string(), JobType::RobotsCheck)]);
    assert_eq!(orchestrator.registry().outstanding().unwrap(), 0);

    let guard = storage::lock(&storage).unwrap();
    let domain = guard.get_domain(ORIGIN).unwrap().unwrap();
    assert_eq!(domain.status, DomainStatus::Unvisited);
    assert!(domain.robots_text.is_none());
    assert_eq!(
        guard.get_warnings(ORIGIN).unwrap().get(&WarningKind::RobotsCheckTimeout),
        Some(&1)
    );
    drop(connector);
}
