//! Crawl manager
//!
//! This module contains the manager side of the crawler, including:
//! - The domain gate (robots policy, crawl delays, domain leases)
//! - The orchestrator dispatch loop

mod gate;
mod orchestrator;

pub use gate::{DomainGate, LockedDomain, RobotsErrorClass};
pub use orchestrator::{Orchestrator, PollOutcome};

use crate::bus::message_bus;
use crate::config::Config;
use crate::process::LogNotifier;
use crate::storage::SharedStorage;
use crate::worker::LocalWorker;
use crate::SumiError;
use std::future::Future;
use tokio::sync::watch;

/// Runs the manager with the configured number of local workers
///
/// This is the main entry point for a crawl. It will:
/// 1. Reset leases left behind by a previous run
/// 2. Start the local workers
/// 3. Run the dispatch loop until `shutdown` resolves (or, with
///    `exit_when_idle`, until no work is left)
/// 4. Stop the workers
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `storage` - Opened storage
/// * `shutdown` - Resolves when the run should stop
/// * `exit_when_idle` - Stop once no process is left
pub async fn run<F>(
    config: Config,
    storage: SharedStorage,
    shutdown: F,
    exit_when_idle: bool,
) -> Result<(), SumiError>
where
    F: Future<Output = ()>,
{
    let (endpoint, connector) = message_bus();
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut workers = Vec::new();
    for index in 0..config.worker.count {
        let worker_id = format!("local-{}", index + 1);
        let worker = LocalWorker::new(
            connector.connect(worker_id.clone())?,
            &config.user_agent,
            config.worker.clone(),
        )?;
        let mut stop = stop_rx.clone();
        workers.push(tokio::spawn(async move {
            let stopped = async move {
                let _ = stop.wait_for(|stop| *stop).await;
            };
            if let Err(e) = worker.run(stopped).await {
                tracing::error!("Worker {} stopped: {}", worker_id, e);
            }
        }));
    }
    drop(connector);
    tracing::info!("Started {} local worker(s)", workers.len());

    let mut orchestrator = Orchestrator::new(config, storage, endpoint, Box::new(LogNotifier))?;
    let result = orchestrator.run(shutdown, exit_when_idle).await;

    let _ = stop_tx.send(true);
    for worker in workers {
        let _ = worker.await;
    }
    result
}
