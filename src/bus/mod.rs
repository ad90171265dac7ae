//! In-process message bus between the manager and its workers
//!
//! Frames travel as serialized JSON strings. Every frame a worker sends is
//! tagged with the worker's id.

pub mod protocol;

pub use protocol::{
    Capacity, CrawlCapacity, CrawlDomain, FetchError, FetchErrorKind, JobDetails, JobDone,
    JobSpec, ManagerMessage, ResourceDone, ResultStatus, RobotsCapacity, WorkerMessage,
};

use crate::SumiError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A raw frame received by the manager
#[derive(Debug, Clone)]
pub struct Frame {
    pub worker_id: String,
    pub body: String,
}

type WorkerSenders = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>;

/// Creates a bus: the manager's endpoint and a connector for workers
pub fn message_bus() -> (ManagerEndpoint, BusConnector) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let workers: WorkerSenders = Arc::new(Mutex::new(HashMap::new()));

    let manager = ManagerEndpoint {
        inbound: inbound_rx,
        outbound: Outbound {
            workers: workers.clone(),
        },
    };
    let connector = BusConnector {
        inbound: inbound_tx,
        workers,
    };
    (manager, connector)
}

/// Attaches workers to the bus
#[derive(Debug, Clone)]
pub struct BusConnector {
    inbound: mpsc::UnboundedSender<Frame>,
    workers: WorkerSenders,
}

impl BusConnector {
    /// Connects a worker; a previous connection with the same id is replaced
    pub fn connect(&self, worker_id: impl Into<String>) -> Result<WorkerEndpoint, SumiError> {
        let worker_id = worker_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        lock_workers(&self.workers)?.insert(worker_id.clone(), tx);
        Ok(WorkerEndpoint {
            worker_id,
            to_manager: self.inbound.clone(),
            inbound: rx,
        })
    }
}

fn lock_workers(
    workers: &WorkerSenders,
) -> Result<std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<String>>>, SumiError>
{
    workers
        .lock()
        .map_err(|e| SumiError::BusClosed(format!("worker table poisoned: {}", e)))
}

/// Sending half of the manager's endpoint
#[derive(Debug, Clone)]
pub struct Outbound {
    workers: WorkerSenders,
}

impl Outbound {
    /// Sends a message to one worker
    pub fn send_to(&self, worker_id: &str, message: &ManagerMessage) -> Result<(), SumiError> {
        let body = serde_json::to_string(message)?;
        let mut workers = lock_workers(&self.workers)?;
        let sender = workers
            .get(worker_id)
            .ok_or_else(|| SumiError::BusClosed(format!("unknown worker {}", worker_id)))?;
        if sender.send(body).is_err() {
            workers.remove(worker_id);
            return Err(SumiError::BusClosed(format!("worker {} disconnected", worker_id)));
        }
        Ok(())
    }

    /// Sends a message to every connected worker, forgetting disconnected ones
    ///
    /// Returns the number of workers reached.
    pub fn broadcast(&self, message: &ManagerMessage) -> Result<usize, SumiError> {
        let body = serde_json::to_string(message)?;
        let mut workers = lock_workers(&self.workers)?;
        workers.retain(|worker_id, sender| {
            let alive = sender.send(body.clone()).is_ok();
            if !alive {
                tracing::debug!("Dropping disconnected worker {}", worker_id);
            }
            alive
        });
        Ok(workers.len())
    }

    pub fn disconnect(&self, worker_id: &str) -> Result<(), SumiError> {
        lock_workers(&self.workers)?.remove(worker_id);
        Ok(())
    }
}

/// The manager's side of the bus
#[derive(Debug)]
pub struct ManagerEndpoint {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: Outbound,
}

impl ManagerEndpoint {
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Receives the next frame, `None` once every connector is gone
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }
}

/// Decodes a worker frame
pub fn decode_worker_frame(frame: &Frame) -> Result<WorkerMessage, SumiError> {
    Ok(serde_json::from_str(&frame.body)?)
}

/// A worker's side of the bus
#[derive(Debug)]
pub struct WorkerEndpoint {
    worker_id: String,
    to_manager: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl WorkerEndpoint {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// A cloneable sender for tasks spawned by the worker
    pub fn sender(&self) -> WorkerSender {
        WorkerSender {
            worker_id: self.worker_id.clone(),
            to_manager: self.to_manager.clone(),
        }
    }

    pub fn send(&self, message: &WorkerMessage) -> Result<(), SumiError> {
        self.sender().send(message)
    }

    /// Receives the next manager message, `None` once disconnected
    ///
    /// Frames that fail to decode are logged and skipped.
    pub async fn recv(&mut self) -> Option<ManagerMessage> {
        loop {
            let body = self.inbound.recv().await?;
            match serde_json::from_str(&body) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!("Worker {} dropped bad frame: {}", self.worker_id, e),
            }
        }
    }
}

/// Sends frames to the manager on behalf of a worker
#[derive(Debug, Clone)]
pub struct WorkerSender {
    worker_id: String,
    to_manager: mpsc::UnboundedSender<Frame>,
}

impl WorkerSender {
    pub fn send(&self, message: &WorkerMessage) -> Result<(), SumiError> {
        let frame = Frame {
            worker_id: self.worker_id.clone(),
            body: serde_json::to_string(message)?,
        };
        self.to_manager
            .send(frame)
            .map_err(|_| SumiError::BusClosed("manager disconnected".to_string()))
    }
}
