//! Crawl runs: their definition, persisted state and lifecycle
//!
//! A process owns an append-only list of steps and the index of the active
//! one. Raising limits in a new step is picked up during the `extending`
//! phase, where every open path is re-offered to the extension engine.

mod controller;
mod definition;
mod notify;

pub use controller::ProcessController;
pub use definition::{PredicateLimitation, ProcessDefinition, StepDefinition};
pub use notify::{ChannelNotifier, CompletionNotifier, LogNotifier};

use crate::paths::PathType;
use chrono::{DateTime, Utc};

/// Lifecycle of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    Queued,
    Extending,
    Running,
    Done,
    Error,
}

impl ProcessStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Extending => "extending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "extending" => Some(Self::Extending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Progress of re-offering paths under the active step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionCounter {
    pub total: u64,
    pub done: u64,
}

/// A persisted crawl run
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: i64,
    pub status: ProcessStatus,
    pub path_type: PathType,
    pub seeds: Vec<String>,
    pub steps: Vec<StepDefinition>,
    /// Index of the active step in `steps`
    pub current_step: usize,
    pub extension: ExtensionCounter,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Process {
    pub fn active_step(&self) -> Option<&StepDefinition> {
        self.steps.get(self.current_step)
    }
}
