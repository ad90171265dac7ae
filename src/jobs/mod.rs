//! Job leases: job types, id minting and the registry of outstanding leases

mod registry;

pub use registry::{JobRegistry, JobTimeouts, LeaseInfo, RegistryEvent};

use crate::state::WarningKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of work leased to a worker for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    RobotsCheck,
    DomainCrawl,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RobotsCheck => "robotsCheck",
            Self::DomainCrawl => "domainCrawl",
        }
    }

    /// Warning counted on the domain when a lease of this type expires
    pub fn timeout_warning(&self) -> WarningKind {
        match self {
            Self::RobotsCheck => WarningKind::RobotsCheckTimeout,
            Self::DomainCrawl => WarningKind::DomainCrawlTimeout,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hands out job ids that are unique across manager restarts
///
/// Starts after the highest id found in storage so a late result from a
/// previous run can never match a new lease.
#[derive(Debug)]
pub struct JobIdMinter {
    last: AtomicU64,
}

impl JobIdMinter {
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}
