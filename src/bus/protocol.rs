//! Wire format of the manager/worker bus
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": ...}`.

use crate::graph::Triple;
use crate::jobs::JobType;
use crate::state::WarningKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messages sent by workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WorkerMessage {
    RepCurCap(Capacity),
    JobDone(JobDone),
    ResourceDone(ResourceDone),
    #[serde(rename_all = "camelCase")]
    Shutdown { ongoing_jobs: Vec<u64> },
    #[serde(rename_all = "camelCase")]
    NoCapacity { job_id: u64 },
    #[serde(rename_all = "camelCase")]
    AlreadyBeingDone { job_id: u64 },
}

/// Messages sent by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ManagerMessage {
    AskCurCap,
    DoJob(JobSpec),
    #[serde(rename_all = "camelCase")]
    JobTimeout { origin: String, job_type: JobType },
}

/// Free job slots reported by a worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub domain_crawl: CrawlCapacity,
    pub robots_check: RobotsCapacity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlCapacity {
    pub capacity: u32,
    pub resources_per_domain: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotsCapacity {
    pub capacity: u32,
}

/// A job handed to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobSpec {
    #[serde(rename_all = "camelCase")]
    RobotsCheck { job_id: u64, origin: String },
    #[serde(rename_all = "camelCase")]
    DomainCrawl {
        job_id: u64,
        domain: CrawlDomain,
        resources: Vec<String>,
    },
}

impl JobSpec {
    pub fn job_id(&self) -> u64 {
        match self {
            Self::RobotsCheck { job_id, .. } | Self::DomainCrawl { job_id, .. } => *job_id,
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Self::RobotsCheck { .. } => JobType::RobotsCheck,
            Self::DomainCrawl { .. } => JobType::DomainCrawl,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Self::RobotsCheck { origin, .. } => origin,
            Self::DomainCrawl { domain, .. } => &domain.origin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlDomain {
    pub origin: String,
    pub crawl_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultStatus {
    Ok,
    Error,
}

/// Final report of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDone {
    pub job_type: JobType,
    pub job_id: u64,
    pub origin: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JobDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<FetchError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    /// Body of robots.txt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robots_txt: Option<String>,
    /// Resources reported by a domain crawl
    #[serde(default)]
    pub resources: u32,
}

/// Result for one resource of a domain-crawl job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDone {
    pub job_id: u64,
    pub origin: String,
    pub url: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triples: Vec<Triple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<FetchError>,
    /// When the request was issued, absent if none was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Classification of a failed fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FetchErrorKind {
    HttpStatus { status: u16 },
    HostNotFound,
    Timeout,
    ConnectionReset,
    TooManyRedirects,
    UnsupportedContentType,
    RobotsDisallowed,
    Parse,
    Transport,
}

/// A fetch failure as reported over the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchError {
    #[serde(flatten)]
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Stable name stored on failed resources
    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::HttpStatus { .. } => "http_status",
            FetchErrorKind::HostNotFound => "host_not_found",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::ConnectionReset => "connection_reset",
            FetchErrorKind::TooManyRedirects => "too_many_redirects",
            FetchErrorKind::UnsupportedContentType => "unsupported_content_type",
            FetchErrorKind::RobotsDisallowed => "robots_disallowed",
            FetchErrorKind::Parse => "parse_error",
            FetchErrorKind::Transport => "transport",
        }
    }

    /// Domain warning counted for this failure
    pub fn warning(&self) -> WarningKind {
        match self.kind {
            FetchErrorKind::HttpStatus { .. } => WarningKind::HttpStatus,
            FetchErrorKind::HostNotFound => WarningKind::HostNotFound,
            FetchErrorKind::Timeout
            | FetchErrorKind::ConnectionReset
            | FetchErrorKind::Transport => WarningKind::Transport,
            FetchErrorKind::TooManyRedirects => WarningKind::TooManyRedirects,
            FetchErrorKind::UnsupportedContentType => WarningKind::UnsupportedContentType,
            FetchErrorKind::RobotsDisallowed => WarningKind::RobotsDisallowed,
            FetchErrorKind::Parse => WarningKind::ParseError,
        }
    }

    /// robots.txt does not exist: everything is allowed
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::HttpStatus { status: 404 } | FetchErrorKind::HttpStatus { status: 410 }
        )
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind_str(), self.message)
    }
}

impl std::error::Error for FetchError {}
