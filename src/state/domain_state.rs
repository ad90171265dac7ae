use chrono::{DateTime, Duration, Utc};

/// Lease status of a domain (origin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainStatus {
    /// Known but robots.txt not yet checked
    Unvisited,

    /// Leased to a robots-check job
    Checking,

    /// Robots policy known; crawlable once `next_allowed` has passed
    Ready,

    /// Leased to a domain-crawl job
    Crawling,

    /// Host could not be resolved; needs an operator reset
    Error,
}

impl DomainStatus {
    /// Returns true while a job holds this domain
    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Checking | Self::Crawling)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unvisited => "unvisited",
            Self::Checking => "checking",
            Self::Ready => "ready",
            Self::Crawling => "crawling",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "unvisited" => Some(Self::Unvisited),
            "checking" => Some(Self::Checking),
            "ready" => Some(Self::Ready),
            "crawling" => Some(Self::Crawling),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Unvisited,
            Self::Checking,
            Self::Ready,
            Self::Crawling,
            Self::Error,
        ]
    }
}

/// robots.txt sub-state of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RobotsStatus {
    Unvisited,
    Checking,
    /// robots.txt answered 404/410: everything allowed
    NotFound,
    /// Transient failure: everything allowed, conservative delay
    Error,
    Done,
}

impl RobotsStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unvisited => "unvisited",
            Self::Checking => "checking",
            Self::NotFound => "not_found",
            Self::Error => "error",
            Self::Done => "done",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "unvisited" => Some(Self::Unvisited),
            "checking" => Some(Self::Checking),
            "not_found" => Some(Self::NotFound),
            "error" => Some(Self::Error),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// Typed warning counters kept per domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WarningKind {
    RobotsCheckTimeout,
    DomainCrawlTimeout,
    RobotsError,
    HttpStatus,
    HostNotFound,
    Transport,
    TooManyRedirects,
    UnsupportedContentType,
    RobotsDisallowed,
    ParseError,
    WorkerShutdown,
}

impl WarningKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::RobotsCheckTimeout => "robots_check_timeout",
            Self::DomainCrawlTimeout => "domain_crawl_timeout",
            Self::RobotsError => "robots_error",
            Self::HttpStatus => "http_status",
            Self::HostNotFound => "host_not_found",
            Self::Transport => "transport",
            Self::TooManyRedirects => "too_many_redirects",
            Self::UnsupportedContentType => "unsupported_content_type",
            Self::RobotsDisallowed => "robots_disallowed",
            Self::ParseError => "parse_error",
            Self::WorkerShutdown => "worker_shutdown",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "robots_check_timeout" => Some(Self::RobotsCheckTimeout),
            "domain_crawl_timeout" => Some(Self::DomainCrawlTimeout),
            "robots_error" => Some(Self::RobotsError),
            "http_status" => Some(Self::HttpStatus),
            "host_not_found" => Some(Self::HostNotFound),
            "transport" => Some(Self::Transport),
            "too_many_redirects" => Some(Self::TooManyRedirects),
            "unsupported_content_type" => Some(Self::UnsupportedContentType),
            "robots_disallowed" => Some(Self::RobotsDisallowed),
            "parse_error" => Some(Self::ParseError),
            "worker_shutdown" => Some(Self::WorkerShutdown),
            _ => None,
        }
    }
}

/// Crawl counters of a domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlCounters {
    /// Resources handed out in the current job
    pub queued: u32,
    /// Resources of the current job not yet reported
    pub ongoing: u32,
    pub success: u32,
    pub failed: u32,
    /// Active path heads resolving to this domain
    pub path_heads: u32,
}

/// Job currently holding a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainLease {
    pub worker_id: String,
    pub job_id: u64,
}

/// Persisted politeness state of one origin
///
/// Maintains everything the scheduler needs to decide whether a domain can be
/// leased: the robots policy, the effective crawl delay and the earliest time
/// the next request may be issued.
#[derive(Debug, Clone)]
pub struct DomainRecord {
    pub origin: String,
    pub status: DomainStatus,
    pub robots_status: RobotsStatus,

    /// Cached robots.txt body
    pub robots_text: Option<String>,

    /// When robots.txt was last checked
    pub robots_checked_at: Option<DateTime<Utc>>,

    /// Effective crawl delay in milliseconds
    pub crawl_delay_ms: u64,

    /// Timestamp of the last request to this domain
    pub last_accessed: Option<DateTime<Utc>>,

    /// Earliest time the next request may be issued
    pub next_allowed: Option<DateTime<Utc>>,

    pub counters: CrawlCounters,
    pub lease: Option<DomainLease>,

    /// Last domain-level error message
    pub error: Option<String>,
}

impl DomainRecord {
    /// Creates an unvisited domain with no politeness history
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            status: DomainStatus::Unvisited,
            robots_status: RobotsStatus::Unvisited,
            robots_text: None,
            robots_checked_at: None,
            crawl_delay_ms: 0,
            last_accessed: None,
            next_allowed: None,
            counters: CrawlCounters::default(),
            lease: None,
            error: None,
        }
    }

    /// Checks if a crawl lease may be granted at `now`
    ///
    /// # Arguments
    ///
    /// * `now` - The current time
    ///
    /// # Returns
    ///
    /// * `true` - The domain is `ready` and its next allowed time has passed
    /// * `false` - The domain is leased, unchecked, in error, or still cooling down
    pub fn is_crawl_allowed(&self, now: DateTime<Utc>) -> bool {
        self.status == DomainStatus::Ready && self.time_until_next_request(now).is_none()
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub fn time_until_next_request(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.next_allowed {
            Some(next) if next > now => Some(next - now),
            _ => None,
        }
    }

    /// Whether robots.txt allows everything because none could be read
    pub fn robots_allows_all(&self) -> bool {
        matches!(
            self.robots_status,
            RobotsStatus::NotFound | RobotsStatus::Error
        ) || self.robots_text.is_none()
    }
}

/// Result of a robots check as applied to a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsOutcome {
    pub status: DomainStatus,
    pub robots_status: RobotsStatus,
    pub robots_text: Option<String>,
    pub crawl_delay_ms: u64,
    pub error: Option<String>,
}

/// Computes the next allowed time after a request issued at `accessed_at`,
/// never moving an existing value earlier
pub fn advance_next_allowed(
    current: Option<DateTime<Utc>>,
    accessed_at: DateTime<Utc>,
    crawl_delay_ms: u64,
) -> DateTime<Utc> {
    let candidate = accessed_at + Duration::milliseconds(crawl_delay_ms as i64);
    match current {
        Some(current) if current > candidate => current,
        _ => candidate,
    }
}
