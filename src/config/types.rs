use serde::Deserialize;

/// Main configuration structure for Sumi-Paths
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub manager: ManagerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub politeness: PolitenessConfig,
    #[serde(rename = "robots-check")]
    pub robots_check: JobTypeConfig,
    #[serde(rename = "domain-crawl")]
    pub domain_crawl: JobTypeConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    pub storage: StorageConfig,
}

/// Dispatch loop behavior
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Interval between capacity requests broadcast to workers (milliseconds)
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Consecutive polls without leaseable work before the run is checked for completion
    #[serde(rename = "idle-polls-before-check", default = "default_idle_polls")]
    pub idle_polls_before_check: u32,

    /// Upper bound of resources handed out in one domain-crawl job
    #[serde(rename = "resources-per-domain")]
    pub resources_per_domain: u32,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the robots.txt product token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the full User-Agent header value
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Per-domain politeness limits
#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessConfig {
    /// Crawl delay applied when robots.txt gives none or a smaller one (milliseconds)
    #[serde(rename = "minimum-crawl-delay-ms")]
    pub minimum_crawl_delay_ms: u64,

    /// Cap for robots.txt crawl delays (milliseconds)
    #[serde(rename = "maximum-crawl-delay-ms")]
    pub maximum_crawl_delay_ms: u64,

    /// Delay applied when robots.txt could not be fetched for a transient reason (milliseconds)
    #[serde(rename = "robots-error-delay-ms")]
    pub robots_error_delay_ms: u64,
}

/// Settings shared by each job type
#[derive(Debug, Clone, Deserialize)]
pub struct JobTypeConfig {
    /// Expected upper bound of a job (or, for crawls, of one resource) in milliseconds.
    /// Leases expire after three times this value.
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

/// Local worker settings
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of in-process workers started by `run`
    #[serde(default = "default_worker_count")]
    pub count: u32,

    #[serde(rename = "robots-check-capacity", default = "default_capacity")]
    pub robots_check_capacity: u32,

    #[serde(rename = "domain-crawl-capacity", default = "default_capacity")]
    pub domain_crawl_capacity: u32,

    #[serde(rename = "resources-per-domain", default = "default_resources_per_domain")]
    pub resources_per_domain: u32,

    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: u32,

    #[serde(rename = "request-timeout-ms", default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            robots_check_capacity: default_capacity(),
            domain_crawl_capacity: default_capacity(),
            resources_per_domain: default_resources_per_domain(),
            max_redirects: default_max_redirects(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_idle_polls() -> u32 {
    3
}

fn default_worker_count() -> u32 {
    2
}

fn default_capacity() -> u32 {
    4
}

fn default_resources_per_domain() -> u32 {
    10
}

fn default_max_redirects() -> u32 {
    5
}

fn default_request_timeout() -> u64 {
    20_000
}
