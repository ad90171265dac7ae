//! Configuration module for Sumi-Paths
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! as well as the process definition files that describe a crawl run.
//!
//! # Example
//!
//! ```no_run
//! use sumi_paths::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Minimum crawl delay: {}ms", config.politeness.minimum_crawl_delay_ms);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, JobTypeConfig, ManagerConfig, PolitenessConfig, StorageConfig, UserAgentConfig,
    WorkerConfig,
};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_process_definition,
    load_step_definition, parse_config,
};
pub use validation::{validate_process_definition, validate_step_definition};

/// Minimal valid configuration for unit tests
#[cfg(test)]
pub(crate) const TEST_CONFIG: &str = r#"
[manager]
poll-interval-ms = 500
resources-per-domain = 10

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[politeness]
minimum-crawl-delay-ms = 1000
maximum-crawl-delay-ms = 30000
robots-error-delay-ms = 60000

[robots-check]
timeout-ms = 10000

[domain-crawl]
timeout-ms = 20000

[storage]
database-path = "./test.db"
"#;

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    parse_config(TEST_CONFIG).unwrap()
}
