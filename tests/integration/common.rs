//! Shared fixtures for the integration tests

use sumi_paths::config::{parse_config, Config, UserAgentConfig};
use sumi_paths::process::ProcessDefinition;
use sumi_paths::storage::{self, SharedStorage, SqliteStorage};

pub const FOAF_KNOWS: &str = "http://xmlns.com/foaf/0.1/knows";
pub const FOAF_NAME: &str = "http://xmlns.com/foaf/0.1/name";

/// Creates a test configuration with short delays
pub fn test_config(minimum_delay_ms: u64, workers: u32) -> Config {
    parse_config(&format!(
        r#"
[manager]
poll-interval-ms = 20
idle-polls-before-check = 2
resources-per-domain = 10

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[politeness]
minimum-crawl-delay-ms = {}
maximum-crawl-delay-ms = 5000
robots-error-delay-ms = 5000

[robots-check]
timeout-ms = 10000

[domain-crawl]
timeout-ms = 10000

[worker]
count = {}
request-timeout-ms = 5000

[storage]
database-path = ":memory:"
"#,
        minimum_delay_ms, workers
    ))
    .expect("test config is valid")
}

pub fn user_agent() -> UserAgentConfig {
    test_config(100, 1).user_agent
}

pub fn in_memory_storage() -> SharedStorage {
    storage::shared(SqliteStorage::new_in_memory().expect("in-memory database"))
}

/// A single-step traversal process
pub fn definition(seeds: &[String], length: u32, props: u32) -> ProcessDefinition {
    let seeds = seeds
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");
    toml::from_str(&format!(
        "seeds = [{}]\n\n[[steps]]\nmax-path-length = {}\nmax-path-props = {}\n",
        seeds, length, props
    ))
    .expect("definition is valid")
}

/// Formats one N-Triples statement with a named object
pub fn nt_link(subject: &str, predicate: &str, object: &str) -> String {
    format!("<{}> <{}> <{}> .\n", subject, predicate, object)
}

/// Formats one N-Triples statement with a plain literal object
pub fn nt_literal(subject: &str, predicate: &str, value: &str) -> String {
    format!("<{}> <{}> \"{}\" .\n", subject, predicate, value)
}
