//! Robots.txt handling module
//!
//! Provides robots.txt policy evaluation and the crawl-delay rules applied to
//! a domain once its robots check has finished.

mod parser;

pub use parser::RobotsPolicy;

use crate::config::PolitenessConfig;

/// Returns the robots.txt URL of an origin
pub fn robots_url(origin: &str) -> String {
    format!("{}/robots.txt", origin.trim_end_matches('/'))
}

/// Computes the effective crawl delay of a domain
///
/// The robots `Crawl-delay` is raised to the configured minimum and capped by
/// the configured maximum.
///
/// # Arguments
///
/// * `robots_delay_ms` - Delay requested by robots.txt, if any
/// * `politeness` - Configured politeness limits
pub fn effective_crawl_delay_ms(robots_delay_ms: Option<u64>, politeness: &PolitenessConfig) -> u64 {
    robots_delay_ms
        .unwrap_or(0)
        .max(politeness.minimum_crawl_delay_ms)
        .min(politeness.maximum_crawl_delay_ms)
}
