//! State module for tracking crawl progress
//!
//! This module provides the persisted state machines of domains and resources.
//!
//! # Components
//!
//! - `DomainRecord`: per-origin politeness state (robots policy, crawl delay, next allowed time, lease)
//! - `ResourceRecord`: per-document crawl state
//! - `WarningKind`: typed warning counters kept per domain

mod domain_state;
mod resource_state;

pub use domain_state::{
    advance_next_allowed, CrawlCounters, DomainLease, DomainRecord, DomainStatus, RobotsOutcome,
    RobotsStatus, WarningKind,
};
pub use resource_state::{ResourceOutcome, ResourceRecord, ResourceStatus};
