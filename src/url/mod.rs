//! URL handling module for Sumi-Paths
//!
//! This module provides IRI normalization, document (resource) URL derivation
//! and origin extraction.

mod normalize;
mod origin;

pub use normalize::{normalize_url, resource_url};
pub use origin::{extract_origin, origin_of};

/// Where an IRI lives for crawling purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrawlTarget {
    /// Document URL (IRI without fragment)
    pub resource: String,
    /// Origin of the document
    pub origin: String,
}

/// Resolves an IRI to its crawl target, or `None` when it is not crawlable
/// (non-HTTP schemes, blank hosts, malformed IRIs)
pub fn crawl_target(iri: &str) -> Option<CrawlTarget> {
    let resource = resource_url(iri).ok()?;
    let origin = extract_origin(&resource).ok()?;
    Some(CrawlTarget { resource, origin })
}
