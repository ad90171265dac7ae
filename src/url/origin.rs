use crate::url::normalize_url;
use crate::UrlError;
use url::Url;

/// Extracts the origin (`scheme://host[:port]`) of a URL
///
/// The origin is the politeness unit: robots.txt, crawl-delay and leases are
/// all tracked per origin.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_paths::url::origin_of;
///
/// let url = Url::parse("https://Example.org:8443/path").unwrap();
/// assert_eq!(origin_of(&url), Some("https://example.org:8443".to_string()));
/// ```
pub fn origin_of(url: &Url) -> Option<String> {
    let origin = url.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

/// Normalizes an IRI string and returns its origin
pub fn extract_origin(iri: &str) -> Result<String, UrlError> {
    let url = normalize_url(iri)?;
    origin_of(&url).ok_or(UrlError::MissingDomain)
}
