use crate::UrlError;
use url::Url;

/// Normalizes a resource IRI so equal identifiers compare equal
///
/// Linked-data IRIs are identifiers, not just locations, so normalization is
/// deliberately narrow:
///
/// 1. Parse the IRI; reject if malformed
/// 2. Accept only `http` and `https`
/// 3. Require a host
/// 4. Lowercase scheme and host, drop default ports, resolve dot segments
///    (all performed by the `url` parser)
///
/// Query strings, trailing slashes, `www.` prefixes and fragments are kept:
/// `http://example.org/a#x` and `http://example.org/a#y` name different
/// resources that share one document.
///
/// # Examples
///
/// ```
/// use sumi_paths::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.ORG:80/a/../b#me").unwrap();
/// assert_eq!(url.as_str(), "http://example.org/b#me");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}

/// Returns the fetchable document URL for an IRI (the IRI without its fragment)
///
/// Resources are tracked per document: every IRI that differs only by fragment
/// is answered by the same HTTP request.
pub fn resource_url(iri: &str) -> Result<String, UrlError> {
    let mut url = normalize_url(iri)?;
    url.set_fragment(None);
    Ok(url.to_string())
}
