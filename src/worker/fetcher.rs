//! HTTP fetcher for workers
//!
//! This module handles all HTTP requests of a worker, including:
//! - Building the HTTP client with the crawler's user agent
//! - Fetching robots.txt
//! - Fetching RDF documents with content negotiation
//! - Error classification into bus error kinds

use crate::bus::{FetchError, FetchErrorKind};
use crate::config::{UserAgentConfig, WorkerConfig};
use crate::robots::robots_url;
use reqwest::{header, redirect::Policy, Client, Response};
use std::error::Error as StdError;
use std::time::Duration;

/// A successfully fetched document
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Final URL after redirects
    pub final_url: String,
    /// Content-Type header value
    pub content_type: String,
    pub body: String,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `worker` - Redirect limit and request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    worker: &WorkerConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_millis(worker.request_timeout_ms))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(worker.max_redirects as usize))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches the robots.txt of an origin
///
/// # Returns
///
/// * `Ok(String)` - The robots.txt body
/// * `Err(FetchError)` - 404/410 come back as `HttpStatus`, which the manager
///   treats as "no robots.txt"
pub async fn fetch_robots(client: &Client, origin: &str) -> Result<String, FetchError> {
    let url = robots_url(origin);
    let response = client
        .get(&url)
        .header(header::ACCEPT, "text/plain")
        .send()
        .await
        .map_err(|e| classify_error(&e))?;

    let response = check_status(response)?;
    response.text().await.map_err(|e| classify_error(&e))
}

/// Fetches an RDF document
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx with accepted media type | `Ok` |
/// | 2xx with any other media type | `UnsupportedContentType` |
/// | Non-2xx after redirects | `HttpStatus` |
/// | Redirect chain over the limit | `TooManyRedirects` |
/// | DNS failure | `HostNotFound` |
/// | Timeout | `Timeout` |
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - The document URL
/// * `accept` - Accept header value
/// * `is_supported` - Whether a Content-Type can be parsed
pub async fn fetch_document<F>(
    client: &Client,
    url: &str,
    accept: &str,
    is_supported: F,
) -> Result<FetchedDocument, FetchError>
where
    F: Fn(&str) -> bool,
{
    let response = client
        .get(url)
        .header(header::ACCEPT, accept)
        .send()
        .await
        .map_err(|e| classify_error(&e))?;

    let response = check_status(response)?;
    let final_url = response.url().to_string();

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !is_supported(&content_type) {
        return Err(FetchError::new(
            FetchErrorKind::UnsupportedContentType,
            format!("unsupported content type '{}'", content_type),
        ));
    }

    let body = response.text().await.map_err(|e| classify_error(&e))?;
    Ok(FetchedDocument {
        final_url,
        content_type,
        body,
    })
}

fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.is_redirection() {
        return Err(FetchError::new(
            FetchErrorKind::TooManyRedirects,
            format!("redirect limit reached at {}", response.url()),
        ));
    }
    Err(FetchError::new(
        FetchErrorKind::HttpStatus {
            status: status.as_u16(),
        },
        format!("HTTP {}", status),
    ))
}

/// Maps a transport error to its bus error kind
pub fn classify_error(e: &reqwest::Error) -> FetchError {
    let kind = if e.is_redirect() {
        FetchErrorKind::TooManyRedirects
    } else if e.is_timeout() {
        FetchErrorKind::Timeout
    } else if is_dns_failure(e) {
        FetchErrorKind::HostNotFound
    } else if is_connection_reset(e) {
        FetchErrorKind::ConnectionReset
    } else if e.is_decode() || e.is_body() {
        FetchErrorKind::Parse
    } else {
        FetchErrorKind::Transport
    };
    FetchError::new(kind, e.to_string())
}

fn error_chain(e: &reqwest::Error) -> impl Iterator<Item = &(dyn StdError + 'static)> + '_ {
    std::iter::successors(e.source(), |e: &&(dyn StdError + 'static)| (*e).source())
}

fn is_dns_failure(e: &reqwest::Error) -> bool {
    e.is_connect()
        && error_chain(e).any(|source| {
            let message = source.to_string().to_lowercase();
            message.contains("dns error")
                || message.contains("failed to lookup address")
                || message.contains("name or service not known")
                || message.contains("no such host")
        })
}

fn is_connection_reset(e: &reqwest::Error) -> bool {
    error_chain(e).any(|source| {
        source
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| {
                matches!(
                    io.kind(),
                    std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::ConnectionRefused
                )
            })
    })
}
