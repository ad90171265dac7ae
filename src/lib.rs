//! Sumi-Paths: a polite linked-data path crawler
//!
//! This crate crawls RDF resources across many domains while respecting
//! per-domain politeness, and grows bounded-length paths of connected
//! resources outward from seed URLs.

pub mod bus;
pub mod config;
pub mod crawler;
pub mod graph;
pub mod jobs;
pub mod output;
pub mod paths;
pub mod process;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for Sumi-Paths operations
#[derive(Debug, Error)]
pub enum SumiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Message encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Domain {origin} already has an outstanding job")]
    JobAlreadyLeased { origin: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Process {0} not found")]
    ProcessNotFound(i64),

    #[error("Message bus closed: {0}")]
    BusClosed(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Sumi-Paths operations
pub type Result<T> = std::result::Result<T, SumiError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use graph::{Literal, Term, Triple};
pub use paths::{Path, PathType};
pub use state::{DomainStatus, ResourceStatus, RobotsStatus};
pub use url::{extract_origin, normalize_url, resource_url};
