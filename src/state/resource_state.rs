/// Resource state definitions for tracking crawl progress
///
/// A resource is a fetchable document URL; every IRI sharing that document
/// (differing only by fragment) shares its state.
use std::fmt;

/// Represents the current crawl state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    /// Referenced but never fetched
    Unvisited,

    /// Leased to a domain-crawl job
    Crawling,

    // ===== Terminal States =====
    /// Fetched and parsed
    Done,

    /// Fetch or parse failed
    Error,
}

impl ResourceStatus {
    /// Returns true if no further crawling will happen for this resource
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unvisited => "unvisited",
            Self::Crawling => "crawling",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "unvisited" => Some(Self::Unvisited),
            "crawling" => Some(Self::Crawling),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![Self::Unvisited, Self::Crawling, Self::Done, Self::Error]
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Persisted crawl state of one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub url: String,
    pub origin: String,
    pub status: ResourceStatus,
    /// Job currently holding the resource
    pub job_id: Option<u64>,
    /// Error classification, `FetchError::kind_str`
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub triple_count: u32,
}

/// Result of a crawl attempt as applied to a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOutcome {
    pub status: ResourceStatus,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub triple_count: u32,
}

impl ResourceOutcome {
    pub fn done(triple_count: u32) -> Self {
        Self {
            status: ResourceStatus::Done,
            error_kind: None,
            error_message: None,
            triple_count,
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResourceStatus::Error,
            error_kind: Some(kind.into()),
            error_message: Some(message.into()),
            triple_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ResourceStatus::Unvisited.is_terminal());
        assert!(!ResourceStatus::Crawling.is_terminal());
        assert!(ResourceStatus::Done.is_terminal());
        assert!(ResourceStatus::Error.is_terminal());
    }

    #[test]
    fn test_db_string_roundtrip() {
        for status in ResourceStatus::all_states() {
            let parsed = ResourceStatus::from_db_string(status.to_db_string());
            assert_eq!(parsed, Some(status));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceStatus::Crawling.to_string(), "crawling");
    }
}
