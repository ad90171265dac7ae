use crate::paths::{DirectionMetric, PathType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A crawl run as written in a process definition file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessDefinition {
    #[serde(default)]
    pub path_type: PathType,
    pub seeds: Vec<String>,
    pub steps: Vec<StepDefinition>,
}

/// Limits of one configuration epoch of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepDefinition {
    /// Maximum number of nodes in a path, seed included
    pub max_path_length: u32,

    /// Maximum number of distinct predicates in a traversal path
    pub max_path_props: u32,

    #[serde(default)]
    pub predicates: PredicateLimitation,

    #[serde(default)]
    pub follow_direction: bool,

    #[serde(default = "default_upper_threshold")]
    pub upper_threshold: f64,

    #[serde(default = "default_lower_threshold")]
    pub lower_threshold: f64,

    /// Per-predicate branch statistics; computed from the triple store when
    /// `follow-direction` is set and none are given
    #[serde(default)]
    pub direction_metrics: BTreeMap<String, DirectionMetric>,
}

/// Predicate allow/deny list of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "list", rename_all = "lowercase")]
pub enum PredicateLimitation {
    Whitelist(BTreeSet<String>),
    Blacklist(BTreeSet<String>),
}

impl Default for PredicateLimitation {
    fn default() -> Self {
        Self::Blacklist(BTreeSet::new())
    }
}

impl PredicateLimitation {
    pub fn allows(&self, predicate: &str) -> bool {
        match self {
            Self::Whitelist(list) => list.contains(predicate),
            Self::Blacklist(list) => !list.contains(predicate),
        }
    }
}

fn default_upper_threshold() -> f64 {
    2.0
}

fn default_lower_threshold() -> f64 {
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blacklist_allows_others() {
        let limitation =
            PredicateLimitation::Blacklist(["http://p".to_string()].into_iter().collect());
        assert!(!limitation.allows("http://p"));
        assert!(limitation.allows("http://q"));
    }

    #[test]
    fn test_whitelist_only_listed() {
        let limitation =
            PredicateLimitation::Whitelist(["http://p".to_string()].into_iter().collect());
        assert!(limitation.allows("http://p"));
        assert!(!limitation.allows("http://q"));
    }

    #[test]
    fn test_default_allows_everything() {
        assert!(PredicateLimitation::default().allows("http://anything"));
    }

    #[test]
    fn test_step_defaults_from_toml() {
        let step: StepDefinition =
            toml::from_str("max-path-length = 2\nmax-path-props = 1\n").unwrap();
        assert_eq!(step.upper_threshold, 2.0);
        assert_eq!(step.lower_threshold, 0.5);
        assert!(!step.follow_direction);
        assert_eq!(step.predicates, PredicateLimitation::default());
    }

    #[test]
    fn test_step_json_roundtrip_keeps_metrics() {
        let mut step: StepDefinition =
            toml::from_str("max-path-length = 2\nmax-path-props = 1\n").unwrap();
        step.direction_metrics.insert(
            "http://p".to_string(),
            DirectionMetric {
                distinct_subjects: 4,
                distinct_objects: 1,
            },
        );
        let json = serde_json::to_string(&step).unwrap();
        let back: StepDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }
}
