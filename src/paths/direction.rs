use serde::{Deserialize, Serialize};

/// Distinct subject/object counts of one predicate across known triples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DirectionMetric {
    pub distinct_subjects: u64,
    pub distinct_objects: u64,
}

/// Direction a predicate may be followed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Subject to object only
    Forward,
    /// Object to subject only
    Backward,
    Both,
}

impl DirectionMetric {
    /// Ratio of distinct subjects to distinct objects
    pub fn branch_factor(&self) -> f64 {
        if self.distinct_objects == 0 {
            return f64::INFINITY;
        }
        self.distinct_subjects as f64 / self.distinct_objects as f64
    }

    /// Dominant direction of the predicate given the step thresholds
    pub fn direction(&self, upper: f64, lower: f64) -> Direction {
        let ratio = self.branch_factor();
        if ratio >= upper {
            Direction::Forward
        } else if ratio <= lower {
            Direction::Backward
        } else {
            Direction::Both
        }
    }
}

impl Direction {
    pub fn allows(&self, forward: bool) -> bool {
        match self {
            Self::Forward => forward,
            Self::Backward => !forward,
            Self::Both => true,
        }
    }
}
