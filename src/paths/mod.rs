//! Path model and extension engine
//!
//! A path grows outward from a seed one triple at a time. Two variants share
//! the [`PathContract`]:
//!
//! - [`TraversalPath`] keeps the full node history and distinct predicates
//! - [`EndpointPath`] keeps only its head and the shortest hop count per seed
//!
//! The variant is chosen per process by its [`PathType`] and stored as a tag on
//! every path record; callers branch on it only at the storage boundary.

mod direction;
mod endpoint;
mod extension;
mod traversal;

pub use direction::{Direction, DirectionMetric};
pub use endpoint::EndpointPath;
pub use extension::{evaluate, DiscardReason, ExtensionEngine, ExtensionReport, Verdict};
pub use traversal::TraversalPath;

use crate::graph::{Term, TripleFilter};
use crate::process::StepDefinition;
use crate::state::ResourceStatus;
use crate::url::{crawl_target, CrawlTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Path variant of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    #[default]
    Traversal,
    Endpoint,
}

impl PathType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Traversal => "traversal",
            Self::Endpoint => "endpoint",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "traversal" => Some(Self::Traversal),
            "endpoint" => Some(Self::Endpoint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathStatus {
    Active,
    /// Superseded by its children after the head finished crawling
    Deleted,
}

impl PathStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Fields shared by both path variants
#[derive(Debug, Clone, PartialEq)]
pub struct PathMeta {
    /// Row id, `None` until persisted
    pub id: Option<i64>,
    pub process_id: i64,
    pub status: PathStatus,
    /// Index of the step this path was last extended under
    pub extended_step: usize,
    /// Crawl status of the head's resource, joined in at read time
    pub head_status: Option<ResourceStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PathMeta {
    pub fn new(process_id: i64, ctx: &SpawnContext) -> Self {
        Self {
            id: None,
            process_id,
            status: PathStatus::Active,
            extended_step: ctx.step_index,
            head_status: None,
            created_at: ctx.now,
            updated_at: ctx.now,
        }
    }
}

/// Parameters of the step a new path is created under
#[derive(Debug, Clone, Copy)]
pub struct SpawnContext {
    pub step_index: usize,
    pub max_path_length: u32,
    pub now: DateTime<Utc>,
}

impl SpawnContext {
    pub fn new(step_index: usize, step: &StepDefinition, now: DateTime<Utc>) -> Self {
        Self {
            step_index,
            max_path_length: step.max_path_length,
            now,
        }
    }
}

/// Behavior shared by the path variants
pub trait PathContract {
    fn meta(&self) -> &PathMeta;

    fn meta_mut(&mut self) -> &mut PathMeta;

    fn seed(&self) -> &str;

    fn head(&self) -> &Term;

    /// Node count from the seed to the head (shortest known route)
    fn length(&self) -> u32;

    /// Whether a node key is already part of this path
    fn contains_node(&self, key: &str) -> bool;

    /// Whether the predicate fits the step's distinct-predicate limit
    fn admits_predicate(&self, predicate: &str, step: &StepDefinition) -> bool;

    /// Creates the child path reached by following `predicate` to `new_head`
    fn spawn(&self, new_head: Term, predicate: &str, ctx: &SpawnContext) -> Self
    where
        Self: Sized;

    /// Content identity of the path within its process
    fn identity_key(&self) -> String;

    fn status(&self) -> PathStatus {
        self.meta().status
    }

    /// A literal head ends the path
    fn is_terminal(&self) -> bool {
        self.head().is_literal()
    }

    /// Selection of stored triples that may extend this path
    fn existing_triples_filter(&self) -> Option<TripleFilter> {
        self.head().as_named().map(|node| TripleFilter {
            node: node.to_string(),
        })
    }
}

/// A path of either variant
#[derive(Debug, Clone, PartialEq)]
pub enum Path {
    Traversal(TraversalPath),
    Endpoint(EndpointPath),
}

macro_rules! dispatch {
    ($self:expr, $path:ident => $body:expr) => {
        match $self {
            Path::Traversal($path) => $body,
            Path::Endpoint($path) => $body,
        }
    };
}

impl Path {
    /// Creates the seed path of a process
    pub fn new_seed(path_type: PathType, process_id: i64, seed: &str, ctx: &SpawnContext) -> Self {
        match path_type {
            PathType::Traversal => Self::Traversal(TraversalPath::new_seed(process_id, seed, ctx)),
            PathType::Endpoint => Self::Endpoint(EndpointPath::new_seed(process_id, seed, ctx)),
        }
    }

    pub fn path_type(&self) -> PathType {
        match self {
            Self::Traversal(_) => PathType::Traversal,
            Self::Endpoint(_) => PathType::Endpoint,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.meta().id
    }

    /// Whether the path may still be crawled or extended
    pub fn is_open(&self) -> bool {
        match self {
            Self::Traversal(path) => path.meta.status == PathStatus::Active,
            Self::Endpoint(path) => path.meta.status == PathStatus::Active && path.frontier,
        }
    }

    /// Resource and origin the head resolves to, if it is crawlable
    pub fn head_target(&self) -> Option<CrawlTarget> {
        self.head().as_named().and_then(crawl_target)
    }

    /// Whether the head's resource finished crawling
    pub fn head_is_settled(&self) -> bool {
        if self.is_terminal() {
            return true;
        }
        match self.meta().head_status {
            Some(status) => status.is_terminal(),
            // Heads that cannot be crawled never change
            None => self.head_target().is_none(),
        }
    }
}

impl PathContract for Path {
    fn meta(&self) -> &PathMeta {
        dispatch!(self, p => p.meta())
    }

    fn meta_mut(&mut self) -> &mut PathMeta {
        dispatch!(self, p => p.meta_mut())
    }

    fn seed(&self) -> &str {
        dispatch!(self, p => p.seed())
    }

    fn head(&self) -> &Term {
        dispatch!(self, p => p.head())
    }

    fn length(&self) -> u32 {
        dispatch!(self, p => p.length())
    }

    fn contains_node(&self, key: &str) -> bool {
        dispatch!(self, p => p.contains_node(key))
    }

    fn admits_predicate(&self, predicate: &str, step: &StepDefinition) -> bool {
        dispatch!(self, p => p.admits_predicate(predicate, step))
    }

    fn spawn(&self, new_head: Term, predicate: &str, ctx: &SpawnContext) -> Self {
        match self {
            Self::Traversal(p) => Self::Traversal(p.spawn(new_head, predicate, ctx)),
            Self::Endpoint(p) => Self::Endpoint(p.spawn(new_head, predicate, ctx)),
        }
    }

    fn identity_key(&self) -> String {
        dispatch!(self, p => p.identity_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Literal;

    fn ctx() -> SpawnContext {
        SpawnContext {
            step_index: 0,
            max_path_length: 3,
            now: Utc::now(),
        }
    }

    #[test]
    fn test_path_type_serde() {
        let json = serde_json::to_string(&PathType::Endpoint).unwrap();
        assert_eq!(json, "\"endpoint\"");
        assert_eq!(PathType::default(), PathType::Traversal);
    }

    #[test]
    fn test_seed_dispatch() {
        let traversal = Path::new_seed(PathType::Traversal, 1, "http://s1/x#me", &ctx());
        assert_eq!(traversal.path_type(), PathType::Traversal);
        assert_eq!(traversal.head(), &Term::named("http://s1/x#me"));

        let target = traversal.head_target().unwrap();
        assert_eq!(target.resource, "http://s1/x");

        let endpoint = Path::new_seed(PathType::Endpoint, 1, "http://s1", &ctx());
        assert!(endpoint.is_open());
    }

    #[test]
    fn test_literal_head_settled() {
        let seed = Path::new_seed(PathType::Traversal, 1, "http://s1", &ctx());
        let child = seed.spawn(Term::Literal(Literal::plain("x")), "http://p", &ctx());
        assert!(child.is_terminal());
        assert!(child.head_is_settled());
        assert!(child.existing_triples_filter().is_none());
    }

    #[test]
    fn test_unfetched_head_not_settled() {
        let mut seed = Path::new_seed(PathType::Traversal, 1, "http://s1", &ctx());
        assert!(!seed.head_is_settled());
        seed.meta_mut().head_status = Some(ResourceStatus::Done);
        assert!(seed.head_is_settled());
    }
}
