use crate::graph::Term;
use crate::paths::{PathContract, PathMeta, SpawnContext};
use crate::process::StepDefinition;
use std::collections::BTreeMap;

/// A path that only remembers its head and the shortest hop count from each
/// seed that reaches it
///
/// There is one endpoint path per head within a process. No node history is
/// kept, so cycles are only cut by the hop-count comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointPath {
    pub meta: PathMeta,
    /// Seed this head was first reached from
    pub seed: String,
    pub head: Term,
    /// Seed URL to shortest hop count
    pub seed_paths: BTreeMap<String, u32>,
    /// Whether the head may still be crawled or extended
    pub frontier: bool,
}

impl EndpointPath {
    pub fn new_seed(process_id: i64, seed: &str, ctx: &SpawnContext) -> Self {
        Self {
            meta: PathMeta::new(process_id, ctx),
            seed: seed.to_string(),
            head: Term::named(seed),
            seed_paths: BTreeMap::from([(seed.to_string(), 0)]),
            frontier: true,
        }
    }

    pub fn min_hops(&self) -> u32 {
        self.seed_paths.values().copied().min().unwrap_or(0)
    }

    /// Merges hop counts of another path to the same head, keeping the
    /// shortest per seed; returns true if any count improved
    pub fn merge_seed_paths(&mut self, other: &BTreeMap<String, u32>) -> bool {
        let mut improved = false;
        for (seed, hops) in other {
            match self.seed_paths.get(seed) {
                Some(existing) if existing <= hops => {}
                _ => {
                    self.seed_paths.insert(seed.clone(), *hops);
                    improved = true;
                }
            }
        }
        improved
    }
}

impl PathContract for EndpointPath {
    fn meta(&self) -> &PathMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut PathMeta {
        &mut self.meta
    }

    fn seed(&self) -> &str {
        &self.seed
    }

    fn head(&self) -> &Term {
        &self.head
    }

    fn length(&self) -> u32 {
        self.min_hops() + 1
    }

    fn contains_node(&self, key: &str) -> bool {
        self.head.node_key() == key || self.seed_paths.contains_key(key)
    }

    fn admits_predicate(&self, _predicate: &str, _step: &StepDefinition) -> bool {
        true
    }

    fn spawn(&self, new_head: Term, _predicate: &str, ctx: &SpawnContext) -> Self {
        // A seed whose route would exceed the step's length does not reach the new head
        let seed_paths: BTreeMap<String, u32> = self
            .seed_paths
            .iter()
            .map(|(seed, hops)| (seed.clone(), hops + 1))
            .filter(|(_, hops)| hops + 1 <= ctx.max_path_length)
            .collect();

        Self {
            meta: PathMeta::new(self.meta.process_id, ctx),
            seed: self.seed.clone(),
            frontier: !new_head.is_literal(),
            head: new_head,
            seed_paths,
        }
    }

    fn identity_key(&self) -> String {
        self.head.node_key()
    }
}
