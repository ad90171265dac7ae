use crate::graph::Term;
use crate::paths::{PathContract, PathMeta, SpawnContext};
use crate::process::StepDefinition;
use sha2::{Digest, Sha256};

/// A path that records every node and distinct predicate from its seed
///
/// `nodes[0]` is the seed and the last node is the head's key.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalPath {
    pub meta: PathMeta,
    pub seed: String,
    pub head: Term,
    pub nodes: Vec<String>,
    pub predicates: Vec<String>,
}

impl TraversalPath {
    /// Seed path: a single node and no predicates
    pub fn new_seed(process_id: i64, seed: &str, ctx: &SpawnContext) -> Self {
        Self {
            meta: PathMeta::new(process_id, ctx),
            seed: seed.to_string(),
            head: Term::named(seed),
            nodes: vec![seed.to_string()],
            predicates: Vec::new(),
        }
    }
}

impl PathContract for TraversalPath {
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
        self.nodes.len() as u32
    }

    fn contains_node(&self, key: &str) -> bool {
        self.nodes.iter().any(|n| n == key)
    }

    fn admits_predicate(&self, predicate: &str, step: &StepDefinition) -> bool {
        self.predicates.iter().any(|p| p == predicate)
            || (self.predicates.len() as u32) < step.max_path_props
    }

    fn spawn(&self, new_head: Term, predicate: &str, ctx: &SpawnContext) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.push(new_head.node_key());

        let mut predicates = self.predicates.clone();
        if !predicates.iter().any(|p| p == predicate) {
            predicates.push(predicate.to_string());
        }

        Self {
            meta: PathMeta::new(self.meta.process_id, ctx),
            seed: self.seed.clone(),
            head: new_head,
            nodes,
            predicates,
        }
    }

    fn identity_key(&self) -> String {
        let mut hasher = Sha256::new();
        for node in &self.nodes {
            hasher.update(node.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([1u8]);
        for predicate in &self.predicates {
            hasher.update(predicate.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}
