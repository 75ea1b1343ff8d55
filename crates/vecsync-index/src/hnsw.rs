//! Hierarchical navigable small-world graph.
//!
//! Parameters tuned for quality over speed:
//! - M = 16 (connections per upper layer, 2*M on layer 0)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 50 (initial query beam, widened on demand)
//!
//! Nodes are addressed by dense `NodeId`s handed out by the allocator. The
//! graph has no notion of deletion: callers exclude tombstoned nodes through
//! the search predicate, and `rebuild` produces a fresh graph without them.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vecsync_types::{DistanceMetric, IndexSettings, NodeId};

use crate::distance::distance;
use crate::error::IndexError;
use crate::index::{FilteredSearch, IndexStats, Neighbor};

/// Levels above this are never assigned.
const MAX_LEVEL: usize = 16;

/// HNSW graph configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Embedding dimension (must match model)
    pub dimension: usize,
    /// Distance function, fixed for the lifetime of the graph
    pub metric: DistanceMetric,
    /// Number of connections per layer (M parameter)
    pub m: usize,
    /// Build-time search depth
    pub ef_construction: usize,
    /// Seed for level assignment
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            metric: DistanceMetric::Cosine,
            m: 16,
            ef_construction: 200,
            seed: 0x5eed,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            ..Default::default()
        }
    }

    pub fn from_settings(dimension: usize, settings: &IndexSettings) -> Self {
        Self {
            dimension,
            metric: settings.metric,
            m: settings.m,
            ef_construction: settings.ef_construction,
            seed: settings.seed,
        }
    }

    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Degree cap for a layer.
    fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    /// Outgoing edges per layer, index 0 is the bottom layer
    links: Vec<Vec<NodeId>>,
}

impl Node {
    fn level(&self) -> usize {
        self.links.len().saturating_sub(1)
    }
}

/// Search frontier entry, ordered by distance then id.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: NodeId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A node waiting to be installed by [`HnswGraph::apply_insert`].
#[derive(Debug, Clone)]
struct PlannedNode {
    id: NodeId,
    vector: Vec<f32>,
    level: usize,
    /// Construction candidates per layer, nearest first
    candidates: Vec<Vec<Candidate>>,
}

/// Neighbor choices for new nodes, computed against an unchanged graph.
#[derive(Debug, Clone)]
pub struct InsertPlan {
    /// Graph insertion count the plan was computed at
    inserted: u64,
    nodes: Vec<PlannedNode>,
}

impl InsertPlan {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }
}

/// The proximity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    config: HnswConfig,
    /// Slot per node id; `None` for ids not currently holding a vector
    nodes: Vec<Option<Node>>,
    len: usize,
    entry_point: Option<NodeId>,
    max_level: usize,
    /// Nodes inserted over the graph's lifetime; drives level assignment
    inserted: u64,
}

impl HnswGraph {
    pub fn new(config: HnswConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            len: 0,
            entry_point: None,
            max_level: 0,
            inserted: 0,
        }
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    /// Number of nodes holding a vector.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Vector stored at a node.
    pub fn vector(&self, id: NodeId) -> Option<&[f32]> {
        self.node(id).map(|n| n.vector.as_slice())
    }

    /// Ids of all nodes holding a vector, ascending.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| i as NodeId)
    }

    /// Outgoing edges of a node at a layer.
    pub fn neighbors(&self, id: NodeId, layer: usize) -> Option<&[NodeId]> {
        self.node(id)
            .and_then(|n| n.links.get(layer))
            .map(|l| l.as_slice())
    }

    pub fn stats(&self) -> IndexStats {
        let edges = self
            .nodes
            .iter()
            .flatten()
            .map(|n| n.links.iter().map(Vec::len).sum::<usize>())
            .sum();
        IndexStats {
            nodes: self.len,
            dimension: self.config.dimension,
            metric: self.config.metric,
            max_level: self.max_level,
            edges,
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize).and_then(Option::as_ref)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn distance_to(&self, query: &[f32], id: NodeId) -> f32 {
        match self.vector(id) {
            Some(v) => distance(self.config.metric, query, v),
            None => f32::INFINITY,
        }
    }

    /// Level for the insertion with the given lifetime ordinal. Depends only
    /// on the seed and the ordinal, so replaying the same inserts rebuilds the
    /// same graph.
    fn level_at(&self, ordinal: u64) -> usize {
        let m_l = 1.0 / (self.config.m.max(2) as f64).ln();
        let mut rng =
            StdRng::seed_from_u64(self.config.seed ^ ordinal.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let r: f64 = rng.random();
        let level = (-(1.0 - r).ln() * m_l).floor() as usize;
        level.min(MAX_LEVEL)
    }

    /// Insert a vector under the given id.
    pub fn insert(&mut self, id: NodeId, vector: Vec<f32>) -> Result<(), IndexError> {
        let plan = self.plan_insert(vec![(id, vector)])?;
        self.apply_insert(plan)
    }

    /// Search neighbors for a group of new nodes without touching the graph.
    ///
    /// Every node is planned against the graph as it is now; nodes of the
    /// same group are linked to each other when the plan is applied.
    pub fn plan_insert(&self, items: Vec<(NodeId, Vec<f32>)>) -> Result<InsertPlan, IndexError> {
        let mut ids = HashSet::with_capacity(items.len());
        let mut nodes = Vec::with_capacity(items.len());
        for (i, (id, vector)) in items.into_iter().enumerate() {
            self.check_dimension(&vector)?;
            if self.contains(id) || !ids.insert(id) {
                return Err(IndexError::DuplicateNode(id));
            }
            let level = self.level_at(self.inserted + i as u64);
            let candidates = self.candidates_for(&vector, level);
            nodes.push(PlannedNode {
                id,
                vector,
                level,
                candidates,
            });
        }
        Ok(InsertPlan {
            inserted: self.inserted,
            nodes,
        })
    }

    /// Per-layer construction candidates for a vector placed at `level`.
    fn candidates_for(&self, query: &[f32], level: usize) -> Vec<Vec<Candidate>> {
        let mut layers = vec![Vec::new(); level + 1];
        let Some(entry) = self.entry_point else {
            return layers;
        };

        let mut entry_points = vec![Candidate {
            distance: self.distance_to(query, entry),
            id: entry,
        }];
        for layer in (level + 1..=self.max_level).rev() {
            entry_points = self.search_layer(query, &entry_points, 1, layer);
        }
        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(query, &entry_points, self.config.ef_construction, layer);
            if !found.is_empty() {
                entry_points = found.clone();
            }
            layers[layer] = found;
        }
        layers
    }

    /// Install planned nodes and their edges.
    ///
    /// Fails with `StalePlan` if anything was inserted since the plan was made.
    pub fn apply_insert(&mut self, plan: InsertPlan) -> Result<(), IndexError> {
        if plan.inserted != self.inserted {
            return Err(IndexError::StalePlan {
                planned: plan.inserted,
                current: self.inserted,
            });
        }

        let members: Vec<(NodeId, usize)> = plan.nodes.iter().map(|n| (n.id, n.level)).collect();
        let mut pending = Vec::with_capacity(plan.nodes.len());
        for node in plan.nodes {
            let slot = node.id as usize;
            if self.nodes.len() <= slot {
                self.nodes.resize_with(slot + 1, || None);
            }
            self.nodes[slot] = Some(Node {
                vector: node.vector,
                links: vec![Vec::new(); node.level + 1],
            });
            self.len += 1;
            self.inserted += 1;
            pending.push((node.id, node.level, node.candidates));
        }

        for (id, level, mut layers) in pending {
            let Some(query) = self.vector(id).map(<[f32]>::to_vec) else {
                continue;
            };
            for (layer, found) in layers.iter_mut().enumerate() {
                for &(other, other_level) in &members {
                    if other != id && other_level >= layer {
                        found.push(Candidate {
                            distance: self.distance_to(&query, other),
                            id: other,
                        });
                    }
                }
                found.sort();
                found.dedup_by_key(|c| c.id);

                // Earlier group members may already have linked to this node
                let selected = self.select_neighbors(&found[..], self.config.m);
                for neighbor in &selected {
                    if !self.has_edge(id, neighbor.id, layer) {
                        self.link(id, neighbor.id, layer);
                    }
                    if !self.has_edge(neighbor.id, id, layer) {
                        self.link(neighbor.id, id, layer);
                    }
                }
            }

            if self.entry_point.is_none() || level > self.max_level {
                debug!(node_id = id, level, "New graph entry point");
                self.max_level = level;
                self.entry_point = Some(id);
            }
        }
        Ok(())
    }

    fn has_edge(&self, from: NodeId, to: NodeId, layer: usize) -> bool {
        self.neighbors(from, layer).is_some_and(|links| links.contains(&to))
    }

    /// Add edge `from -> to` on a layer, shrinking `from`'s list when it
    /// exceeds the degree cap.
    fn link(&mut self, from: NodeId, to: NodeId, layer: usize) {
        let cap = self.config.max_degree(layer);
        let (base, links) = {
            let Some(node) = self.nodes.get_mut(from as usize).and_then(Option::as_mut) else {
                return;
            };
            let Some(links) = node.links.get_mut(layer) else {
                return;
            };
            links.push(to);
            if links.len() <= cap {
                return;
            }
            (node.vector.clone(), links.clone())
        };

        let mut candidates: Vec<Candidate> = links
            .iter()
            .map(|&n| Candidate {
                distance: self.distance_to(&base, n),
                id: n,
            })
            .collect();
        candidates.sort();
        let kept: Vec<NodeId> = self
            .select_neighbors(&candidates, cap)
            .into_iter()
            .map(|c| c.id)
            .collect();

        if let Some(node) = self.nodes.get_mut(from as usize).and_then(Option::as_mut) {
            node.links[layer] = kept;
        }
    }

    /// Diversity-aware neighbor selection.
    ///
    /// A candidate is kept only if it is closer to the base than to every
    /// neighbor already kept; the remaining slots are filled with the
    /// closest discarded candidates.
    fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Vec<Candidate> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        let mut discarded = Vec::new();

        for &candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let Some(cv) = self.vector(candidate.id) else {
                continue;
            };
            let diverse = selected
                .iter()
                .all(|s| self.distance_to(cv, s.id) > candidate.distance);
            if diverse {
                selected.push(candidate);
            } else {
                discarded.push(candidate);
            }
        }

        for candidate in discarded {
            if selected.len() >= m {
                break;
            }
            selected.push(candidate);
        }
        selected
    }

    /// Bounded best-first search on one layer. Returns up to `ef` nodes
    /// ordered by ascending distance.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[Candidate],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let ef = ef.max(1);
        let mut visited: HashSet<NodeId> = entry_points.iter().map(|c| c.id).collect();
        let mut frontier: BinaryHeap<Reverse<Candidate>> =
            entry_points.iter().copied().map(Reverse).collect();
        let mut results: BinaryHeap<Candidate> = entry_points.iter().copied().collect();
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
            if current.distance > worst && results.len() >= ef {
                break;
            }
            let Some(links) = self.neighbors(current.id, layer) else {
                continue;
            };
            for &n in links {
                if !visited.insert(n) {
                    continue;
                }
                let d = self.distance_to(query, n);
                let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
                if results.len() < ef || d < worst {
                    let candidate = Candidate { distance: d, id: n };
                    frontier.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Greedy descent from the entry point to layer 0.
    fn descend(&self, query: &[f32]) -> Option<Vec<Candidate>> {
        let entry = self.entry_point?;
        let mut entry_points = vec![Candidate {
            distance: self.distance_to(query, entry),
            id: entry,
        }];
        for layer in (1..=self.max_level).rev() {
            entry_points = self.search_layer(query, &entry_points, 1, layer);
        }
        Some(entry_points)
    }

    /// k-NN search restricted to nodes accepted by `accept`.
    ///
    /// The bottom-layer beam starts at `max(ef, k)`. When fewer than `k`
    /// accepted nodes are found and the beam was full, the beam doubles, up
    /// to `max_ef`, before a short result is returned.
    pub fn search<F>(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        max_ef: usize,
        accept: F,
    ) -> Result<FilteredSearch, IndexError>
    where
        F: Fn(NodeId) -> bool,
    {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(FilteredSearch::default());
        }
        let Some(entry_points) = self.descend(query) else {
            return Ok(FilteredSearch::default());
        };

        let cap = max_ef.max(k);
        let mut ef = ef.max(k).min(cap);
        let mut widened = false;

        loop {
            let found = self.search_layer(query, &entry_points, ef, 0);
            let exhausted = found.len() < ef;
            let hits: Vec<Neighbor> = found
                .iter()
                .filter(|c| accept(c.id))
                .take(k)
                .map(|c| Neighbor {
                    node_id: c.id,
                    distance: c.distance,
                })
                .collect();

            if hits.len() >= k || exhausted || ef >= cap {
                if widened {
                    debug!(ef, hits = hits.len(), k, "Search beam widened");
                }
                return Ok(FilteredSearch {
                    hits,
                    ef_used: ef,
                    widened,
                });
            }

            ef = (ef * 2).min(cap);
            widened = true;
        }
    }

    /// Build a fresh graph holding only the nodes in `remap`, each under its
    /// new id. Nodes are inserted in ascending old-id order.
    pub fn rebuild(&self, remap: &BTreeMap<NodeId, NodeId>) -> Result<HnswGraph, IndexError> {
        let mut fresh = HnswGraph::new(self.config.clone());
        for (&old, &new) in remap {
            let vector = self.vector(old).ok_or(IndexError::UnknownNode(old))?;
            fresh.insert(new, vector.to_vec())?;
        }
        info!(
            before = self.len,
            after = fresh.len,
            "Rebuilt graph without tombstoned nodes"
        );
        Ok(fresh)
    }

    /// Check structural invariants: every edge targets a present node on a
    /// layer that node lives on, vectors have the configured width, and the
    /// entry point exists at the top level.
    pub fn verify(&self) -> Result<(), IndexError> {
        let present = self.nodes.iter().filter(|n| n.is_some()).count();
        if present != self.len {
            return Err(IndexError::Invariant(format!(
                "node count {} does not match {} occupied slots",
                self.len, present
            )));
        }

        for (slot, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            if node.vector.len() != self.config.dimension {
                return Err(IndexError::Invariant(format!(
                    "node {} has dimension {}, expected {}",
                    slot,
                    node.vector.len(),
                    self.config.dimension
                )));
            }
            for (layer, links) in node.links.iter().enumerate() {
                for &target in links {
                    match self.node(target) {
                        Some(t) if t.level() >= layer => {}
                        _ => {
                            return Err(IndexError::Invariant(format!(
                                "node {} has dangling edge to {} on layer {}",
                                slot, target, layer
                            )))
                        }
                    }
                }
            }
        }

        match self.entry_point {
            None if self.len > 0 => Err(IndexError::Invariant(
                "non-empty graph without entry point".into(),
            )),
            Some(ep) => match self.node(ep) {
                Some(n) if n.level() == self.max_level => Ok(()),
                _ => Err(IndexError::Invariant(format!(
                    "entry point {} missing or below top level",
                    ep
                ))),
            },
            None => Ok(()),
        }
    }
}
