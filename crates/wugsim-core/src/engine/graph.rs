//! # Word Usage Graph
//!
//! This module implements the signed, weighted graph that both the reference
//! ("true") graph and the incrementally annotated graph are built from.
//!
//! ## Key Components
//!
//! - **EdgeRecord**: append-only annotation history for one node pair plus the
//!   current weight (median of the informative annotations)
//! - **UsageGraph**: bounded node-id space, edge records, the current
//!   [`Partition`] and the monotonic edges-added counter
//! - **SignedGraph**: read-only solver input where every edge weight has been
//!   recentred around [`NEUTRAL_WEIGHT`]
//!
//! ## Design
//!
//! - Signed weights are always computed from the current weight on demand and
//!   never stored, so they cannot drift from the history.
//! - The current weight is recomputed on every annotation and is therefore
//!   not monotonic: a late outlier can flip an edge from positive to negative.
//! - Edges live in a `BTreeMap` keyed by the ordered node pair so that iteration
//!   order (and hence seeded sampling over edges) is deterministic.
//!
//! ## Example
//!
//! ```rust
//! use wugsim_core::engine::graph::{NodeId, Observation, UsageGraph};
//!
//! let mut graph = UsageGraph::with_bound(4);
//! graph.ingest(&[Observation::new(0, 1, 4.0), Observation::new(0, 1, 3.0)]).unwrap();
//! assert_eq!(graph.weight(NodeId(0), NodeId(1)), Some(3.5));
//! assert_eq!(graph.edges_added(), 2);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use smallvec::SmallVec;

use crate::engine::errors::SimError;
use crate::engine::partition::{Partition, UNKNOWN_LABEL};

/// Annotation value that maps to a signed weight of zero.
///
/// Judgments are on a 1–4 relatedness scale; 2.5 is the midpoint between
/// "different" (1, 2) and "same" (3, 4).
pub const NEUTRAL_WEIGHT: f64 = 2.5;

/// Raw annotation value meaning "no relation could be judged".
///
/// Recorded in the history and counted as an added edge, but ignored when the
/// current weight is computed.
pub const NO_RELATION: f64 = 0.0;

/// A node (word usage) identifier.
///
/// Ids are dense in `0..bound` for a given graph.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl NodeId {
    /// Index form of the id.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeId {
    fn from(v: u32) -> Self {
        NodeId(v)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unordered node pair. Always stored with `lo < hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct EdgeKey {
    lo: NodeId,
    hi: NodeId,
}

impl EdgeKey {
    /// Builds the key for `{u, v}`. Returns `None` for a self loop.
    pub fn new(u: NodeId, v: NodeId) -> Option<Self> {
        match u.cmp(&v) {
            std::cmp::Ordering::Less => Some(Self { lo: u, hi: v }),
            std::cmp::Ordering::Greater => Some(Self { lo: v, hi: u }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn lo(&self) -> NodeId {
        self.lo
    }

    pub fn hi(&self) -> NodeId {
        self.hi
    }

    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.lo, self.hi)
    }
}

/// A single annotation of a node pair, as produced by a sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Observation {
    pub u: NodeId,
    pub v: NodeId,
    pub weight: f64,
}

impl Observation {
    pub fn new(u: u32, v: u32, weight: f64) -> Self {
        Self {
            u: NodeId(u),
            v: NodeId(v),
            weight,
        }
    }
}

/// Annotation history and current weight of one node pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeRecord {
    history: SmallVec<[f64; 4]>,
    weight: Option<f64>,
}

impl EdgeRecord {
    fn push(&mut self, value: f64) {
        self.history.push(value);
        self.weight = median_of_judgments(&self.history);
    }

    fn reset(&mut self, value: f64) {
        self.history.clear();
        self.push(value);
    }

    /// Every annotation received for this pair, in arrival order.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Median of the informative annotations, `None` if every annotation so far
    /// was [`NO_RELATION`].
    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    /// Current weight recentred around [`NEUTRAL_WEIGHT`]. Positive values are
    /// same-cluster evidence, negative values different-cluster evidence.
    pub fn signed_weight(&self) -> Option<f64> {
        self.weight.map(|w| w - NEUTRAL_WEIGHT)
    }

    /// Number of annotations received.
    pub fn annotations(&self) -> usize {
        self.history.len()
    }
}

/// Median of all non-[`NO_RELATION`] values (mean of the two middle values for
/// an even count).
pub fn median_of_judgments(values: &[f64]) -> Option<f64> {
    let mut informative: SmallVec<[f64; 8]> =
        values.iter().copied().filter(|v| *v != NO_RELATION).collect();
    if informative.is_empty() {
        return None;
    }
    informative.sort_by(f64::total_cmp);
    let mid = informative.len() / 2;
    if informative.len() % 2 == 1 {
        Some(informative[mid])
    } else {
        Some((informative[mid - 1] + informative[mid]) / 2.0)
    }
}

/// Bounded, undirected word usage graph with annotation histories and a
/// partition over its observed nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageGraph {
    bound: usize,
    nodes: BTreeSet<NodeId>,
    edges: BTreeMap<EdgeKey, EdgeRecord>,
    partition: Partition,
    edges_added: u64,
}

impl UsageGraph {
    /// Creates an empty graph whose node ids must lie in `0..bound`.
    pub fn with_bound(bound: usize) -> Self {
        Self {
            bound,
            ..Self::default()
        }
    }

    /// Creates a graph with all `bound` nodes present and no edges. Used for
    /// reference graphs, which are fixed-size from the start.
    pub fn with_all_nodes(bound: usize) -> Self {
        let mut graph = Self::with_bound(bound);
        graph.nodes = (0..bound as u32).map(NodeId).collect();
        graph
    }

    /// Upper bound of the node-id space.
    pub fn bound(&self) -> usize {
        self.bound
    }

    fn check_observation(&self, obs: &Observation) -> Result<EdgeKey, SimError> {
        for node in [obs.u, obs.v] {
            if node.index() >= self.bound {
                return Err(SimError::InvalidObservation(format!(
                    "node {} outside graph bound {}",
                    node, self.bound
                )));
            }
        }
        if !obs.weight.is_finite() {
            return Err(SimError::InvalidObservation(format!(
                "non-finite weight {} for pair ({}, {})",
                obs.weight, obs.u, obs.v
            )));
        }
        EdgeKey::new(obs.u, obs.v).ok_or_else(|| {
            SimError::InvalidObservation(format!("self loop on node {}", obs.u))
        })
    }

    /// Appends one annotation to the pair's history and recomputes its weight.
    ///
    /// Increments the edges-added counter by exactly one, also for repeated
    /// pairs.
    pub fn add_observation(&mut self, obs: Observation) -> Result<(), SimError> {
        let key = self.check_observation(&obs)?;
        self.nodes.insert(key.lo);
        self.nodes.insert(key.hi);
        self.edges.entry(key).or_default().push(obs.weight);
        self.edges_added += 1;
        Ok(())
    }

    /// Ingests a batch of observations in order.
    ///
    /// The whole batch is validated first; on error nothing is applied.
    /// Returns the number of observations ingested.
    pub fn ingest(&mut self, observations: &[Observation]) -> Result<usize, SimError> {
        for obs in observations {
            self.check_observation(obs)?;
        }
        for obs in observations {
            self.add_observation(*obs)?;
        }
        Ok(observations.len())
    }

    /// Sets the weight of a pair, replacing any history. Does not count as an
    /// added edge; used to build reference graphs.
    pub fn set_weight(&mut self, u: NodeId, v: NodeId, weight: f64) -> Result<(), SimError> {
        let key = self.check_observation(&Observation { u, v, weight })?;
        self.nodes.insert(key.lo);
        self.nodes.insert(key.hi);
        self.edges.entry(key).or_default().reset(weight);
        Ok(())
    }

    pub fn record(&self, u: NodeId, v: NodeId) -> Option<&EdgeRecord> {
        EdgeKey::new(u, v).and_then(|key| self.edges.get(&key))
    }

    /// Current (median) weight of a pair.
    pub fn weight(&self, u: NodeId, v: NodeId) -> Option<f64> {
        self.record(u, v).and_then(EdgeRecord::weight)
    }

    /// Current weight recentred around [`NEUTRAL_WEIGHT`].
    pub fn signed_weight(&self, u: NodeId, v: NodeId) -> Option<f64> {
        self.record(u, v).and_then(EdgeRecord::signed_weight)
    }

    /// Annotation history of a pair; empty if never observed.
    pub fn history(&self, u: NodeId, v: NodeId) -> &[f64] {
        self.record(u, v).map(EdgeRecord::history).unwrap_or(&[])
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Observed nodes in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn node_set(&self) -> &BTreeSet<NodeId> {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Observed pairs in ascending key order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeKey, &EdgeRecord)> + '_ {
        self.edges.iter().map(|(k, r)| (*k, r))
    }

    /// Number of distinct observed pairs.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of individual observations ingested, duplicates included.
    pub fn edges_added(&self) -> u64 {
        self.edges_added
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Replaces the partition wholesale.
    ///
    /// The partition must cover exactly the observed nodes.
    pub fn set_partition(&mut self, partition: Partition) -> Result<(), SimError> {
        partition.check_covers(&self.nodes)?;
        self.partition = partition;
        Ok(())
    }

    /// Observed nodes that the current partition does not know about yet.
    pub fn unclustered_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .copied()
            .filter(|n| self.partition.cluster_of(*n).is_none())
            .collect()
    }

    /// Sizes of the current clusters, largest first.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.partition.sizes()
    }

    /// Cluster label for every id in `0..bound`, [`UNKNOWN_LABEL`] for nodes
    /// without a cluster.
    pub fn labels(&self) -> Vec<i64> {
        (0..self.bound as u32)
            .map(|i| self.partition.label_of(NodeId(i)))
            .collect()
    }

    /// Builds the solver input: observed nodes and every edge that currently
    /// has a weight, recentred around [`NEUTRAL_WEIGHT`].
    pub fn signed_view(&self) -> SignedGraph {
        let edges = self
            .edges
            .iter()
            .filter_map(|(key, record)| {
                record.signed_weight().map(|weight| SignedEdge {
                    u: key.lo,
                    v: key.hi,
                    weight,
                })
            })
            .collect();
        SignedGraph {
            nodes: self.nodes.iter().copied().collect(),
            edges,
        }
    }

    /// Counts observed pairs with one endpoint in `a` and the other in `b`.
    pub fn edges_between(&self, a: &[NodeId], b: &[NodeId]) -> usize {
        let mut count = 0;
        for u in a {
            for v in b {
                if self.record(*u, *v).is_some() {
                    count += 1;
                }
            }
        }
        count
    }
}

impl fmt::Display for UsageGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nodes: {}/{}, edges: {}, judgments: {}, clusters: {}",
            self.node_count(),
            self.bound,
            self.edge_count(),
            self.edges_added,
            self.partition.len()
        )
    }
}

/// An edge of a [`SignedGraph`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignedEdge {
    pub u: NodeId,
    pub v: NodeId,
    pub weight: f64,
}

/// Solver input: a node set plus edges whose weights are already signed.
///
/// Positive weight is same-cluster evidence, negative weight different-cluster
/// evidence, zero is no evidence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignedGraph {
    nodes: Vec<NodeId>,
    edges: Vec<SignedEdge>,
}

impl SignedGraph {
    /// Builds a signed graph, validating that every edge endpoint is one of
    /// `nodes` and every weight is finite.
    pub fn new(
        nodes: impl IntoIterator<Item = NodeId>,
        edges: Vec<SignedEdge>,
    ) -> Result<Self, SimError> {
        let node_set: BTreeSet<NodeId> = nodes.into_iter().collect();
        for edge in &edges {
            if edge.u == edge.v {
                return Err(SimError::config(format!("self loop on node {}", edge.u)));
            }
            if !node_set.contains(&edge.u) || !node_set.contains(&edge.v) {
                return Err(SimError::config(format!(
                    "edge ({}, {}) references a node outside the node set",
                    edge.u, edge.v
                )));
            }
            if !edge.weight.is_finite() {
                return Err(SimError::config(format!(
                    "edge ({}, {}) has non-finite weight",
                    edge.u, edge.v
                )));
            }
        }
        Ok(Self {
            nodes: node_set.into_iter().collect(),
            edges,
        })
    }

    /// Builds a signed graph whose node set is the union of edge endpoints.
    pub fn from_edges(edges: impl IntoIterator<Item = (u32, u32, f64)>) -> Result<Self, SimError> {
        let edges: Vec<SignedEdge> = edges
            .into_iter()
            .map(|(u, v, weight)| SignedEdge {
                u: NodeId(u),
                v: NodeId(v),
                weight,
            })
            .collect();
        let nodes: Vec<NodeId> = edges.iter().flat_map(|e| [e.u, e.v]).collect();
        Self::new(nodes, edges)
    }

    /// Nodes in ascending order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn edges(&self) -> &[SignedEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
