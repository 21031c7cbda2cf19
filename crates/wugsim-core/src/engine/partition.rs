//! Node partitions with a canonical cluster-id ordering.
//!
//! Cluster `0` is always the largest cluster; clusters of equal size are ordered
//! by ascending minimum member id. Every constructor enforces this ordering and
//! rejects overlapping clusters, so downstream consumers can rely on stable ids.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::errors::SimError;
use crate::engine::graph::NodeId;

/// Label used for nodes that belong to no cluster (not yet observed).
pub const UNKNOWN_LABEL: i64 = -1;

/// Index of a cluster within a [`Partition`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterId(pub u32);

/// Disjoint clusters of nodes plus the inverse node → cluster index.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "Vec<Vec<NodeId>>", into = "Vec<Vec<NodeId>>")
)]
pub struct Partition {
    clusters: Vec<Vec<NodeId>>,
    membership: FxHashMap<NodeId, ClusterId>,
}

impl Partition {
    /// Builds a partition from node groups.
    ///
    /// Empty groups are dropped, members are sorted and clusters are put into
    /// canonical order. A node appearing twice is an invariant violation.
    pub fn from_clusters<I, C>(clusters: I) -> Result<Self, SimError>
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = NodeId>,
    {
        let groups: Vec<Vec<NodeId>> = clusters
            .into_iter()
            .map(|c| {
                let mut members: Vec<NodeId> = c.into_iter().collect();
                members.sort_unstable();
                members
            })
            .filter(|c| !c.is_empty())
            .collect();

        for group in &groups {
            if let Some(pair) = group.windows(2).find(|w| w[0] == w[1]) {
                return Err(SimError::invariant(format!(
                    "node {} listed twice in one cluster",
                    pair[0]
                )));
            }
        }

        let mut seen = FxHashSet::default();
        for node in groups.iter().flatten() {
            if !seen.insert(*node) {
                return Err(SimError::invariant(format!(
                    "node {} assigned to more than one cluster",
                    node
                )));
            }
        }

        Ok(Self::canonical(groups))
    }

    /// Orders disjoint, sorted, non-empty groups and indexes their members.
    fn canonical(mut groups: Vec<Vec<NodeId>>) -> Self {
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
        let membership = groups
            .iter()
            .enumerate()
            .flat_map(|(idx, group)| group.iter().map(move |n| (*n, ClusterId(idx as u32))))
            .collect();
        Self {
            clusters: groups,
            membership,
        }
    }

    /// One cluster per node.
    pub fn singletons(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let unique: BTreeSet<NodeId> = nodes.into_iter().collect();
        let clusters: Vec<Vec<NodeId>> = unique.into_iter().map(|n| vec![n]).collect();
        let membership = clusters
            .iter()
            .enumerate()
            .map(|(idx, c)| (c[0], ClusterId(idx as u32)))
            .collect();
        Self {
            clusters,
            membership,
        }
    }

    /// Builds a partition from a labeling: `nodes[i]` belongs to `labels[i]`.
    /// Label values are arbitrary and only used for grouping.
    pub fn from_labels(nodes: &[NodeId], labels: &[usize]) -> Result<Self, SimError> {
        if nodes.len() != labels.len() {
            return Err(SimError::invariant(format!(
                "labeling has {} labels for {} nodes",
                labels.len(),
                nodes.len()
            )));
        }
        let mut groups: FxHashMap<usize, Vec<NodeId>> = FxHashMap::default();
        for (node, label) in nodes.iter().zip(labels) {
            groups.entry(*label).or_default().push(*node);
        }
        Self::from_clusters(groups.into_values())
    }

    /// Clusters in canonical order, members ascending.
    pub fn clusters(&self) -> &[Vec<NodeId>] {
        &self.clusters
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&[NodeId]> {
        self.clusters.get(id.0 as usize).map(Vec::as_slice)
    }

    pub fn cluster_of(&self, node: NodeId) -> Option<ClusterId> {
        self.membership.get(&node).copied()
    }

    /// Cluster index as a signed label, [`UNKNOWN_LABEL`] if unassigned.
    pub fn label_of(&self, node: NodeId) -> i64 {
        self.cluster_of(node)
            .map(|c| i64::from(c.0))
            .unwrap_or(UNKNOWN_LABEL)
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Number of assigned nodes.
    pub fn node_count(&self) -> usize {
        self.membership.len()
    }

    /// Cluster sizes in cluster-id order (non-increasing).
    pub fn sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(Vec::len).collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.clusters.iter().flatten().copied()
    }

    /// Checks that the partition assigns exactly `nodes`, each once.
    pub fn check_covers(&self, nodes: &BTreeSet<NodeId>) -> Result<(), SimError> {
        if let Some(extra) = self.nodes().find(|n| !nodes.contains(n)) {
            return Err(SimError::invariant(format!(
                "partition contains unobserved node {}",
                extra
            )));
        }
        if let Some(missing) = nodes.iter().find(|n| !self.membership.contains_key(n)) {
            return Err(SimError::invariant(format!(
                "partition is missing node {}",
                missing
            )));
        }
        Ok(())
    }

    /// Keeps only the members in `nodes`, re-deriving the canonical order.
    /// Clusters left empty are dropped.
    pub fn restricted_to(&self, nodes: &BTreeSet<NodeId>) -> Self {
        let kept = self
            .clusters
            .iter()
            .map(|c| c.iter().copied().filter(|n| nodes.contains(n)).collect::<Vec<_>>())
            .filter(|c| !c.is_empty())
            .collect();
        Self::canonical(kept)
    }
}

impl TryFrom<Vec<Vec<NodeId>>> for Partition {
    type Error = SimError;

    fn try_from(clusters: Vec<Vec<NodeId>>) -> Result<Self, Self::Error> {
        Self::from_clusters(clusters)
    }
}

impl From<Partition> for Vec<Vec<NodeId>> {
    fn from(partition: Partition) -> Self {
        partition.clusters
    }
}
