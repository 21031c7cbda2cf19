//! Reference ("true") graph recipes.

use crate::engine::errors::SimError;
use crate::engine::graph::{NodeId, UsageGraph};
use crate::engine::partition::Partition;

/// Complete graph over `sizes.iter().sum()` nodes whose true partition groups
/// consecutive ids into clusters of the given sizes.
///
/// Pairs inside a cluster weigh `within`, pairs across clusters `between`.
/// The returned graph's partition is the planted one.
///
/// ```rust
/// use wugsim_core::engine::graph::NodeId;
/// use wugsim_core::engine::reference::planted_partition;
///
/// let g = planted_partition(&[2, 1], 4.0, 1.0).unwrap();
/// assert_eq!(g.edge_count(), 3);
/// assert_eq!(g.weight(NodeId(0), NodeId(1)), Some(4.0));
/// assert_eq!(g.cluster_sizes(), vec![2, 1]);
/// ```
pub fn planted_partition(
    sizes: &[usize],
    within: f64,
    between: f64,
) -> Result<UsageGraph, SimError> {
    if !within.is_finite() || !between.is_finite() {
        return Err(SimError::config("planted partition weights must be finite"));
    }
    let total: usize = sizes.iter().sum();
    if total > u32::MAX as usize {
        return Err(SimError::config(format!("{} nodes exceed the id space", total)));
    }

    let mut clusters: Vec<Vec<NodeId>> = Vec::with_capacity(sizes.len());
    let mut next = 0u32;
    for size in sizes {
        clusters.push((next..next + *size as u32).map(NodeId).collect());
        next += *size as u32;
    }
    let cluster_of: Vec<usize> = clusters
        .iter()
        .enumerate()
        .flat_map(|(idx, c)| std::iter::repeat(idx).take(c.len()))
        .collect();

    let mut graph = UsageGraph::with_all_nodes(total);
    for u in 0..total {
        for v in u + 1..total {
            let weight = if cluster_of[u] == cluster_of[v] {
                within
            } else {
                between
            };
            graph.set_weight(NodeId(u as u32), NodeId(v as u32), weight)?;
        }
    }
    graph.set_partition(Partition::from_clusters(clusters)?)?;
    Ok(graph)
}
