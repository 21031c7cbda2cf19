use crate::engine::errors::SimError;
use crate::engine::graph::{NodeId, UsageGraph};
use crate::engine::stopping::{CriterionContext, StoppingCriterion};

/// Required number of observed edges between two stable clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum MinEdges {
    Count(usize),
    /// Every cross-cluster pair must be observed.
    Fully,
}

impl MinEdges {
    fn required(self, a: usize, b: usize) -> usize {
        match self {
            MinEdges::Count(n) => n,
            MinEdges::Fully => a * b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct ConnectivityParams {
    /// Clusters smaller than this are ignored.
    pub cluster_min_size: usize,
    pub min_num_edges: MinEdges,
    /// Size a lone stable cluster must reach; `None` means every observed node.
    pub min_size_one_cluster: Option<usize>,
}

impl Default for ConnectivityParams {
    fn default() -> Self {
        Self {
            cluster_min_size: 5,
            min_num_edges: MinEdges::Count(1),
            min_size_one_cluster: None,
        }
    }
}

/// Cluster connectivity: every pair of stable clusters is linked by enough
/// observed edges, or a single stable cluster is large enough.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connectivity {
    params: ConnectivityParams,
}

impl Connectivity {
    pub fn new(params: ConnectivityParams) -> Result<Self, SimError> {
        if params.cluster_min_size == 0 {
            return Err(SimError::config("cluster_min_size must be at least 1"));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &ConnectivityParams {
        &self.params
    }
}

impl StoppingCriterion for Connectivity {
    fn name(&self) -> &str {
        "connectivity"
    }

    fn requires_partition(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        _ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError> {
        let stable: Vec<&[NodeId]> = graph
            .partition()
            .clusters()
            .iter()
            .filter(|c| c.len() >= self.params.cluster_min_size)
            .map(Vec::as_slice)
            .collect();

        match stable.as_slice() {
            [] => Ok(false),
            [only] => {
                let needed = self
                    .params
                    .min_size_one_cluster
                    .unwrap_or_else(|| graph.node_count());
                Ok(only.len() >= needed)
            }
            _ => {
                for (i, a) in stable.iter().enumerate() {
                    for b in &stable[i + 1..] {
                        let needed = self.params.min_num_edges.required(a.len(), b.len());
                        if graph.edges_between(a, b) < needed {
                            return Ok(false);
                        }
                    }
                }
                Ok(true)
            }
        }
    }
}
