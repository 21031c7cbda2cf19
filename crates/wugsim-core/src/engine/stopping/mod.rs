//! Stopping criteria.
//!
//! A criterion is a predicate over the annotated graph that signals the
//! simulation may halt. Criteria never mutate the graph they inspect. Anything
//! a criterion remembers between rounds (statistic histories for convergence
//! checks) lives in the [`CriterionContext`] handed in by the run, so one
//! criterion value can serve many runs.
//!
//! Criteria that read the partition report so through
//! [`StoppingCriterion::requires_partition`]; the engine refreshes a stale
//! partition before evaluating them.

mod bootstrap;
mod connectivity;
mod convergence;

pub use bootstrap::{
    BootstrapDivergence, BootstrapDivergenceParams, BootstrapPerturbation, PerturbationParams,
};
pub use connectivity::{Connectivity, ConnectivityParams, MinEdges};
pub use convergence::{
    weighted_slope, ApdConvergence, ConvergenceParams, EntropyConvergence, EntropyParams,
};

use crate::engine::errors::SimError;
use crate::engine::graph::UsageGraph;
use crate::engine::SimRng;

/// Mutable inputs of one criterion evaluation.
pub struct CriterionContext<'a> {
    pub rng: &'a mut SimRng,
    /// Per-run statistic history of this criterion.
    pub history: &'a mut Vec<f64>,
}

/// Trait for stopping criterion implementations.
pub trait StoppingCriterion: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `evaluate` reads the graph's partition.
    fn requires_partition(&self) -> bool {
        false
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError>;
}

/// Satisfied once the edges-added counter (duplicates included) reaches
/// `number_edges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgesAdded {
    pub number_edges: u64,
}

impl StoppingCriterion for EdgesAdded {
    fn name(&self) -> &str {
        "edges_added"
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        _ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError> {
        Ok(graph.edges_added() >= self.number_edges)
    }
}

/// Satisfied once `number_edges` distinct pairs have been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgesFound {
    pub number_edges: usize,
}

impl StoppingCriterion for EdgesFound {
    fn name(&self) -> &str {
        "edges_found"
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        _ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError> {
        Ok(graph.edge_count() >= self.number_edges)
    }
}

/// Satisfied once the observed distinct pairs reach `share` of
/// `total_edges`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeShareFound {
    pub share: f64,
    pub total_edges: usize,
}

impl EdgeShareFound {
    pub fn new(share: f64, total_edges: usize) -> Result<Self, SimError> {
        let criterion = Self { share, total_edges };
        criterion.validate()?;
        Ok(criterion)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&self.share) {
            return Err(SimError::config(format!(
                "edge share {} outside [0, 1]",
                self.share
            )));
        }
        Ok(())
    }
}

impl StoppingCriterion for EdgeShareFound {
    fn name(&self) -> &str {
        "edge_share_found"
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        _ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError> {
        Ok(graph.edge_count() as f64 >= self.share * self.total_edges as f64)
    }
}
