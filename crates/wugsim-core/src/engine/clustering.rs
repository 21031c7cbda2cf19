//! Clustering strategies.
//!
//! A [`Clusterer`] maps the annotated graph to a fresh [`Partition`] of its
//! observed nodes. Strategies are immutable and shareable; anything a strategy
//! remembers between calls lives in the [`ClusterState`] owned by the run.

use crate::engine::errors::SimError;
use crate::engine::graph::UsageGraph;
use crate::engine::partition::Partition;
use crate::engine::solver::{connected_components, solve, SolverParams};
use crate::engine::SimRng;

/// Per-run clustering memory, reset at run start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterState {
    /// Calls since the last full solve (`0` means the next call is full).
    degrade_step: u32,
}

impl ClusterState {
    pub fn degrade_step(&self) -> u32 {
        self.degrade_step
    }
}

/// Mutable inputs of one clustering call.
pub struct ClusterContext<'a> {
    pub rng: &'a mut SimRng,
    pub state: &'a mut ClusterState,
}

/// Trait for clustering implementations.
pub trait Clusterer: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a partition covering exactly `graph`'s observed nodes.
    fn cluster(
        &self,
        graph: &UsageGraph,
        ctx: &mut ClusterContext<'_>,
    ) -> Result<Partition, SimError>;
}

/// Correlation clustering of the signed view.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct CorrelationClusterer {
    pub solver: SolverParams,
    /// Warm-start from the graph's current partition.
    pub reuse_previous: bool,
}

impl CorrelationClusterer {
    pub fn new(params: SolverParams) -> Result<Self, SimError> {
        params.validate()?;
        Ok(Self {
            solver: params,
            reuse_previous: false,
        })
    }

    pub fn reusing_previous(mut self) -> Self {
        self.reuse_previous = true;
        self
    }
}

impl Clusterer for CorrelationClusterer {
    fn name(&self) -> &str {
        "correlation"
    }

    fn cluster(
        &self,
        graph: &UsageGraph,
        ctx: &mut ClusterContext<'_>,
    ) -> Result<Partition, SimError> {
        let warm = warm_start(graph, self.reuse_previous);
        let solution = solve(&graph.signed_view(), &self.solver, warm, ctx.rng)?;
        Ok(solution.partition)
    }
}

/// Correlation clustering with decaying budgets.
///
/// A full solve is followed by `max_degrade` calls that warm-start from the
/// previous partition with restart and iteration budgets divided by `2^k` on
/// the `k`-th call, after which the cycle starts over.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct TimeDegradingClusterer {
    pub solver: SolverParams,
    pub max_degrade: u32,
}

impl Default for TimeDegradingClusterer {
    fn default() -> Self {
        Self {
            solver: SolverParams::default(),
            max_degrade: 5,
        }
    }
}

impl TimeDegradingClusterer {
    pub fn new(params: SolverParams, max_degrade: u32) -> Result<Self, SimError> {
        params.validate()?;
        Ok(Self {
            solver: params,
            max_degrade,
        })
    }
}

impl Clusterer for TimeDegradingClusterer {
    fn name(&self) -> &str {
        "time_degrading"
    }

    fn cluster(
        &self,
        graph: &UsageGraph,
        ctx: &mut ClusterContext<'_>,
    ) -> Result<Partition, SimError> {
        let step = ctx.state.degrade_step;
        let params = self.solver.degraded(step);
        let warm = warm_start(graph, step > 0);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            step,
            restarts = params.max_restarts,
            iters = params.max_iters_per_restart,
            "time-degrading clustering"
        );

        let solution = solve(&graph.signed_view(), &params, warm, ctx.rng)?;
        ctx.state.degrade_step = (step + 1) % (self.max_degrade + 1);
        Ok(solution.partition)
    }
}

/// Connected components over positive edges; never searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectedComponentsClusterer;

impl Clusterer for ConnectedComponentsClusterer {
    fn name(&self) -> &str {
        "connected_components"
    }

    fn cluster(
        &self,
        graph: &UsageGraph,
        _ctx: &mut ClusterContext<'_>,
    ) -> Result<Partition, SimError> {
        connected_components(&graph.signed_view())
    }
}

fn warm_start(graph: &UsageGraph, reuse: bool) -> Option<&Partition> {
    let partition = graph.partition();
    (reuse && !partition.is_empty()).then_some(partition)
}
