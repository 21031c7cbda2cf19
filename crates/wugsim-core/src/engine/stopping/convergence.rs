//! Convergence criteria over per-round statistics.
//!
//! Each evaluation appends one statistic to the run-owned history and reports
//! convergence once the weighted mean absolute slope of the last `timesteps`
//! entries drops below `threshold`. The slope against the entry `i` steps back
//! is weighted by `1 / i`, so recent changes dominate.

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::engine::errors::SimError;
use crate::engine::graph::{NodeId, UsageGraph};
use crate::engine::stopping::{CriterionContext, StoppingCriterion};

/// Weighted absolute slope of the last `timesteps` entries of `history`, or
/// `None` if the history is shorter.
pub fn weighted_slope(history: &[f64], timesteps: usize) -> Option<f64> {
    if timesteps < 2 || history.len() < timesteps {
        return None;
    }
    let last = history[history.len() - 1];
    let slope = (1..timesteps)
        .map(|i| {
            let earlier = history[history.len() - 1 - i];
            let step = i as f64;
            ((last - earlier) / step).abs() / step
        })
        .sum();
    Some(slope)
}

fn check_window(timesteps: usize, threshold: f64) -> Result<(), SimError> {
    if timesteps < 2 {
        return Err(SimError::config("timesteps must be at least 2"));
    }
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(SimError::config(format!(
            "convergence threshold {} must be finite and non-negative",
            threshold
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct ConvergenceParams {
    /// Edges sampled (with replacement) per round.
    pub sample_size: usize,
    pub timesteps: usize,
    pub threshold: f64,
}

impl Default for ConvergenceParams {
    fn default() -> Self {
        Self {
            sample_size: 50,
            timesteps: 5,
            threshold: 0.1,
        }
    }
}

/// Convergence of the average pointwise distance: the mean current weight of
/// a random sample of observed edges.
///
/// Only observed pairs with a weight are drawn. Drawing arbitrary node pairs
/// would hit unobserved pairs, which have no weight to average, as soon as
/// the annotated graph is incomplete.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApdConvergence {
    params: ConvergenceParams,
}

impl ApdConvergence {
    pub fn new(params: ConvergenceParams) -> Result<Self, SimError> {
        if params.sample_size == 0 {
            return Err(SimError::config("apd sample_size must be at least 1"));
        }
        check_window(params.timesteps, params.threshold)?;
        Ok(Self { params })
    }

    /// Mean weight over `sample_size` weighted edges drawn with replacement,
    /// `None` if no edge carries a weight yet.
    pub fn average_pointwise_distance(
        &self,
        graph: &UsageGraph,
        rng: &mut impl Rng,
    ) -> Option<f64> {
        let weights: Vec<f64> = graph.edges().filter_map(|(_, r)| r.weight()).collect();
        if weights.is_empty() {
            return None;
        }
        let total: f64 = (0..self.params.sample_size)
            .map(|_| weights[rng.gen_range(0..weights.len())])
            .sum();
        Some(total / self.params.sample_size as f64)
    }
}

impl StoppingCriterion for ApdConvergence {
    fn name(&self) -> &str {
        "apd_convergence"
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError> {
        let Some(apd) = self.average_pointwise_distance(graph, &mut *ctx.rng) else {
            return Ok(false);
        };
        ctx.history.push(apd);
        Ok(weighted_slope(ctx.history.as_slice(), self.params.timesteps)
            .is_some_and(|slope| slope < self.params.threshold))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct EntropyParams {
    /// Edges with a current weight at or above this count toward a node's
    /// degree.
    pub weight_threshold: f64,
    pub timesteps: usize,
    pub threshold: f64,
}

impl Default for EntropyParams {
    fn default() -> Self {
        Self {
            weight_threshold: 2.5,
            timesteps: 5,
            threshold: 0.1,
        }
    }
}

/// Convergence of an approximate node entropy of the unclustered graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntropyConvergence {
    params: EntropyParams,
}

impl EntropyConvergence {
    pub fn new(params: EntropyParams) -> Result<Self, SimError> {
        check_window(params.timesteps, params.threshold)?;
        Ok(Self { params })
    }

    /// `-(1/n) Σ log2((1 + d(v)) / n)` where `d(v)` counts the edges of `v`
    /// weighted at or above the threshold. `None` for an empty graph.
    ///
    /// Each pair counts once, by its current median weight, so repeated
    /// judgments of one pair never inflate a degree and a pair whose median
    /// falls below the threshold stops counting.
    pub fn entropy(&self, graph: &UsageGraph) -> Option<f64> {
        let n = graph.node_count();
        if n == 0 {
            return None;
        }
        let mut degree: FxHashMap<NodeId, usize> = FxHashMap::default();
        for (key, record) in graph.edges() {
            if record
                .weight()
                .is_some_and(|w| w >= self.params.weight_threshold)
            {
                *degree.entry(key.lo()).or_default() += 1;
                *degree.entry(key.hi()).or_default() += 1;
            }
        }
        let n = n as f64;
        let sum: f64 = graph
            .nodes()
            .map(|node| {
                let d = degree.get(&node).copied().unwrap_or(0) as f64;
                ((1.0 + d) / n).log2()
            })
            .sum();
        Some(-(sum / n))
    }
}

impl StoppingCriterion for EntropyConvergence {
    fn name(&self) -> &str {
        "entropy_convergence"
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError> {
        let Some(entropy) = self.entropy(graph) else {
            return Ok(false);
        };
        ctx.history.push(entropy);
        Ok(weighted_slope(ctx.history.as_slice(), self.params.timesteps)
            .is_some_and(|slope| slope < self.params.threshold))
    }
}
