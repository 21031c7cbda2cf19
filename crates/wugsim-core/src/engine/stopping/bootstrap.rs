//! Bootstrap stability criteria.
//!
//! Both criteria stay unsatisfied until the graph has observed
//! `min_sample_size` nodes and carries a non-empty partition.

use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::index;
use rand::Rng;

use crate::engine::clustering::{ClusterContext, ClusterState, Clusterer};
use crate::engine::errors::SimError;
use crate::engine::graph::{EdgeKey, Observation, UsageGraph};
use crate::engine::stopping::{CriterionContext, StoppingCriterion};
use crate::engine::SimRng;
use crate::metrics::{adjusted_rand_index, jensen_shannon_distance, percentile};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct BootstrapDivergenceParams {
    pub min_sample_size: usize,
    pub rounds: usize,
    /// Nodes drawn (with replacement) per resample.
    pub sample_size: usize,
    /// Confidence level; the upper bound of the central `alpha` interval is
    /// compared against `bound`.
    pub alpha: f64,
    pub bound: f64,
}

impl Default for BootstrapDivergenceParams {
    fn default() -> Self {
        Self {
            min_sample_size: 100,
            rounds: 30,
            sample_size: 150,
            alpha: 0.95,
            bound: 0.05,
        }
    }
}

impl BootstrapDivergenceParams {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.rounds == 0 || self.sample_size == 0 {
            return Err(SimError::config(
                "bootstrap rounds and sample_size must be at least 1",
            ));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(SimError::config(format!(
                "alpha {} outside (0, 1]",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.bound) {
            return Err(SimError::config(format!(
                "bound {} outside [0, 1]",
                self.bound
            )));
        }
        Ok(())
    }

    /// Percentile (0..=100) of the upper end of the central `alpha` interval.
    fn upper_percentile(&self) -> f64 {
        (self.alpha + (1.0 - self.alpha) / 2.0) * 100.0
    }
}

/// Resamples the cluster-size distribution and checks that the squared
/// Jensen-Shannon distance of the resamples to the observed distribution is
/// small with confidence `alpha`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapDivergence {
    params: BootstrapDivergenceParams,
}

impl BootstrapDivergence {
    pub fn new(params: BootstrapDivergenceParams) -> Result<Self, SimError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &BootstrapDivergenceParams {
        &self.params
    }

    /// Upper confidence percentile of the resampled divergences, `None` while
    /// the graph is too small to judge.
    pub fn statistic(
        &self,
        graph: &UsageGraph,
        rng: &mut impl Rng,
    ) -> Result<Option<f64>, SimError> {
        let sizes = graph.cluster_sizes();
        if graph.node_count() < self.params.min_sample_size || sizes.is_empty() {
            return Ok(None);
        }
        let observed: Vec<f64> = sizes.iter().map(|s| *s as f64).collect();
        let picker = WeightedIndex::new(sizes.iter().copied())
            .map_err(|e| SimError::Numerical(format!("cluster size weights: {}", e)))?;

        let mut stats = Vec::with_capacity(self.params.rounds);
        let mut resample = vec![0.0; sizes.len()];
        for _ in 0..self.params.rounds {
            resample.iter_mut().for_each(|c| *c = 0.0);
            for _ in 0..self.params.sample_size {
                resample[picker.sample(rng)] += 1.0;
            }
            let distance = jensen_shannon_distance(&observed, &resample)?;
            stats.push(distance * distance);
        }
        percentile(&stats, self.params.upper_percentile()).map(Some)
    }
}

impl StoppingCriterion for BootstrapDivergence {
    fn name(&self) -> &str {
        "bootstrap_divergence"
    }

    fn requires_partition(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError> {
        Ok(self
            .statistic(graph, &mut *ctx.rng)?
            .is_some_and(|upper| upper <= self.params.bound))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct PerturbationParams {
    pub min_sample_size: usize,
    pub rounds: usize,
    /// Inclusive judgment range the extra annotation is drawn from.
    pub judgment_range: (u32, u32),
    /// Share of observed edges that receive an extra annotation per round.
    pub share: f64,
    /// Required mean adjusted Rand index.
    pub lower_bound: f64,
}

impl Default for PerturbationParams {
    fn default() -> Self {
        Self {
            min_sample_size: 100,
            rounds: 30,
            judgment_range: (1, 4),
            share: 0.1,
            lower_bound: 0.95,
        }
    }
}

impl PerturbationParams {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.rounds == 0 {
            return Err(SimError::config("perturbation rounds must be at least 1"));
        }
        let (lo, hi) = self.judgment_range;
        if lo > hi {
            return Err(SimError::config(format!(
                "judgment range ({}, {}) is empty",
                lo, hi
            )));
        }
        if !(0.0..=1.0).contains(&self.share) {
            return Err(SimError::config(format!(
                "perturbation share {} outside [0, 1]",
                self.share
            )));
        }
        if self.lower_bound > 1.0 {
            return Err(SimError::config(format!(
                "lower_bound {} can never be reached",
                self.lower_bound
            )));
        }
        Ok(())
    }
}

/// Perturbs a share of the observed edges with one extra random judgment,
/// re-clusters the copy and checks that the mean adjusted Rand index against
/// the current partition stays above `lower_bound`.
#[derive(Clone)]
pub struct BootstrapPerturbation {
    params: PerturbationParams,
    clusterer: Arc<dyn Clusterer>,
}

impl std::fmt::Debug for BootstrapPerturbation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapPerturbation")
            .field("params", &self.params)
            .field("clusterer", &self.clusterer.name())
            .finish()
    }
}

impl BootstrapPerturbation {
    pub fn new(
        params: PerturbationParams,
        clusterer: Arc<dyn Clusterer>,
    ) -> Result<Self, SimError> {
        params.validate()?;
        Ok(Self { params, clusterer })
    }

    pub fn params(&self) -> &PerturbationParams {
        &self.params
    }

    fn perturbed(
        &self,
        graph: &UsageGraph,
        keys: &[EdgeKey],
        rng: &mut impl Rng,
    ) -> Result<UsageGraph, SimError> {
        let mut copy = graph.clone();
        let amount = (self.params.share * keys.len() as f64).floor() as usize;
        let (lo, hi) = self.params.judgment_range;
        for idx in index::sample(rng, keys.len(), amount.min(keys.len())) {
            let (u, v) = keys[idx].endpoints();
            let judgment = rng.gen_range(lo..=hi) as f64;
            copy.add_observation(Observation {
                u,
                v,
                weight: judgment,
            })?;
        }
        Ok(copy)
    }

    /// Mean adjusted Rand index over the perturbation rounds, `None` while the
    /// graph is too small to judge.
    pub fn statistic(
        &self,
        graph: &UsageGraph,
        rng: &mut SimRng,
    ) -> Result<Option<f64>, SimError> {
        if graph.node_count() < self.params.min_sample_size || graph.partition().is_empty() {
            return Ok(None);
        }
        let keys: Vec<EdgeKey> = graph.edges().map(|(k, _)| k).collect();
        let nodes: Vec<_> = graph.nodes().collect();
        let original: Vec<i64> = nodes.iter().map(|n| graph.partition().label_of(*n)).collect();

        let mut total = 0.0;
        for _ in 0..self.params.rounds {
            let copy = self.perturbed(graph, &keys, rng)?;
            let mut state = ClusterState::default();
            let mut ctx = ClusterContext {
                rng: &mut *rng,
                state: &mut state,
            };
            let partition = self.clusterer.cluster(&copy, &mut ctx)?;
            let relabeled: Vec<i64> = nodes.iter().map(|n| partition.label_of(*n)).collect();
            total += adjusted_rand_index(&original, &relabeled)?;
        }
        Ok(Some(total / self.params.rounds as f64))
    }
}

impl StoppingCriterion for BootstrapPerturbation {
    fn name(&self) -> &str {
        "bootstrap_perturbation"
    }

    fn requires_partition(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        graph: &UsageGraph,
        ctx: &mut CriterionContext<'_>,
    ) -> Result<bool, SimError> {
        Ok(self
            .statistic(graph, &mut *ctx.rng)?
            .is_some_and(|mean| mean >= self.params.lower_bound))
    }
}
