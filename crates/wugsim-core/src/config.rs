//! Typed run configuration.
//!
//! A [`RunConfig`] describes a whole simulation in one serde document: the
//! reference graph recipe, the sampler and its annotators, the clusterer and
//! its schedule, the stopping criteria, the checkpoints and the metrics
//! evaluated there. [`RunConfig::build`] validates every part eagerly and
//! assembles the runtime objects.
//!
//! ```rust
//! use wugsim_core::config::RunConfig;
//!
//! let json = r#"{
//!     "seed": 3,
//!     "reference": { "kind": "planted_partition", "sizes": [4, 4] },
//!     "sampler": { "kind": "random", "sample_size": 5 },
//!     "criteria": [{ "kind": "edges_added", "number_edges": 20 }]
//! }"#;
//! let config: RunConfig = serde_json::from_str(json).unwrap();
//! let built = config.build().unwrap();
//! let report = built.simulation.run(built.rng, &mut []).unwrap();
//! assert_eq!(report.edges_added, 20);
//! ```

use std::sync::Arc;

use crate::engine::annotator::{Annotator, NoisyAnnotator, NoisyAnnotatorParams};
use crate::engine::clustering::{
    Clusterer, ConnectedComponentsClusterer, CorrelationClusterer, TimeDegradingClusterer,
};
use crate::engine::errors::SimError;
use crate::engine::graph::UsageGraph;
use crate::engine::listener::MetricListener;
use crate::engine::reference::planted_partition;
use crate::engine::sampling::{
    AnnotatedSampler, Assignment, PageRankSampling, RandomSampling, Sampler,
};
use crate::engine::simulation::{ClusteringSchedule, Simulation, SimulationParams};
use crate::engine::stopping::{
    ApdConvergence, BootstrapDivergence, BootstrapDivergenceParams, BootstrapPerturbation,
    Connectivity, ConnectivityParams, ConvergenceParams, EdgeShareFound, EdgesAdded, EdgesFound,
    EntropyConvergence, EntropyParams, PerturbationParams, StoppingCriterion,
};
use crate::engine::{seeded_rng, SimRng};
use crate::metrics::MetricRegistry;

/// How the reference ("true") graph is generated.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceConfig {
    PlantedPartition {
        sizes: Vec<usize>,
        #[serde(default = "default_within")]
        within: f64,
        #[serde(default = "default_between")]
        between: f64,
    },
}

fn default_within() -> f64 {
    4.0
}

fn default_between() -> f64 {
    1.0
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        ReferenceConfig::PlantedPartition {
            sizes: vec![10, 10],
            within: default_within(),
            between: default_between(),
        }
    }
}

impl ReferenceConfig {
    pub fn build(&self) -> Result<UsageGraph, SimError> {
        match self {
            ReferenceConfig::PlantedPartition {
                sizes,
                within,
                between,
            } => planted_partition(sizes, *within, *between),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplerConfig {
    Random { sample_size: usize },
    PageRank { sample_size: usize, tp_coef: f64 },
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig::Random { sample_size: 10 }
    }
}

impl SamplerConfig {
    pub fn build(&self) -> Result<Arc<dyn Sampler>, SimError> {
        Ok(match *self {
            SamplerConfig::Random { sample_size } => Arc::new(RandomSampling { sample_size }),
            SamplerConfig::PageRank {
                sample_size,
                tp_coef,
            } => Arc::new(PageRankSampling::new(sample_size, tp_coef)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClustererConfig {
    Correlation(CorrelationClusterer),
    TimeDegrading(TimeDegradingClusterer),
    ConnectedComponents,
}

impl ClustererConfig {
    pub fn build(&self) -> Result<Arc<dyn Clusterer>, SimError> {
        Ok(match self {
            ClustererConfig::Correlation(c) => {
                let mut clusterer = CorrelationClusterer::new(c.solver)?;
                clusterer.reuse_previous = c.reuse_previous;
                Arc::new(clusterer)
            }
            ClustererConfig::TimeDegrading(c) => {
                Arc::new(TimeDegradingClusterer::new(c.solver, c.max_degrade)?)
            }
            ClustererConfig::ConnectedComponents => Arc::new(ConnectedComponentsClusterer),
        })
    }
}

/// One stopping criterion. Edge-share totals are taken from the reference
/// graph; the perturbation bootstrap re-clusters with the run's clusterer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriterionConfig {
    EdgesAdded { number_edges: u64 },
    EdgesFound { number_edges: usize },
    EdgeShareFound { share: f64 },
    Connectivity(ConnectivityParams),
    BootstrapDivergence(BootstrapDivergenceParams),
    BootstrapPerturbation(PerturbationParams),
    ApdConvergence(ConvergenceParams),
    EntropyConvergence(EntropyParams),
}

impl CriterionConfig {
    pub fn build(
        &self,
        reference: &UsageGraph,
        clusterer: Option<&Arc<dyn Clusterer>>,
    ) -> Result<Arc<dyn StoppingCriterion>, SimError> {
        Ok(match self {
            CriterionConfig::EdgesAdded { number_edges } => Arc::new(EdgesAdded {
                number_edges: *number_edges,
            }),
            CriterionConfig::EdgesFound { number_edges } => Arc::new(EdgesFound {
                number_edges: *number_edges,
            }),
            CriterionConfig::EdgeShareFound { share } => {
                Arc::new(EdgeShareFound::new(*share, reference.edge_count())?)
            }
            CriterionConfig::Connectivity(params) => Arc::new(Connectivity::new(*params)?),
            CriterionConfig::BootstrapDivergence(params) => {
                Arc::new(BootstrapDivergence::new(*params)?)
            }
            CriterionConfig::BootstrapPerturbation(params) => {
                let clusterer = clusterer.ok_or_else(|| {
                    SimError::config("bootstrap_perturbation needs a clusterer")
                })?;
                Arc::new(BootstrapPerturbation::new(*params, Arc::clone(clusterer))?)
            }
            CriterionConfig::ApdConvergence(params) => Arc::new(ApdConvergence::new(*params)?),
            CriterionConfig::EntropyConvergence(params) => {
                Arc::new(EntropyConvergence::new(*params)?)
            }
        })
    }
}

/// A whole simulation run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// RNG seed; OS entropy when absent.
    pub seed: Option<u64>,
    pub reference: ReferenceConfig,
    pub sampler: SamplerConfig,
    /// Annotators judging the sampled pairs; empty means exact reference
    /// weights.
    pub annotators: Vec<NoisyAnnotatorParams>,
    pub assignment: Assignment,
    pub clusterer: Option<ClustererConfig>,
    pub schedule: ClusteringSchedule,
    pub criteria: Vec<CriterionConfig>,
    /// Edges-added thresholds at which `metrics` are recorded.
    pub checkpoints: Vec<u64>,
    pub metrics: Vec<String>,
    pub max_iter: usize,
    pub stop_on_first_hit: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        let params = SimulationParams::default();
        Self {
            seed: None,
            reference: ReferenceConfig::default(),
            sampler: SamplerConfig::default(),
            annotators: Vec::new(),
            assignment: Assignment::PerAnnotator,
            clusterer: None,
            schedule: params.schedule,
            criteria: Vec::new(),
            checkpoints: Vec::new(),
            metrics: vec!["ari".to_string()],
            max_iter: params.max_iter,
            stop_on_first_hit: params.stop_on_first_hit,
        }
    }
}

/// Runtime objects assembled from a [`RunConfig`].
#[derive(Debug)]
pub struct BuiltRun {
    pub reference: Arc<UsageGraph>,
    pub simulation: Simulation,
    /// Present when checkpoints are configured.
    pub listener: Option<MetricListener>,
    pub rng: SimRng,
}

impl RunConfig {
    pub fn simulation_params(&self) -> SimulationParams {
        SimulationParams {
            max_iter: self.max_iter,
            stop_on_first_hit: self.stop_on_first_hit,
            schedule: self.schedule,
        }
    }

    /// Validates the configuration and assembles the run.
    pub fn build(&self) -> Result<BuiltRun, SimError> {
        self.build_with(&MetricRegistry::with_builtins())
    }

    /// Like [`RunConfig::build`], resolving metric names in `registry`.
    pub fn build_with(&self, registry: &MetricRegistry) -> Result<BuiltRun, SimError> {
        let reference = Arc::new(self.reference.build()?);

        let mut sampler = self.sampler.build()?;
        if !self.annotators.is_empty() {
            let annotators = self
                .annotators
                .iter()
                .map(|p| Ok(Arc::new(NoisyAnnotator::new(p.clone())?) as Arc<dyn Annotator>))
                .collect::<Result<Vec<_>, SimError>>()?;
            sampler = Arc::new(AnnotatedSampler::new(sampler, annotators, self.assignment)?);
        }

        let clusterer = self.clusterer.as_ref().map(|c| c.build()).transpose()?;
        let mut simulation =
            Simulation::new(Arc::clone(&reference), sampler, self.simulation_params());
        for criterion in &self.criteria {
            let criterion = criterion.build(&reference, clusterer.as_ref())?;
            simulation = simulation.with_criterion(criterion);
        }
        if let Some(clusterer) = clusterer {
            simulation = simulation.with_clusterer(clusterer);
        }
        simulation.validate()?;

        let listener = if self.checkpoints.is_empty() {
            None
        } else {
            Some(
                MetricListener::new(Arc::clone(&reference), self.checkpoints.clone())?
                    .with_metrics(registry, &self.metrics)?,
            )
        };

        Ok(BuiltRun {
            reference,
            simulation,
            listener,
            rng: seeded_rng(self.seed),
        })
    }
}
