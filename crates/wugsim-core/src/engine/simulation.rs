//! Round-based simulation engine.
//!
//! A [`Simulation`] is the immutable description of an experiment: reference
//! graph, sampler, optional clusterer, stopping criteria and termination
//! parameters. It can be shared between threads and started any number of
//! times. Each [`SimulationRun`] owns all mutable state of one run (annotated
//! graph, RNG, clusterer and sampler state, criterion histories, snapshots and
//! listener cursors), so concurrent runs never interfere.
//!
//! One round is:
//! 1. sample observations from the reference graph;
//! 2. ingest them in order into the annotated graph;
//! 3. re-cluster ([`ClusteringSchedule::EveryRound`]), or mark the partition
//!    stale ([`ClusteringSchedule::OnDemand`]);
//! 4. evaluate every criterion without a snapshot, in registration order,
//!    refreshing a stale partition first if the criterion reads it; the first
//!    satisfaction captures a copy of the graph;
//! 5. fire every listener threshold reached by the edges-added counter;
//! 6. decide whether to stop.
//!
//! Under [`ClusteringSchedule::OnDemand`] the partition is also refreshed
//! before a snapshot is copied and when the run ends, so every graph handed
//! out (checkpoint, snapshot, final) carries a partition covering its nodes.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wugsim_core::engine::reference::planted_partition;
//! use wugsim_core::engine::sampling::RandomSampling;
//! use wugsim_core::engine::simulation::{RunState, Simulation, SimulationParams};
//! use wugsim_core::engine::stopping::EdgesAdded;
//! use wugsim_core::seeded_rng;
//!
//! let reference = Arc::new(planted_partition(&[3, 3], 4.0, 1.0).unwrap());
//! let sim = Simulation::new(
//!     reference,
//!     Arc::new(RandomSampling { sample_size: 5 }),
//!     SimulationParams::default(),
//! )
//! .with_criterion(Arc::new(EdgesAdded { number_edges: 12 }));
//!
//! let report = sim.run(seeded_rng(Some(7)), &mut []).unwrap();
//! assert_eq!(report.state, RunState::StoppingHit);
//! assert_eq!(report.rounds, 3);
//! assert_eq!(report.edges_added, 15);
//! ```

use std::sync::Arc;

use crate::engine::clustering::{ClusterContext, ClusterState, Clusterer};
use crate::engine::errors::SimError;
use crate::engine::graph::UsageGraph;
use crate::engine::listener::{validate_thresholds, Checkpoint, CheckpointListener};
use crate::engine::sampling::{SampleContext, Sampler, SamplerState};
use crate::engine::stopping::{CriterionContext, StoppingCriterion};
use crate::engine::SimRng;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum RunState {
    Running,
    /// Stopped on a criterion hit, or because every criterion and listener
    /// was done.
    StoppingHit,
    MaxIterReached,
}

/// When the partition is refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ClusteringSchedule {
    /// After every round's ingestion.
    #[default]
    EveryRound,
    /// Only when stale and about to be read by a criterion or checkpoint.
    OnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct SimulationParams {
    pub max_iter: usize,
    /// Stop at the first criterion hit. Otherwise run until every criterion
    /// has a snapshot and every listener threshold has fired.
    pub stop_on_first_hit: bool,
    pub schedule: ClusteringSchedule,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            max_iter: 50_000,
            stop_on_first_hit: true,
            schedule: ClusteringSchedule::EveryRound,
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.max_iter == 0 {
            return Err(SimError::config("max_iter must be at least 1"));
        }
        Ok(())
    }
}

/// Immutable description of a simulation.
#[derive(Clone)]
pub struct Simulation {
    reference: Arc<UsageGraph>,
    sampler: Arc<dyn Sampler>,
    clusterer: Option<Arc<dyn Clusterer>>,
    criteria: Vec<Arc<dyn StoppingCriterion>>,
    params: SimulationParams,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let criteria: Vec<&str> = self.criteria.iter().map(|c| c.name()).collect();
        f.debug_struct("Simulation")
            .field("reference", &self.reference.to_string())
            .field("sampler", &self.sampler.name())
            .field("clusterer", &self.clusterer.as_ref().map(|c| c.name()))
            .field("criteria", &criteria)
            .field("params", &self.params)
            .finish()
    }
}

impl Simulation {
    pub fn new(
        reference: Arc<UsageGraph>,
        sampler: Arc<dyn Sampler>,
        params: SimulationParams,
    ) -> Self {
        Self {
            reference,
            sampler,
            clusterer: None,
            criteria: Vec::new(),
            params,
        }
    }

    pub fn with_clusterer(mut self, clusterer: Arc<dyn Clusterer>) -> Self {
        self.clusterer = Some(clusterer);
        self
    }

    /// Registers a criterion; criteria are evaluated in registration order.
    pub fn with_criterion(mut self, criterion: Arc<dyn StoppingCriterion>) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn reference(&self) -> &UsageGraph {
        &self.reference
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn criteria(&self) -> &[Arc<dyn StoppingCriterion>] {
        &self.criteria
    }

    /// Checks the configuration as a whole.
    pub fn validate(&self) -> Result<(), SimError> {
        self.params.validate()?;
        if self.clusterer.is_none() {
            if let Some(c) = self.criteria.iter().find(|c| c.requires_partition()) {
                return Err(SimError::config(format!(
                    "criterion '{}' reads the partition but no clusterer is configured",
                    c.name()
                )));
            }
        }
        Ok(())
    }

    /// Starts a run over an empty annotated graph bounded like the reference.
    pub fn start(&self, rng: SimRng) -> Result<SimulationRun<'_>, SimError> {
        self.validate()?;
        Ok(SimulationRun {
            sim: self,
            graph: UsageGraph::with_bound(self.reference.bound()),
            rng,
            cluster_state: ClusterState::default(),
            sampler_state: SamplerState::default(),
            histories: vec![Vec::new(); self.criteria.len()],
            snapshots: vec![None; self.criteria.len()],
            cursors: Vec::new(),
            listeners_bound: false,
            round: 0,
            state: RunState::Running,
            partition_stale: false,
        })
    }

    /// Runs to completion and returns the report.
    pub fn run(
        &self,
        rng: SimRng,
        listeners: &mut [&mut dyn CheckpointListener],
    ) -> Result<SimulationReport, SimError> {
        let mut run = self.start(rng)?;
        while run.step(listeners)? == RunState::Running {}
        run.finish()
    }
}

/// Copy of the annotated graph taken when a criterion was first satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionSnapshot {
    pub round: usize,
    pub edges_added: u64,
    pub graph: UsageGraph,
}

/// Mutable state of one run.
pub struct SimulationRun<'s> {
    sim: &'s Simulation,
    graph: UsageGraph,
    rng: SimRng,
    cluster_state: ClusterState,
    sampler_state: SamplerState,
    histories: Vec<Vec<f64>>,
    snapshots: Vec<Option<CriterionSnapshot>>,
    /// Next unfired threshold per listener.
    cursors: Vec<usize>,
    listeners_bound: bool,
    round: usize,
    state: RunState,
    partition_stale: bool,
}

impl<'s> SimulationRun<'s> {
    pub fn graph(&self) -> &UsageGraph {
        &self.graph
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn snapshot(&self, criterion: usize) -> Option<&CriterionSnapshot> {
        self.snapshots.get(criterion).and_then(Option::as_ref)
    }

    /// Statistic history of a convergence criterion.
    pub fn history(&self, criterion: usize) -> &[f64] {
        self.histories.get(criterion).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Executes one round. Listeners must be passed in the same order and
    /// number on every call. Returns the state after the round; a finished
    /// run is left untouched.
    pub fn step(
        &mut self,
        listeners: &mut [&mut dyn CheckpointListener],
    ) -> Result<RunState, SimError> {
        if self.state != RunState::Running {
            return Ok(self.state);
        }
        self.bind_listeners(listeners)?;
        self.round += 1;

        // Sample and ingest.
        let observations = {
            let mut ctx = SampleContext {
                rng: &mut self.rng,
                state: &mut self.sampler_state,
                annotated: &self.graph,
            };
            self.sim.sampler.sample(&self.sim.reference, &mut ctx)?
        };
        let ingested = self.graph.ingest(&observations)?;
        if ingested > 0 {
            self.partition_stale = true;
        }
        if self.sim.params.schedule == ClusteringSchedule::EveryRound {
            self.recluster()?;
        }

        // Stopping criteria.
        let mut hit_this_round = false;
        for idx in 0..self.sim.criteria.len() {
            if self.snapshots[idx].is_some() {
                continue;
            }
            let criterion = Arc::clone(&self.sim.criteria[idx]);
            if criterion.requires_partition() {
                self.recluster()?;
            }
            let mut ctx = CriterionContext {
                rng: &mut self.rng,
                history: &mut self.histories[idx],
            };
            if criterion.evaluate(&self.graph, &mut ctx)? {
                #[cfg(feature = "tracing")]
                tracing::info!(
                    criterion = criterion.name(),
                    round = self.round,
                    edges_added = self.graph.edges_added(),
                    "stopping criterion satisfied"
                );
                self.recluster()?;
                self.snapshots[idx] = Some(CriterionSnapshot {
                    round: self.round,
                    edges_added: self.graph.edges_added(),
                    graph: self.graph.clone(),
                });
                hit_this_round = true;
            }
        }

        // Checkpoints.
        let edges_added = self.graph.edges_added();
        let mut listeners_done = true;
        for (idx, listener) in listeners.iter_mut().enumerate() {
            loop {
                let Some(threshold) = listener.thresholds().get(self.cursors[idx]).copied() else {
                    break;
                };
                if threshold > edges_added {
                    break;
                }
                self.recluster()?;
                #[cfg(feature = "tracing")]
                tracing::debug!(threshold, round = self.round, "checkpoint reached");
                listener.on_checkpoint(&Checkpoint {
                    threshold,
                    round: self.round,
                    edges_added,
                    graph: &self.graph,
                })?;
                self.cursors[idx] += 1;
            }
            listeners_done &= self.cursors[idx] >= listener.thresholds().len();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            round = self.round,
            observations = observations.len(),
            graph = %self.graph,
            "round complete"
        );

        let criteria_done = self.snapshots.iter().all(Option::is_some);
        self.state = if self.sim.params.stop_on_first_hit {
            if hit_this_round {
                RunState::StoppingHit
            } else if self.round >= self.sim.params.max_iter {
                RunState::MaxIterReached
            } else {
                RunState::Running
            }
        } else if criteria_done && listeners_done {
            RunState::StoppingHit
        } else if self.round >= self.sim.params.max_iter {
            RunState::MaxIterReached
        } else {
            RunState::Running
        };
        if self.state != RunState::Running {
            self.recluster()?;
        }
        Ok(self.state)
    }

    /// Creates and validates the listener cursors on the first call; later
    /// calls must pass the same number of listeners.
    fn bind_listeners(
        &mut self,
        listeners: &[&mut dyn CheckpointListener],
    ) -> Result<(), SimError> {
        if self.listeners_bound {
            if self.cursors.len() != listeners.len() {
                return Err(SimError::config(format!(
                    "run started with {} listeners but step received {}",
                    self.cursors.len(),
                    listeners.len()
                )));
            }
            return Ok(());
        }
        for listener in listeners {
            validate_thresholds(listener.thresholds())?;
        }
        self.cursors = vec![0; listeners.len()];
        self.listeners_bound = true;
        Ok(())
    }

    /// Refreshes a stale partition, if a clusterer is configured.
    fn recluster(&mut self) -> Result<(), SimError> {
        let Some(clusterer) = &self.sim.clusterer else {
            return Ok(());
        };
        if !self.partition_stale {
            return Ok(());
        }
        let mut ctx = ClusterContext {
            rng: &mut self.rng,
            state: &mut self.cluster_state,
        };
        let partition = clusterer.cluster(&self.graph, &mut ctx)?;
        self.graph.set_partition(partition)?;
        self.partition_stale = false;
        Ok(())
    }

    /// Consumes the run into its report. A stale partition is refreshed
    /// first, which matters for runs abandoned while still running.
    pub fn finish(mut self) -> Result<SimulationReport, SimError> {
        self.recluster()?;
        let criteria = self
            .sim
            .criteria
            .iter()
            .zip(self.snapshots)
            .map(|(c, snapshot)| CriterionOutcome {
                name: c.name().to_string(),
                snapshot,
            })
            .collect();
        Ok(SimulationReport {
            state: self.state,
            rounds: self.round,
            edges_added: self.graph.edges_added(),
            graph: self.graph,
            criteria,
        })
    }
}

/// Outcome of one registered criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionOutcome {
    pub name: String,
    pub snapshot: Option<CriterionSnapshot>,
}

/// Result of a finished (or abandoned) run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub state: RunState,
    pub rounds: usize,
    pub edges_added: u64,
    /// Annotated graph at the end of the run.
    pub graph: UsageGraph,
    /// One entry per criterion, in registration order.
    pub criteria: Vec<CriterionOutcome>,
}

impl SimulationReport {
    /// Whether any criterion was satisfied.
    pub fn stopping_hit(&self) -> bool {
        self.criteria.iter().any(|c| c.snapshot.is_some())
    }

    /// The earliest criterion snapshot (ties go to the earlier registered
    /// criterion), or the final graph if no criterion was satisfied.
    pub fn stopping_graph(&self) -> &UsageGraph {
        self.criteria
            .iter()
            .filter_map(|c| c.snapshot.as_ref())
            .min_by_key(|s| s.round)
            .map(|s| &s.graph)
            .unwrap_or(&self.graph)
    }
}
