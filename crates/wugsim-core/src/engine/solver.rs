//! Correlation clustering solver.
//!
//! Maps a [`SignedGraph`] to a [`Partition`] minimizing the disagreement loss:
//! the summed weight of positive edges cut between clusters plus the summed
//! magnitude of negative edges kept inside clusters.
//!
//! The solver is heuristic:
//! 1. Connected components over positive edges form the baseline. If the
//!    baseline already has zero loss it is returned without any search.
//! 2. Otherwise, for every candidate cluster count `s` in
//!    `2..=max_cluster_guess`, two search branches run: one seeded with the
//!    best labeling found so far (the warm start or baseline initially), one
//!    from fresh random `s`-way labelings. Each branch is
//!    `max_restarts` annealing runs of `max_iters_per_restart` moves.
//! 3. The minimum-loss run wins; exact ties are broken uniformly at random
//!    with the caller's RNG.
//! 4. Optionally, nodes without positive evidence toward the rest of their
//!    cluster are split off into singletons.

use std::collections::BTreeSet;

use rand::Rng;

use crate::engine::errors::SimError;
use crate::engine::graph::{NodeId, SignedGraph};
use crate::engine::local_search::{
    compact_labels, run_branch, BranchResult, Problem, Schedule, Start, LOSS_EPSILON,
};
use crate::engine::partition::Partition;
use crate::engine::SimRng;

/// Parameters of [`solve`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct SolverParams {
    /// Largest cluster count tried by the search.
    pub max_cluster_guess: usize,
    /// Independent annealing runs per search branch.
    pub max_restarts: usize,
    /// Proposed moves per annealing run.
    pub max_iters_per_restart: usize,
    /// Peel nodes without positive evidence inside their cluster into
    /// singletons.
    pub split_evidenceless_clusters: bool,
    pub initial_temperature: f64,
    pub final_temperature: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_cluster_guess: 10,
            max_restarts: 10,
            max_iters_per_restart: 500,
            split_evidenceless_clusters: true,
            initial_temperature: 1.0,
            final_temperature: 0.001,
        }
    }
}

impl SolverParams {
    /// Rejects parameter combinations that can never run.
    ///
    /// `max_cluster_guess < 2` is accepted here: it is only an error once a
    /// graph's baseline turns out to need a search.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.max_restarts == 0 {
            return Err(SimError::config("max_restarts must be at least 1"));
        }
        if self.max_iters_per_restart == 0 {
            return Err(SimError::config("max_iters_per_restart must be at least 1"));
        }
        let temps = [self.initial_temperature, self.final_temperature];
        if temps.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(SimError::config(
                "annealing temperatures must be finite and positive",
            ));
        }
        if self.final_temperature > self.initial_temperature {
            return Err(SimError::config(format!(
                "final_temperature {} exceeds initial_temperature {}",
                self.final_temperature, self.initial_temperature
            )));
        }
        Ok(())
    }

    /// Copy with restart and iteration budgets divided by `2^halvings`
    /// (never below one).
    pub fn degraded(&self, halvings: u32) -> Self {
        let shrink = |v: usize| (v >> halvings.min(usize::BITS - 1)).max(1);
        Self {
            max_restarts: shrink(self.max_restarts),
            max_iters_per_restart: shrink(self.max_iters_per_restart),
            ..*self
        }
    }
}

/// Result of [`solve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub partition: Partition,
    /// Disagreement loss of `partition`.
    pub loss: f64,
    /// False when the baseline was returned without searching.
    pub searched: bool,
    /// Number of distinct labels in the winning labeling, before any
    /// evidence split.
    pub label_count: usize,
}

/// Clusters `graph`, optionally continuing from `warm_start`.
///
/// Nodes of `graph` missing from `warm_start` are collected into one extra
/// cluster appended to the warm start; warm-start nodes absent from `graph`
/// are ignored.
pub fn solve(
    graph: &SignedGraph,
    params: &SolverParams,
    warm_start: Option<&Partition>,
    rng: &mut SimRng,
) -> Result<Solution, SimError> {
    params.validate()?;
    let problem = Problem::new(graph);
    let nodes = graph.nodes();

    let mut baseline = positive_components(&problem);
    let baseline_count = compact_labels(&mut baseline);
    let baseline_loss = problem.loss(&baseline);

    if baseline_loss <= LOSS_EPSILON {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            nodes = nodes.len(),
            clusters = baseline_count,
            "baseline components have zero loss; search skipped"
        );
        return Ok(Solution {
            partition: Partition::from_labels(nodes, &to_usize(&baseline))?,
            loss: 0.0,
            searched: false,
            label_count: baseline_count,
        });
    }

    if params.max_cluster_guess < 2 {
        return Err(SimError::config(format!(
            "max_cluster_guess {} < 2 but the baseline partition has loss {:.3}",
            params.max_cluster_guess, baseline_loss
        )));
    }

    let (seed_labels, seed_count) = match warm_start {
        Some(partition) => warm_start_labels(nodes, partition),
        None => (baseline.clone(), baseline_count),
    };

    let mut runs = vec![LabeledRun {
        loss: problem.loss(&seed_labels),
        labels: seed_labels,
        label_count: seed_count,
    }];
    if warm_start.is_some() {
        runs.push(LabeledRun {
            loss: baseline_loss,
            labels: baseline,
            label_count: baseline_count,
        });
    }

    let schedule = Schedule {
        iterations: params.max_iters_per_restart,
        initial_temperature: params.initial_temperature,
        final_temperature: params.final_temperature,
    };

    for s in 2..=params.max_cluster_guess {
        let current = best_run(&runs).clone();
        let seeded_count = s.max(current.label_count);
        let seeded = run_branch(
            &problem,
            Start::Seeded(&current.labels),
            seeded_count,
            params.max_restarts,
            schedule,
            rng,
        );
        runs.push(LabeledRun::from_branch(seeded));

        let fresh = run_branch(
            &problem,
            Start::Random,
            s,
            params.max_restarts,
            schedule,
            rng,
        );
        runs.push(LabeledRun::from_branch(fresh));
    }

    let winner = pick_minimum(runs, rng);
    #[cfg(feature = "tracing")]
    tracing::debug!(
        loss = winner.loss,
        labels = winner.label_count,
        "correlation clustering search finished"
    );

    let mut partition = Partition::from_labels(nodes, &to_usize(&winner.labels))?;
    if params.split_evidenceless_clusters {
        partition = split_evidenceless_clusters(graph, &partition)?;
    }
    let loss = correlation_loss(graph, &partition);

    Ok(Solution {
        partition,
        loss,
        searched: true,
        label_count: winner.label_count,
    })
}

#[derive(Debug, Clone)]
struct LabeledRun {
    loss: f64,
    labels: Vec<u32>,
    label_count: usize,
}

impl LabeledRun {
    fn from_branch(mut result: BranchResult) -> Self {
        let label_count = compact_labels(&mut result.labels);
        Self {
            loss: result.loss,
            labels: result.labels,
            label_count,
        }
    }
}

/// First run with the minimum loss.
fn best_run(runs: &[LabeledRun]) -> &LabeledRun {
    let mut best = &runs[0];
    for run in &runs[1..] {
        if run.loss < best.loss - LOSS_EPSILON {
            best = run;
        }
    }
    best
}

/// Minimum-loss run; ties are broken uniformly at random.
fn pick_minimum(runs: Vec<LabeledRun>, rng: &mut SimRng) -> LabeledRun {
    let min = runs.iter().map(|r| r.loss).fold(f64::INFINITY, f64::min);
    let mut tied: Vec<LabeledRun> = runs
        .into_iter()
        .filter(|r| r.loss <= min + LOSS_EPSILON)
        .collect();
    let pick = rng.gen_range(0..tied.len());
    tied.swap_remove(pick)
}

fn to_usize(labels: &[u32]) -> Vec<usize> {
    labels.iter().map(|l| *l as usize).collect()
}

/// Labels for the seeded branch: warm-start clusters in order, then one
/// pseudo-cluster for nodes the warm start does not know.
fn warm_start_labels(nodes: &[NodeId], warm: &Partition) -> (Vec<u32>, usize) {
    let unknown = warm.len() as u32;
    let mut labels: Vec<u32> = nodes
        .iter()
        .map(|n| warm.cluster_of(*n).map(|c| c.0).unwrap_or(unknown))
        .collect();
    let count = compact_labels(&mut labels);
    (labels, count)
}

/// Component labels over positive edges (union-find with path halving).
fn positive_components(problem: &Problem) -> Vec<u32> {
    let n = problem.node_count();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for &(u, v, w) in problem.edges() {
        if w > 0.0 {
            let (ru, rv) = (find(&mut parent, u as usize), find(&mut parent, v as usize));
            if ru != rv {
                parent[ru.max(rv)] = ru.min(rv);
            }
        }
    }
    (0..n).map(|x| find(&mut parent, x) as u32).collect()
}

/// Connected components over strictly positive edges, in canonical order.
///
/// Nodes without positive edges become singletons; a graph without edges
/// yields the all-singleton partition.
pub fn connected_components(graph: &SignedGraph) -> Result<Partition, SimError> {
    let problem = Problem::new(graph);
    let labels = positive_components(&problem);
    Partition::from_labels(graph.nodes(), &to_usize(&labels))
}

/// Disagreement loss of `partition` on `graph`. Nodes the partition does not
/// assign are treated as singletons.
pub fn correlation_loss(graph: &SignedGraph, partition: &Partition) -> f64 {
    graph
        .edges()
        .iter()
        .map(|edge| {
            let same = match (partition.cluster_of(edge.u), partition.cluster_of(edge.v)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            match (edge.weight > 0.0, same) {
                (true, false) => edge.weight,
                (false, true) if edge.weight < 0.0 => -edge.weight,
                _ => 0.0,
            }
        })
        .sum()
}

/// Peels every node that has no positive edge to another member of its own
/// cluster into a singleton. Members that do have such an edge stay together.
///
/// The output holds exactly the input nodes; any difference is reported as an
/// invariant violation.
pub fn split_evidenceless_clusters(
    graph: &SignedGraph,
    partition: &Partition,
) -> Result<Partition, SimError> {
    let problem = Problem::new(graph);
    let nodes = graph.nodes();
    let index_of = |n: &NodeId| nodes.binary_search(n).ok();

    let mut out: Vec<Vec<NodeId>> = Vec::with_capacity(partition.len());
    for cluster in partition.clusters() {
        let members: BTreeSet<usize> = cluster.iter().filter_map(index_of).collect();
        let mut kept = Vec::with_capacity(cluster.len());
        for node in cluster {
            let has_evidence = index_of(node).is_some_and(|idx| {
                problem
                    .positive_neighbours(idx)
                    .any(|j| j != idx && members.contains(&j))
            });
            if has_evidence {
                kept.push(*node);
            } else {
                out.push(vec![*node]);
            }
        }
        out.push(kept);
    }

    let nodes_in = partition.node_count();
    let nodes_out: usize = out.iter().map(Vec::len).sum();
    if nodes_in != nodes_out {
        return Err(SimError::invariant(format!(
            "evidence split changed node count from {} to {}",
            nodes_in, nodes_out
        )));
    }
    let split = Partition::from_clusters(out)?;
    if split.nodes().collect::<BTreeSet<_>>() != partition.nodes().collect::<BTreeSet<_>>() {
        return Err(SimError::invariant(
            "evidence split changed the node set".to_string(),
        ));
    }
    Ok(split)
}
