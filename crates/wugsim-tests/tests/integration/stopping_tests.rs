use std::sync::Arc;

use wugsim_core::engine::clustering::ConnectedComponentsClusterer;
use wugsim_core::engine::graph::{NodeId, Observation, UsageGraph};
use wugsim_core::engine::reference::planted_partition;
use wugsim_core::engine::stopping::{
    ApdConvergence, BootstrapDivergence, BootstrapDivergenceParams, BootstrapPerturbation,
    ConvergenceParams, CriterionContext, PerturbationParams, StoppingCriterion,
};
use wugsim_core::{seeded_rng, Partition};

fn evaluate(criterion: &dyn StoppingCriterion, graph: &UsageGraph, seed: u64) -> bool {
    let mut rng = seeded_rng(Some(seed));
    let mut history = Vec::new();
    let mut ctx = CriterionContext {
        rng: &mut rng,
        history: &mut history,
    };
    criterion.evaluate(graph, &mut ctx).unwrap()
}

fn uneven_clusters() -> UsageGraph {
    let mut g = UsageGraph::with_bound(10);
    let mut obs = Vec::new();
    for v in 1..6 {
        obs.push(Observation::new(0, v, 4.0));
    }
    for v in 7..9 {
        obs.push(Observation::new(6, v, 4.0));
    }
    obs.push(Observation::new(5, 9, 1.0));
    g.ingest(&obs).unwrap();
    let p = Partition::from_clusters(vec![
        (0..6).map(NodeId).collect::<Vec<_>>(),
        (6..9).map(NodeId).collect(),
        vec![NodeId(9)],
    ])
    .unwrap();
    g.set_partition(p).unwrap();
    g
}

#[test]
fn single_bootstrap_round_collapses_to_its_statistic() {
    let graph = uneven_clusters();
    let params = BootstrapDivergenceParams {
        min_sample_size: 5,
        rounds: 1,
        sample_size: 40,
        alpha: 0.95,
        bound: 1.0,
    };
    let criterion = BootstrapDivergence::new(params).unwrap();
    let a = criterion.statistic(&graph, &mut seeded_rng(Some(8))).unwrap().unwrap();
    let b = criterion.statistic(&graph, &mut seeded_rng(Some(8))).unwrap().unwrap();
    assert_eq!(a, b);
    assert!(a.is_finite() && (0.0..=1.0).contains(&a));
    // A bound of 1 admits any squared distance.
    assert!(evaluate(&criterion, &graph, 8));

    let negative = BootstrapDivergenceParams {
        bound: -1.0,
        ..params
    };
    assert!(BootstrapDivergence::new(negative).is_err());
}

#[test]
fn bootstrap_waits_for_enough_nodes() {
    let graph = uneven_clusters();
    let criterion = BootstrapDivergence::new(BootstrapDivergenceParams {
        min_sample_size: 11,
        bound: 1.0,
        ..BootstrapDivergenceParams::default()
    })
    .unwrap();
    assert_eq!(criterion.statistic(&graph, &mut seeded_rng(Some(1))).unwrap(), None);
    assert!(!evaluate(&criterion, &graph, 1));
}

#[test]
fn perturbing_a_clean_planted_graph_keeps_its_partition() {
    let graph = planted_partition(&[4, 4], 4.0, 1.0).unwrap();
    let criterion = BootstrapPerturbation::new(
        PerturbationParams {
            min_sample_size: 8,
            rounds: 3,
            judgment_range: (4, 4),
            share: 0.1,
            lower_bound: 0.95,
        },
        Arc::new(ConnectedComponentsClusterer),
    )
    .unwrap();
    // Extra judgments of 4 only reinforce within-cluster edges or leave a
    // between-cluster median at 2.5, which carries no evidence.
    let mean = criterion
        .statistic(&graph, &mut seeded_rng(Some(2)))
        .unwrap()
        .unwrap();
    assert_eq!(mean, 1.0);
    assert!(evaluate(&criterion, &graph, 2));
}

#[test]
fn apd_needs_a_full_window() {
    let graph = planted_partition(&[3, 3], 4.0, 4.0).unwrap();
    let criterion = ApdConvergence::new(ConvergenceParams {
        sample_size: 10,
        timesteps: 3,
        threshold: 0.1,
    })
    .unwrap();
    let mut rng = seeded_rng(Some(5));
    let mut history = Vec::new();
    let mut hits = Vec::new();
    for _ in 0..3 {
        let mut ctx = CriterionContext {
            rng: &mut rng,
            history: &mut history,
        };
        hits.push(criterion.evaluate(&graph, &mut ctx).unwrap());
    }
    // Every edge weighs 4, so the average never moves.
    assert_eq!(hits, vec![false, false, true]);
    assert_eq!(history, vec![4.0, 4.0, 4.0]);
}
