use wugsim_core::engine::graph::{NodeId, SignedGraph};
use wugsim_core::engine::solver::{
    connected_components, correlation_loss, solve, split_evidenceless_clusters, SolverParams,
};
use wugsim_core::{seeded_rng, Partition, SimError};

fn ids(v: &[u32]) -> Vec<NodeId> {
    v.iter().copied().map(NodeId).collect()
}

fn clusters(p: &Partition) -> Vec<Vec<u32>> {
    p.clusters()
        .iter()
        .map(|c| c.iter().map(|n| n.0).collect())
        .collect()
}

fn params() -> SolverParams {
    SolverParams {
        max_cluster_guess: 4,
        max_restarts: 5,
        max_iters_per_restart: 500,
        ..SolverParams::default()
    }
}

#[test]
fn scenario_a_triangle_and_repelled_node() {
    let graph =
        SignedGraph::from_edges([(0, 1, 1.5), (1, 2, 1.5), (0, 2, 1.5), (2, 3, -1.5)]).unwrap();
    let sol = solve(&graph, &params(), None, &mut seeded_rng(Some(3))).unwrap();
    assert_eq!(clusters(&sol.partition), vec![vec![0, 1, 2], vec![3]]);
    assert_eq!(sol.loss, 0.0);

    // Node 2 has positive evidence to both 0 and 1.
    let split = split_evidenceless_clusters(&graph, &sol.partition).unwrap();
    assert_eq!(split, sol.partition);
}

#[test]
fn scenario_b_disconnected_pairs_skip_search() {
    let graph = SignedGraph::from_edges([(0, 1, 1.5), (2, 3, 1.5)]).unwrap();
    let sol = solve(&graph, &params(), None, &mut seeded_rng(Some(3))).unwrap();
    assert_eq!(clusters(&sol.partition), vec![vec![0, 1], vec![2, 3]]);
    assert_eq!(sol.loss, 0.0);
    assert!(!sol.searched);
}

#[test]
fn positive_only_graph_returns_its_components() {
    let graph =
        SignedGraph::from_edges([(0, 1, 0.5), (1, 2, 1.5), (3, 4, 0.5), (5, 6, 1.0), (6, 7, 1.0)])
            .unwrap();
    let sol = solve(&graph, &params(), None, &mut seeded_rng(Some(9))).unwrap();
    let components = connected_components(&graph).unwrap();
    assert_eq!(sol.partition, components);
    assert_eq!(
        clusters(&sol.partition),
        vec![vec![0, 1, 2], vec![5, 6, 7], vec![3, 4]]
    );
    assert!(!sol.searched);
}

#[test]
fn weak_bridge_is_cut_by_search() {
    let graph = SignedGraph::from_edges([
        (0, 1, 1.5),
        (1, 2, 1.5),
        (0, 2, 1.5),
        (3, 4, 1.5),
        (4, 5, 1.5),
        (3, 5, 1.5),
        (2, 3, 0.5),
        (0, 3, -1.5),
        (1, 4, -1.5),
    ])
    .unwrap();
    let baseline = connected_components(&graph).unwrap();
    assert_eq!(correlation_loss(&graph, &baseline), 3.0);

    let sol = solve(&graph, &params(), None, &mut seeded_rng(Some(21))).unwrap();
    assert!(sol.searched);
    assert_eq!(clusters(&sol.partition), vec![vec![0, 1, 2], vec![3, 4, 5]]);
    assert_eq!(sol.loss, 0.5);
    assert_eq!(correlation_loss(&graph, &sol.partition), 0.5);
}

#[test]
fn cluster_ids_follow_size_then_min_node() {
    let graph =
        SignedGraph::from_edges([(7, 8, 1.0), (2, 3, 1.0), (4, 5, 1.0), (5, 6, 1.0)]).unwrap();
    let sol = solve(&graph, &params(), None, &mut seeded_rng(Some(1))).unwrap();
    assert_eq!(
        clusters(&sol.partition),
        vec![vec![4, 5, 6], vec![2, 3], vec![7, 8]]
    );
    assert_eq!(sol.partition.cluster_of(NodeId(4)).unwrap().0, 0);
}

#[test]
fn single_cluster_guess_is_rejected_only_when_search_is_needed() {
    let narrow = SolverParams {
        max_cluster_guess: 1,
        ..params()
    };
    let clean = SignedGraph::from_edges([(0, 1, 1.0)]).unwrap();
    assert!(solve(&clean, &narrow, None, &mut seeded_rng(Some(1))).is_ok());

    let conflicted = SignedGraph::from_edges([(0, 1, 1.0), (1, 2, 1.0), (0, 2, -1.0)]).unwrap();
    let err = solve(&conflicted, &narrow, None, &mut seeded_rng(Some(1))).unwrap_err();
    assert!(matches!(err, SimError::Configuration(_)));
}

#[test]
fn isolated_nodes_stay_singletons() {
    let graph = SignedGraph::new(ids(&[0, 1, 2, 3, 4]), Vec::new()).unwrap();
    let sol = solve(&graph, &params(), None, &mut seeded_rng(Some(1))).unwrap();
    assert_eq!(sol.partition.len(), 5);
    assert_eq!(sol.partition.node_count(), 5);
}

#[test]
fn same_seed_same_partition() {
    let graph = SignedGraph::from_edges([
        (0, 1, 1.5),
        (1, 2, -0.5),
        (2, 3, 1.5),
        (3, 0, -0.5),
        (0, 2, 0.5),
        (1, 3, 0.5),
        (3, 4, 1.0),
        (4, 0, -1.0),
    ])
    .unwrap();
    let a = solve(&graph, &params(), None, &mut seeded_rng(Some(77))).unwrap();
    let b = solve(&graph, &params(), None, &mut seeded_rng(Some(77))).unwrap();
    assert_eq!(a, b);
}
