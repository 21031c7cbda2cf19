use wugsim_core::config::{ClustererConfig, CriterionConfig, RunConfig, SamplerConfig};
use wugsim_core::engine::annotator::{ErrorModel, ErrorSampling, NoisyAnnotatorParams};
use wugsim_core::engine::clustering::TimeDegradingClusterer;
use wugsim_core::engine::sampling::Assignment;
use wugsim_core::engine::simulation::{ClusteringSchedule, RunState};
use wugsim_core::engine::stopping::{ConnectivityParams, MinEdges};
use wugsim_core::{NodeId, SimError};

fn full_config() -> RunConfig {
    RunConfig {
        seed: Some(42),
        sampler: SamplerConfig::PageRank {
            sample_size: 6,
            tp_coef: 0.25,
        },
        annotators: vec![
            NoisyAnnotatorParams {
                zero_probability: 0.05,
                error: Some(ErrorSampling {
                    model: ErrorModel::Poisson { lambda: 0.3 },
                    min: 1.0,
                    max: 4.0,
                    add_probability: 0.5,
                }),
                ..NoisyAnnotatorParams::default()
            },
            NoisyAnnotatorParams {
                high_error_nodes: vec![NodeId(0), NodeId(3)],
                high_error: Some(ErrorSampling {
                    model: ErrorModel::Normal {
                        mean: 0.0,
                        std_dev: 1.0,
                    },
                    min: 1.0,
                    max: 4.0,
                    add_probability: 0.5,
                }),
                ..NoisyAnnotatorParams::default()
            },
        ],
        assignment: Assignment::Across,
        clusterer: Some(ClustererConfig::TimeDegrading(TimeDegradingClusterer::default())),
        schedule: ClusteringSchedule::OnDemand,
        criteria: vec![
            CriterionConfig::Connectivity(ConnectivityParams {
                cluster_min_size: 3,
                min_num_edges: MinEdges::Fully,
                min_size_one_cluster: Some(8),
            }),
            CriterionConfig::EdgeShareFound { share: 0.5 },
        ],
        checkpoints: vec![20, 40, 80],
        metrics: vec!["ari".into(), "cluster_size_jsd".into()],
        max_iter: 60,
        stop_on_first_hit: false,
        ..RunConfig::default()
    }
}

#[test]
fn json_round_trip_preserves_the_config() {
    let config = full_config();
    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: RunConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn documented_json_shape_parses() {
    let json = r#"{
        "seed": 1,
        "reference": {"kind": "planted_partition", "sizes": [5, 5], "within": 3.5},
        "sampler": {"kind": "random", "sample_size": 4},
        "annotators": [{"zero_probability": 0.1}],
        "assignment": {"mode": "random", "annotations_per_edge": 1},
        "clusterer": {"kind": "correlation", "solver": {"max_restarts": 2}},
        "schedule": "every_round",
        "criteria": [
            {"kind": "connectivity", "cluster_min_size": 2, "min_num_edges": {"count": 2}},
            {"kind": "bootstrap_divergence", "min_sample_size": 10, "rounds": 5},
            {"kind": "entropy_convergence", "timesteps": 3}
        ],
        "checkpoints": [10, 20],
        "max_iter": 30
    }"#;
    let config: RunConfig = serde_json::from_str(json).unwrap();
    match &config.clusterer {
        Some(ClustererConfig::Correlation(c)) => {
            assert_eq!(c.solver.max_restarts, 2);
            assert_eq!(c.solver.max_cluster_guess, 10);
        }
        other => panic!("unexpected clusterer {:?}", other),
    }
    assert_eq!(config.criteria.len(), 3);
    assert!(config.build().is_ok());
}

#[test]
fn built_run_executes_and_records_checkpoints() {
    let mut built = full_config().build().unwrap();
    let mut listener = built.listener.take().unwrap();
    let report = built
        .simulation
        .run(built.rng, &mut [&mut listener])
        .unwrap();
    assert_ne!(report.state, RunState::Running);
    assert!(report.rounds <= 60);
    for row in listener.rows() {
        assert_eq!(row.values.len(), 2);
        assert_eq!(row.values[0].0, "ari");
    }
    // Six observations per round reach the first threshold by round 4.
    assert!(!listener.rows().is_empty());
}

#[test]
fn contradictory_configs_fail_before_running() {
    let mut config = full_config();
    config.max_iter = 0;
    assert!(matches!(config.build(), Err(SimError::Configuration(_))));

    let mut config = full_config();
    config.checkpoints = vec![10, 5];
    assert!(matches!(config.build(), Err(SimError::Configuration(_))));

    let mut config = full_config();
    config.clusterer = None;
    assert!(matches!(config.build(), Err(SimError::Configuration(_))));

    let mut config = full_config();
    config.criteria = vec![CriterionConfig::EdgeShareFound { share: 2.0 }];
    assert!(matches!(config.build(), Err(SimError::Configuration(_))));
}
