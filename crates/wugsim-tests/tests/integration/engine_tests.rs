use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wugsim_core::engine::annotator::{Annotator, NoisyAnnotator, NoisyAnnotatorParams};
use wugsim_core::engine::clustering::{
    ClusterContext, Clusterer, ConnectedComponentsClusterer, CorrelationClusterer,
    TimeDegradingClusterer,
};
use wugsim_core::engine::graph::{NodeId, Observation, UsageGraph};
use wugsim_core::engine::listener::{CheckpointListener, MetricListener};
use wugsim_core::engine::partition::Partition;
use wugsim_core::engine::reference::planted_partition;
use wugsim_core::engine::sampling::{
    AnnotatedSampler, Assignment, PageRankSampling, RandomSampling, SampleContext, Sampler,
};
use wugsim_core::engine::simulation::{ClusteringSchedule, RunState, Simulation, SimulationParams};
use wugsim_core::engine::stopping::{
    Connectivity, ConnectivityParams, EdgesAdded, EdgesFound, EntropyConvergence, EntropyParams,
    MinEdges,
};
use wugsim_core::metrics::MetricRegistry;
use wugsim_core::{seeded_rng, SimError, SimRng, SolverParams};

/// Replays one batch per call; empty once the script runs out.
struct Scripted {
    batches: Vec<Vec<Observation>>,
    next: AtomicUsize,
}

impl Scripted {
    fn new(batches: Vec<Vec<Observation>>) -> Self {
        Self {
            batches,
            next: AtomicUsize::new(0),
        }
    }
}

impl Sampler for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn sample(
        &self,
        _reference: &UsageGraph,
        _ctx: &mut SampleContext<'_>,
    ) -> Result<Vec<Observation>, SimError> {
        let idx = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(self.batches.get(idx).cloned().unwrap_or_default())
    }
}

struct Broken;

impl Annotator for Broken {
    fn annotate(
        &self,
        _u: NodeId,
        _v: NodeId,
        _true_value: f64,
        _rng: &mut SimRng,
    ) -> Result<f64, SimError> {
        Err(SimError::Strategy("annotator unavailable".into()))
    }
}

fn obs(u: u32, v: u32, w: f64) -> Observation {
    Observation::new(u, v, w)
}

fn reference(sizes: &[usize]) -> Arc<UsageGraph> {
    Arc::new(planted_partition(sizes, 4.0, 1.0).unwrap())
}

fn quick_solver() -> SolverParams {
    SolverParams {
        max_cluster_guess: 4,
        max_restarts: 3,
        max_iters_per_restart: 200,
        ..SolverParams::default()
    }
}

#[test]
fn edges_added_grows_by_batch_length() {
    let reference = reference(&[4, 4]);
    let annotators: Vec<Arc<dyn Annotator>> = vec![
        Arc::new(NoisyAnnotator::exact()),
        Arc::new(NoisyAnnotator::exact()),
    ];
    let sampler = AnnotatedSampler::new(
        Arc::new(RandomSampling { sample_size: 3 }),
        annotators,
        Assignment::Random {
            annotations_per_edge: 2,
        },
    )
    .unwrap();
    let sim = Simulation::new(
        reference,
        Arc::new(sampler),
        SimulationParams {
            max_iter: 6,
            ..SimulationParams::default()
        },
    );
    let mut run = sim.start(seeded_rng(Some(5))).unwrap();
    let mut round = 0u64;
    while run.state() == RunState::Running {
        run.step(&mut []).unwrap();
        round += 1;
        assert_eq!(run.graph().edges_added(), round * 6);
        let histories: usize = run.graph().edges().map(|(_, r)| r.annotations()).sum();
        assert_eq!(histories as u64, run.graph().edges_added());
    }
    assert_eq!(run.state(), RunState::MaxIterReached);
    assert_eq!(round, 6);
}

#[test]
fn connectivity_stops_in_the_round_of_the_third_link() {
    let within = vec![
        obs(0, 1, 4.0),
        obs(1, 2, 4.0),
        obs(3, 4, 4.0),
        obs(4, 5, 4.0),
        obs(5, 6, 4.0),
    ];
    let sampler = Scripted::new(vec![
        within,
        vec![obs(0, 3, 1.0), obs(1, 4, 1.0)],
        vec![obs(2, 6, 1.0)],
    ]);
    let criterion = Connectivity::new(ConnectivityParams {
        cluster_min_size: 2,
        min_num_edges: MinEdges::Count(3),
        min_size_one_cluster: None,
    })
    .unwrap();
    let sim = Simulation::new(
        reference(&[3, 4]),
        Arc::new(sampler),
        SimulationParams {
            max_iter: 10,
            ..SimulationParams::default()
        },
    )
    .with_clusterer(Arc::new(ConnectedComponentsClusterer))
    .with_criterion(Arc::new(criterion));

    let report = sim.run(seeded_rng(Some(1)), &mut []).unwrap();
    assert_eq!(report.state, RunState::StoppingHit);
    assert_eq!(report.rounds, 3);
    let snapshot = report.criteria[0].snapshot.as_ref().unwrap();
    assert_eq!(snapshot.edges_added, 8);
    assert_eq!(snapshot.graph.cluster_sizes(), vec![4, 3]);
}

#[test]
fn entropy_converges_once_the_graph_stops_changing() {
    let sampler = Scripted::new(vec![vec![obs(0, 1, 4.0), obs(1, 2, 4.0)]; 10]);
    let sim = Simulation::new(
        reference(&[3]),
        Arc::new(sampler),
        SimulationParams {
            max_iter: 20,
            ..SimulationParams::default()
        },
    )
    .with_criterion(Arc::new(
        EntropyConvergence::new(EntropyParams {
            timesteps: 4,
            ..EntropyParams::default()
        })
        .unwrap(),
    ));
    let mut run = sim.start(seeded_rng(Some(1))).unwrap();
    while run.step(&mut []).unwrap() == RunState::Running {}
    assert_eq!(run.state(), RunState::StoppingHit);
    assert_eq!(run.round(), 4);
    assert_eq!(run.history(0).len(), 4);
}

/// Correlation clustering that counts its invocations.
struct Counting {
    inner: CorrelationClusterer,
    calls: AtomicUsize,
}

impl Clusterer for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn cluster(
        &self,
        graph: &UsageGraph,
        ctx: &mut ClusterContext<'_>,
    ) -> Result<Partition, SimError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.cluster(graph, ctx)
    }
}

#[test]
fn on_demand_schedule_clusters_only_for_consumers() {
    let build = |schedule| {
        let counting = Arc::new(Counting {
            inner: CorrelationClusterer::new(quick_solver()).unwrap(),
            calls: AtomicUsize::new(0),
        });
        let sim = Simulation::new(
            reference(&[3, 3]),
            Arc::new(RandomSampling { sample_size: 4 }),
            SimulationParams {
                max_iter: 3,
                stop_on_first_hit: false,
                schedule,
            },
        )
        .with_clusterer(counting.clone())
        .with_criterion(Arc::new(EdgesAdded { number_edges: 1 }))
        .with_criterion(Arc::new(EdgesFound { number_edges: 1000 }));
        (sim, counting)
    };

    let (sim, counting) = build(ClusteringSchedule::OnDemand);
    let lazy = sim.run(seeded_rng(Some(2)), &mut []).unwrap();
    assert_eq!(lazy.state, RunState::MaxIterReached);
    // Once for the round-1 snapshot, once when the run ends; round 2 has no
    // consumer of the partition.
    assert_eq!(counting.calls.load(Ordering::SeqCst), 2);

    let (sim, counting) = build(ClusteringSchedule::EveryRound);
    let eager = sim.run(seeded_rng(Some(2)), &mut []).unwrap();
    assert_eq!(counting.calls.load(Ordering::SeqCst), 3);

    for report in [&lazy, &eager] {
        let snapshot = &report.criteria[0].snapshot.as_ref().unwrap().graph;
        assert_eq!(snapshot.edges_added(), 4);
        snapshot.partition().check_covers(snapshot.node_set()).unwrap();
        report.graph.partition().check_covers(report.graph.node_set()).unwrap();
        assert!(report.graph.unclustered_nodes().is_empty());
    }
}

#[test]
fn without_first_hit_stop_every_criterion_gets_its_snapshot() {
    let sim = Simulation::new(
        reference(&[4, 4]),
        Arc::new(RandomSampling { sample_size: 2 }),
        SimulationParams {
            max_iter: 100,
            stop_on_first_hit: false,
            ..SimulationParams::default()
        },
    )
    .with_criterion(Arc::new(EdgesAdded { number_edges: 10 }))
    .with_criterion(Arc::new(EdgesAdded { number_edges: 4 }));

    let report = sim.run(seeded_rng(Some(3)), &mut []).unwrap();
    assert_eq!(report.state, RunState::StoppingHit);
    assert_eq!(report.rounds, 5);
    let rounds: Vec<usize> = report
        .criteria
        .iter()
        .map(|c| c.snapshot.as_ref().unwrap().round)
        .collect();
    assert_eq!(rounds, vec![5, 2]);
    assert_eq!(report.stopping_graph().edges_added(), 4);
    // Snapshots are frozen copies.
    assert_eq!(report.criteria[1].snapshot.as_ref().unwrap().graph.edges_added(), 4);
    assert_eq!(report.graph.edges_added(), 10);
}

#[test]
fn max_iter_without_hit() {
    let sim = Simulation::new(
        reference(&[3, 3]),
        Arc::new(RandomSampling { sample_size: 1 }),
        SimulationParams {
            max_iter: 4,
            ..SimulationParams::default()
        },
    )
    .with_criterion(Arc::new(EdgesAdded { number_edges: 100 }));
    let report = sim.run(seeded_rng(Some(3)), &mut []).unwrap();
    assert_eq!(report.state, RunState::MaxIterReached);
    assert_eq!(report.rounds, 4);
    assert!(!report.stopping_hit());
    assert_eq!(report.stopping_graph(), &report.graph);
}

#[test]
fn annotator_failure_aborts_the_run() {
    let sampler = AnnotatedSampler::new(
        Arc::new(RandomSampling { sample_size: 2 }),
        vec![Arc::new(Broken) as Arc<dyn Annotator>],
        Assignment::PerAnnotator,
    )
    .unwrap();
    let sim = Simulation::new(reference(&[3, 3]), Arc::new(sampler), SimulationParams::default());
    let mut run = sim.start(seeded_rng(Some(1))).unwrap();
    let err = run.step(&mut []).unwrap_err();
    assert_eq!(err, SimError::Strategy("annotator unavailable".into()));
    assert_eq!(run.graph().edges_added(), 0);
}

#[test]
fn thresholds_crossed_together_fire_in_one_round() {
    let reference = reference(&[3, 3]);
    let sim = Simulation::new(
        reference.clone(),
        Arc::new(RandomSampling { sample_size: 5 }),
        SimulationParams {
            max_iter: 3,
            ..SimulationParams::default()
        },
    )
    .with_clusterer(Arc::new(ConnectedComponentsClusterer));
    let mut listener = MetricListener::new(reference, vec![1, 3, 5, 12, 100])
        .unwrap()
        .with_metrics(&MetricRegistry::with_builtins(), &["ari", "cluster_size_jsd"])
        .unwrap()
        .keeping_snapshots();

    let report = sim
        .run(seeded_rng(Some(4)), &mut [&mut listener as &mut dyn CheckpointListener])
        .unwrap();
    assert_eq!(report.state, RunState::MaxIterReached);

    let fired: Vec<(u64, usize)> = listener.rows().iter().map(|r| (r.threshold, r.round)).collect();
    assert_eq!(fired, vec![(1, 1), (3, 1), (5, 1), (12, 3)]);
    assert_eq!(listener.snapshots()[0], listener.snapshots()[2]);
    for row in listener.rows() {
        let ari = row.values[0].1;
        assert!((-1.0..=1.0).contains(&ari));
    }
    let padded = listener.padded_rows();
    assert_eq!(padded.len(), 5);
    assert_eq!(padded[4].round, 3);
}

#[test]
fn non_increasing_listener_thresholds_are_rejected_at_first_step() {
    struct Fixed(Vec<u64>);
    impl CheckpointListener for Fixed {
        fn thresholds(&self) -> &[u64] {
            &self.0
        }
        fn on_checkpoint(
            &mut self,
            _checkpoint: &wugsim_core::engine::listener::Checkpoint<'_>,
        ) -> Result<(), SimError> {
            Ok(())
        }
    }

    let sim = Simulation::new(
        reference(&[3]),
        Arc::new(RandomSampling { sample_size: 1 }),
        SimulationParams::default(),
    );
    let mut run = sim.start(seeded_rng(Some(1))).unwrap();
    let mut bad = Fixed(vec![5, 5]);
    let err = run.step(&mut [&mut bad as &mut dyn CheckpointListener]).unwrap_err();
    assert!(matches!(err, SimError::Configuration(_)));
}

#[test]
fn concurrent_runs_share_one_simulation() {
    let sampler = AnnotatedSampler::new(
        Arc::new(PageRankSampling::new(4, 0.3).unwrap()),
        vec![
            Arc::new(NoisyAnnotator::new(NoisyAnnotatorParams::default()).unwrap())
                as Arc<dyn Annotator>,
        ],
        Assignment::PerAnnotator,
    )
    .unwrap();
    let sim = Simulation::new(
        reference(&[4, 3, 2]),
        Arc::new(sampler),
        SimulationParams {
            max_iter: 8,
            ..SimulationParams::default()
        },
    )
    .with_clusterer(Arc::new(TimeDegradingClusterer::new(quick_solver(), 2).unwrap()));

    let reports: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = [9u64, 9, 10]
            .into_iter()
            .map(|seed| {
                let sim = &sim;
                scope.spawn(move || sim.run(seeded_rng(Some(seed)), &mut []).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(reports[0], reports[1]);
    assert_eq!(reports[0].rounds, 8);
    assert_eq!(reports[2].rounds, 8);
}
