//! Checkpoint listeners.
//!
//! A listener declares strictly increasing thresholds on the edges-added
//! counter. The engine fires each threshold at most once, in the first round
//! whose counter reaches it, handing over that round's annotated graph. If a
//! single round crosses several thresholds they all fire in that round, in
//! order, with the same graph.

use std::sync::Arc;

use crate::engine::errors::SimError;
use crate::engine::graph::UsageGraph;
use crate::metrics::{MetricFn, MetricRegistry};

/// What a listener receives when one of its thresholds fires.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint<'a> {
    pub threshold: u64,
    /// Round (1-based) in which the threshold fired.
    pub round: usize,
    pub edges_added: u64,
    pub graph: &'a UsageGraph,
}

/// Trait for checkpoint consumers.
pub trait CheckpointListener: Send {
    /// Thresholds on the edges-added counter, strictly increasing.
    fn thresholds(&self) -> &[u64];

    fn on_checkpoint(&mut self, checkpoint: &Checkpoint<'_>) -> Result<(), SimError>;
}

/// Rejects threshold lists that are not strictly increasing.
pub fn validate_thresholds(thresholds: &[u64]) -> Result<(), SimError> {
    if let Some(pair) = thresholds.windows(2).find(|w| w[0] >= w[1]) {
        return Err(SimError::config(format!(
            "checkpoint thresholds must be strictly increasing ({} then {})",
            pair[0], pair[1]
        )));
    }
    Ok(())
}

/// Metric values recorded at one checkpoint.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricRow {
    pub threshold: u64,
    pub round: usize,
    pub edges_added: u64,
    pub nodes: usize,
    pub edges: usize,
    pub clusters: usize,
    /// `(metric name, value)` in registration order.
    pub values: Vec<(String, f64)>,
}

/// Compares every checkpoint graph against the reference with a list of
/// metrics and keeps the rows in memory.
pub struct MetricListener {
    reference: Arc<UsageGraph>,
    thresholds: Vec<u64>,
    metrics: Vec<(String, Arc<dyn MetricFn>)>,
    rows: Vec<MetricRow>,
    keep_snapshots: bool,
    snapshots: Vec<UsageGraph>,
}

impl std::fmt::Debug for MetricListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.metrics.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("MetricListener")
            .field("thresholds", &self.thresholds)
            .field("metrics", &names)
            .field("rows", &self.rows.len())
            .finish()
    }
}

impl MetricListener {
    pub fn new(reference: Arc<UsageGraph>, thresholds: Vec<u64>) -> Result<Self, SimError> {
        validate_thresholds(&thresholds)?;
        Ok(Self {
            reference,
            thresholds,
            metrics: Vec::new(),
            rows: Vec::new(),
            keep_snapshots: false,
            snapshots: Vec::new(),
        })
    }

    pub fn with_metric(mut self, name: &str, metric: Arc<dyn MetricFn>) -> Self {
        self.metrics.push((name.to_string(), metric));
        self
    }

    /// Adds every metric in `names`, resolved through `registry`.
    pub fn with_metrics<S: AsRef<str>>(
        mut self,
        registry: &MetricRegistry,
        names: &[S],
    ) -> Result<Self, SimError> {
        for name in names {
            let metric = registry.resolve(name.as_ref())?;
            self.metrics.push((name.as_ref().to_string(), metric));
        }
        Ok(self)
    }

    /// Also keep a copy of every checkpoint graph.
    pub fn keeping_snapshots(mut self) -> Self {
        self.keep_snapshots = true;
        self
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn snapshots(&self) -> &[UsageGraph] {
        &self.snapshots
    }

    /// Rows for every threshold; thresholds the run never reached repeat the
    /// last recorded row. Empty if nothing was recorded.
    pub fn padded_rows(&self) -> Vec<MetricRow> {
        let mut rows = self.rows.clone();
        if let Some(last) = self.rows.last() {
            for threshold in self.thresholds.iter().skip(self.rows.len()) {
                rows.push(MetricRow {
                    threshold: *threshold,
                    ..last.clone()
                });
            }
        }
        rows
    }

    pub fn into_rows(self) -> Vec<MetricRow> {
        self.rows
    }
}

impl CheckpointListener for MetricListener {
    fn thresholds(&self) -> &[u64] {
        &self.thresholds
    }

    fn on_checkpoint(&mut self, checkpoint: &Checkpoint<'_>) -> Result<(), SimError> {
        let graph = checkpoint.graph;
        let mut values = Vec::with_capacity(self.metrics.len());
        for (name, metric) in &self.metrics {
            values.push((name.clone(), metric.compare(&self.reference, graph)?));
        }
        self.rows.push(MetricRow {
            threshold: checkpoint.threshold,
            round: checkpoint.round,
            edges_added: checkpoint.edges_added,
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            clusters: graph.partition().len(),
            values,
        });
        if self.keep_snapshots {
            self.snapshots.push(graph.clone());
        }
        Ok(())
    }
}
