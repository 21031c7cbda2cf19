//! Graph comparison metrics.
//!
//! Statistics used by the stopping criteria and a small registry of metrics
//! that checkpoint listeners evaluate against the reference graph:
//! - `adjusted_rand_index(a, b)` over two labelings of the same items
//! - `jensen_shannon_distance(p, q)` in base 2 over two histograms
//! - `percentile(values, q)` with linear interpolation
//!
//! Notes:
//! - Histograms of different length are zero-padded before comparison.
//! - Node-level metrics only consider nodes observed in the candidate graph
//!   and assigned in the reference partition.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::engine::errors::SimError;
use crate::engine::graph::{NodeId, UsageGraph};

/// Adjusted Rand index between two labelings of the same items.
///
/// Identical labelings score 1.0, including the degenerate cases (no items,
/// one cluster each, all singletons). Chance agreement scores around 0.0.
pub fn adjusted_rand_index<A, B>(labels_a: &[A], labels_b: &[B]) -> Result<f64, SimError>
where
    A: Eq + Hash + Copy,
    B: Eq + Hash + Copy,
{
    if labels_a.len() != labels_b.len() {
        return Err(SimError::Numerical(format!(
            "labelings differ in length ({} vs {})",
            labels_a.len(),
            labels_b.len()
        )));
    }
    let n = labels_a.len() as f64;

    let mut contingency: FxHashMap<(A, B), f64> = FxHashMap::default();
    let mut rows: FxHashMap<A, f64> = FxHashMap::default();
    let mut cols: FxHashMap<B, f64> = FxHashMap::default();
    for (a, b) in labels_a.iter().zip(labels_b) {
        *contingency.entry((*a, *b)).or_default() += 1.0;
        *rows.entry(*a).or_default() += 1.0;
        *cols.entry(*b).or_default() += 1.0;
    }

    // Pair confusion counts (ordered pairs).
    let sum_squares: f64 = contingency.values().map(|c| c * c).sum();
    let row_squares: f64 = rows.values().map(|c| c * c).sum();
    let col_squares: f64 = cols.values().map(|c| c * c).sum();
    let tp = sum_squares - n;
    let fp = col_squares - sum_squares;
    let fn_ = row_squares - sum_squares;
    let tn = n * n - fp - fn_ - sum_squares;

    if fn_ == 0.0 && fp == 0.0 {
        return Ok(1.0);
    }
    let denominator = (tp + fn_) * (fn_ + tn) + (tp + fp) * (fp + tn);
    if denominator == 0.0 {
        return Err(SimError::Numerical(
            "adjusted rand index is undefined for these labelings".into(),
        ));
    }
    Ok(2.0 * (tp * tn - fn_ * fp) / denominator)
}

/// Jensen-Shannon distance (square root of the divergence) in base 2.
///
/// Both inputs are normalized to sum to one; the result lies in `[0, 1]`.
pub fn jensen_shannon_distance(p: &[f64], q: &[f64]) -> Result<f64, SimError> {
    let len = p.len().max(q.len());
    let at = |v: &[f64], i: usize| v.get(i).copied().unwrap_or(0.0);

    let normalizer = |v: &[f64]| -> Result<f64, SimError> {
        if v.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(SimError::Numerical(
                "histogram entries must be finite and non-negative".into(),
            ));
        }
        let total: f64 = v.iter().sum();
        if total <= 0.0 {
            return Err(SimError::Numerical("histogram has zero mass".into()));
        }
        Ok(total)
    };
    let (sp, sq) = (normalizer(p)?, normalizer(q)?);

    let mut divergence = 0.0;
    for i in 0..len {
        let (pi, qi) = (at(p, i) / sp, at(q, i) / sq);
        let mi = (pi + qi) / 2.0;
        divergence += relative_entropy(pi, mi) + relative_entropy(qi, mi);
    }
    let js = (divergence / 2.0 / std::f64::consts::LN_2).max(0.0);
    Ok(js.sqrt())
}

fn relative_entropy(x: f64, y: f64) -> f64 {
    if x > 0.0 && y > 0.0 {
        x * (x / y).ln()
    } else {
        0.0
    }
}

/// `q`-th percentile (`0..=100`) of `values` with linear interpolation between
/// the closest ranks.
pub fn percentile(values: &[f64], q: f64) -> Result<f64, SimError> {
    if !(0.0..=100.0).contains(&q) {
        return Err(SimError::config(format!(
            "percentile {} outside [0, 100]",
            q
        )));
    }
    if values.is_empty() {
        return Err(SimError::Numerical("percentile of an empty sample".into()));
    }
    if values.iter().any(|v| v.is_nan()) {
        return Err(SimError::Numerical("percentile of a sample with NaN".into()));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Ok(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Trait for metrics comparing a candidate (annotated) graph to the reference.
pub trait MetricFn: Send + Sync + 'static {
    fn compare(&self, reference: &UsageGraph, candidate: &UsageGraph) -> Result<f64, SimError>;
}

/// Adjusted Rand index between the reference and candidate partitions, over
/// the nodes the candidate has observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustedRandIndex;

impl MetricFn for AdjustedRandIndex {
    fn compare(&self, reference: &UsageGraph, candidate: &UsageGraph) -> Result<f64, SimError> {
        let (truth, predicted) = shared_labels(reference, candidate);
        adjusted_rand_index(&truth, &predicted)
    }
}

/// Jensen-Shannon distance between the cluster-size distributions of the
/// reference and candidate partitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterSizeDivergence;

impl MetricFn for ClusterSizeDivergence {
    fn compare(&self, reference: &UsageGraph, candidate: &UsageGraph) -> Result<f64, SimError> {
        let as_hist = |g: &UsageGraph| -> Vec<f64> {
            g.cluster_sizes().into_iter().map(|s| s as f64).collect()
        };
        let (p, q) = (as_hist(reference), as_hist(candidate));
        if q.is_empty() {
            return Ok(1.0);
        }
        jensen_shannon_distance(&p, &q)
    }
}

fn shared_labels(reference: &UsageGraph, candidate: &UsageGraph) -> (Vec<i64>, Vec<i64>) {
    let reference_partition = reference.partition();
    let candidate_partition = candidate.partition();
    candidate
        .nodes()
        .filter_map(|node: NodeId| {
            let truth = reference_partition.cluster_of(node)?;
            Some((i64::from(truth.0), candidate_partition.label_of(node)))
        })
        .unzip()
}

/// Registry mapping names to metric implementations.
#[derive(Default, Clone)]
pub struct MetricRegistry {
    inner: HashMap<String, Arc<dyn MetricFn>>,
}

impl MetricRegistry {
    pub fn with_builtins() -> Self {
        let mut r = MetricRegistry::default();
        r.register("ari", Arc::new(AdjustedRandIndex));
        r.register("cluster_size_jsd", Arc::new(ClusterSizeDivergence));
        r
    }

    pub fn register(&mut self, name: &str, f: Arc<dyn MetricFn>) {
        self.inner.insert(name.to_string(), f);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MetricFn>> {
        self.inner.get(name).cloned()
    }

    /// Looks up `name`, reporting unknown names as configuration errors.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn MetricFn>, SimError> {
        self.get(name)
            .ok_or_else(|| SimError::config(format!("unknown metric '{}'", name)))
    }

    /// Registered names in ascending order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("metrics", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ari_of_identical_labelings_is_one() {
        let a = [0, 0, 1, 1, 2];
        let b = ['x', 'x', 'y', 'y', 'z'];
        assert_eq!(adjusted_rand_index(&a, &b).unwrap(), 1.0);
        let empty: [u8; 0] = [];
        assert_eq!(adjusted_rand_index(&empty, &empty).unwrap(), 1.0);
        assert_eq!(adjusted_rand_index(&[5, 5, 5], &[1, 1, 1]).unwrap(), 1.0);
    }

    #[test]
    fn ari_matches_known_value() {
        // sklearn: adjusted_rand_score([0, 0, 1, 1], [0, 0, 1, 2]) == 0.5714285714285715
        let ari = adjusted_rand_index(&[0, 0, 1, 1], &[0, 0, 1, 2]).unwrap();
        assert!((ari - 4.0 / 7.0).abs() < 1e-12);
        // sklearn: adjusted_rand_score([0, 0, 1, 1], [0, 1, 0, 1]) == -0.5
        let ari = adjusted_rand_index(&[0, 0, 1, 1], &[0, 1, 0, 1]).unwrap();
        assert!((ari + 0.5).abs() < 1e-12);
    }

    #[test]
    fn ari_rejects_length_mismatch() {
        assert!(adjusted_rand_index(&[0, 1], &[0]).is_err());
    }

    #[test]
    fn jsd_bounds_and_padding() {
        assert_eq!(jensen_shannon_distance(&[3.0, 1.0], &[6.0, 2.0]).unwrap(), 0.0);
        let disjoint = jensen_shannon_distance(&[1.0], &[0.0, 1.0]).unwrap();
        assert!((disjoint - 1.0).abs() < 1e-12);
        assert!(jensen_shannon_distance(&[0.0], &[1.0]).is_err());
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&v, 0.0).unwrap(), 1.0);
        assert_eq!(percentile(&v, 100.0).unwrap(), 4.0);
        assert!((percentile(&v, 50.0).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(percentile(&[0.3], 97.5).unwrap(), 0.3);
        assert!(percentile(&[], 50.0).is_err());
        assert!(percentile(&v, 101.0).is_err());
    }

    #[test]
    fn registry_resolves_builtins() {
        let reg = MetricRegistry::with_builtins();
        assert_eq!(reg.names(), vec!["ari", "cluster_size_jsd"]);
        assert!(reg.resolve("ari").is_ok());
        assert!(reg.resolve("purity").is_err());
    }
}
