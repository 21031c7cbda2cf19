//! Sampling strategies.
//!
//! A [`Sampler`] reads the reference graph and returns this round's
//! observations in order. It may inspect the annotated graph through the
//! [`SampleContext`] but never mutates it; walk positions are kept in the
//! run-owned [`SamplerState`].
//!
//! Pairs without a reference weight are skipped, so a sampler may return
//! fewer observations than its nominal `sample_size`.

use std::sync::Arc;

use rand::seq::{index, SliceRandom};
use rand::Rng;

use crate::engine::annotator::Annotator;
use crate::engine::errors::SimError;
use crate::engine::graph::{NodeId, Observation, UsageGraph};
use crate::engine::SimRng;

/// Per-run sampler memory, reset at run start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerState {
    /// Endpoint of the last sampled pair.
    pub last_node: Option<NodeId>,
    /// Independent walk positions, one per annotator stream.
    streams: Vec<SamplerState>,
}

impl SamplerState {
    /// State of stream `idx`, created on first use.
    pub fn stream(&mut self, idx: usize) -> &mut SamplerState {
        if self.streams.len() <= idx {
            self.streams.resize_with(idx + 1, SamplerState::default);
        }
        &mut self.streams[idx]
    }
}

/// Inputs of one sampling call.
pub struct SampleContext<'a> {
    pub rng: &'a mut SimRng,
    pub state: &'a mut SamplerState,
    /// Read-only view of the graph annotated so far.
    pub annotated: &'a UsageGraph,
}

/// Trait for sampling strategy implementations.
pub trait Sampler: Send + Sync {
    fn name(&self) -> &str;

    fn sample(
        &self,
        reference: &UsageGraph,
        ctx: &mut SampleContext<'_>,
    ) -> Result<Vec<Observation>, SimError>;
}

fn observe(reference: &UsageGraph, u: NodeId, v: NodeId) -> Option<Observation> {
    reference
        .weight(u, v)
        .map(|weight| Observation { u, v, weight })
}

/// A node of `nodes` other than `avoid`; `None` if there is none.
fn other_node(nodes: &[NodeId], avoid: NodeId, rng: &mut SimRng) -> Option<NodeId> {
    match nodes.len() {
        0 => None,
        1 if nodes[0] == avoid => None,
        _ => loop {
            let candidate = *nodes.choose(rng)?;
            if candidate != avoid {
                return Some(candidate);
            }
        },
    }
}

/// Uniformly random distinct node pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RandomSampling {
    pub sample_size: usize,
}

impl Sampler for RandomSampling {
    fn name(&self) -> &str {
        "random"
    }

    fn sample(
        &self,
        reference: &UsageGraph,
        ctx: &mut SampleContext<'_>,
    ) -> Result<Vec<Observation>, SimError> {
        let nodes: Vec<NodeId> = reference.nodes().collect();
        if nodes.len() < 2 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(self.sample_size);
        for _ in 0..self.sample_size {
            let picked = index::sample(ctx.rng, nodes.len(), 2);
            let (u, v) = (nodes[picked.index(0)], nodes[picked.index(1)]);
            let (u, v) = if u < v { (u, v) } else { (v, u) };
            if let Some(obs) = observe(reference, u, v) {
                out.push(obs);
            }
        }
        Ok(out)
    }
}

/// Teleporting walk over the node set.
///
/// Each step starts at the previous endpoint, or with probability `tp_coef`
/// at a uniformly random node, and moves to a uniformly random other node.
/// `tp_coef = 1` is random sampling, `tp_coef = 0` a pure random walk.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PageRankSampling {
    pub sample_size: usize,
    pub tp_coef: f64,
}

impl PageRankSampling {
    pub fn new(sample_size: usize, tp_coef: f64) -> Result<Self, SimError> {
        let sampler = Self {
            sample_size,
            tp_coef,
        };
        sampler.validate()?;
        Ok(sampler)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.sample_size == 0 {
            return Err(SimError::config("page rank sample_size must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.tp_coef) {
            return Err(SimError::config(format!(
                "tp_coef {} outside [0, 1]",
                self.tp_coef
            )));
        }
        Ok(())
    }
}

impl Sampler for PageRankSampling {
    fn name(&self) -> &str {
        "page_rank"
    }

    fn sample(
        &self,
        reference: &UsageGraph,
        ctx: &mut SampleContext<'_>,
    ) -> Result<Vec<Observation>, SimError> {
        let nodes: Vec<NodeId> = reference.nodes().collect();
        let start = ctx
            .state
            .last_node
            .filter(|n| reference.contains_node(*n))
            .or_else(|| nodes.choose(ctx.rng).copied());
        let Some(mut last) = start else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(self.sample_size);
        for _ in 0..self.sample_size {
            if ctx.rng.gen_bool(self.tp_coef) {
                if let Some(node) = nodes.choose(ctx.rng) {
                    last = *node;
                }
            }
            let Some(next) = other_node(&nodes, last, ctx.rng) else {
                break;
            };
            if let Some(obs) = observe(reference, last, next) {
                out.push(obs);
            }
            last = next;
        }
        ctx.state.last_node = Some(last);
        Ok(out)
    }
}

/// How annotators are assigned to sampled pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "mode", rename_all = "snake_case")
)]
pub enum Assignment {
    /// Every sampled pair is judged by `annotations_per_edge` distinct,
    /// randomly chosen annotators.
    Random { annotations_per_edge: usize },
    /// Each annotator runs the inner sampler on its own walk and judges its
    /// own pairs.
    PerAnnotator,
    /// The inner sampler runs once; consecutive chunks of its pairs go to the
    /// annotators in order.
    Across,
}

/// Wraps a sampler and replaces reference weights by annotator judgments.
#[derive(Clone)]
pub struct AnnotatedSampler {
    inner: Arc<dyn Sampler>,
    annotators: Vec<Arc<dyn Annotator>>,
    assignment: Assignment,
}

impl std::fmt::Debug for AnnotatedSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotatedSampler")
            .field("inner", &self.inner.name())
            .field("annotators", &self.annotators.len())
            .field("assignment", &self.assignment)
            .finish()
    }
}

impl AnnotatedSampler {
    pub fn new(
        inner: Arc<dyn Sampler>,
        annotators: Vec<Arc<dyn Annotator>>,
        assignment: Assignment,
    ) -> Result<Self, SimError> {
        if annotators.is_empty() {
            return Err(SimError::config("annotated sampling needs at least one annotator"));
        }
        if let Assignment::Random {
            annotations_per_edge,
        } = assignment
        {
            if annotations_per_edge == 0 || annotations_per_edge > annotators.len() {
                return Err(SimError::config(format!(
                    "annotations_per_edge {} must be in 1..={} (distinct annotators)",
                    annotations_per_edge,
                    annotators.len()
                )));
            }
        }
        Ok(Self {
            inner,
            annotators,
            assignment,
        })
    }

    fn judge(
        &self,
        annotator: usize,
        obs: Observation,
        rng: &mut SimRng,
    ) -> Result<Observation, SimError> {
        let weight = self.annotators[annotator].annotate(obs.u, obs.v, obs.weight, rng)?;
        Ok(Observation { weight, ..obs })
    }
}

impl Sampler for AnnotatedSampler {
    fn name(&self) -> &str {
        "annotated"
    }

    fn sample(
        &self,
        reference: &UsageGraph,
        ctx: &mut SampleContext<'_>,
    ) -> Result<Vec<Observation>, SimError> {
        let count = self.annotators.len();
        let mut out = Vec::new();
        match self.assignment {
            Assignment::Random {
                annotations_per_edge,
            } => {
                for obs in self.inner.sample(reference, ctx)? {
                    for idx in index::sample(ctx.rng, count, annotations_per_edge) {
                        out.push(self.judge(idx, obs, ctx.rng)?);
                    }
                }
            }
            Assignment::PerAnnotator => {
                for idx in 0..count {
                    let mut stream = SampleContext {
                        rng: &mut *ctx.rng,
                        state: ctx.state.stream(idx),
                        annotated: ctx.annotated,
                    };
                    let batch = self.inner.sample(reference, &mut stream)?;
                    for obs in batch {
                        out.push(self.judge(idx, obs, ctx.rng)?);
                    }
                }
            }
            Assignment::Across => {
                let batch = self.inner.sample(reference, ctx)?;
                let len = batch.len();
                for (pos, obs) in batch.into_iter().enumerate() {
                    out.push(self.judge(pos * count / len, obs, ctx.rng)?);
                }
            }
        }
        Ok(out)
    }
}
