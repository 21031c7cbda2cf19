//! Annotator noise models.
//!
//! An [`Annotator`] turns the reference judgment of a pair into the judgment a
//! (simulated) human annotator reports. [`NoisyAnnotator`] applies, in order:
//! 1. with `zero_probability`, the judgment [`NO_RELATION`] and nothing else;
//! 2. an error drawn from the pair's error model (the high-error model when
//!    either endpoint is a high-error node), added with `add_probability` and
//!    subtracted otherwise;
//! 3. clamping to the model's `[min, max]` range.

use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};
use rustc_hash::FxHashSet;

use crate::engine::errors::SimError;
use crate::engine::graph::{NodeId, NO_RELATION};
use crate::engine::SimRng;

/// Trait for annotator implementations.
pub trait Annotator: Send + Sync {
    fn annotate(
        &self,
        u: NodeId,
        v: NodeId,
        true_value: f64,
        rng: &mut SimRng,
    ) -> Result<f64, SimError>;
}

/// Distribution of the error magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "distribution", rename_all = "snake_case")
)]
pub enum ErrorModel {
    Poisson { lambda: f64 },
    Normal { mean: f64, std_dev: f64 },
}

impl ErrorModel {
    fn validate(&self) -> Result<(), SimError> {
        match *self {
            ErrorModel::Poisson { lambda } => Poisson::new(lambda)
                .map(|_| ())
                .map_err(|e| SimError::config(format!("poisson error model: {}", e))),
            ErrorModel::Normal { mean, std_dev } => Normal::new(mean, std_dev)
                .map(|_| ())
                .map_err(|e| SimError::config(format!("normal error model: {}", e))),
        }
    }

    fn sample(&self, rng: &mut SimRng) -> Result<f64, SimError> {
        let value = match *self {
            ErrorModel::Poisson { lambda } => Poisson::new(lambda)
                .map_err(|e| SimError::Numerical(e.to_string()))?
                .sample(rng),
            ErrorModel::Normal { mean, std_dev } => Normal::new(mean, std_dev)
                .map_err(|e| SimError::Numerical(e.to_string()))?
                .sample(rng),
        };
        Ok(value)
    }
}

/// Error model plus the direction and clamping applied to it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(deny_unknown_fields)
)]
pub struct ErrorSampling {
    pub model: ErrorModel,
    pub min: f64,
    pub max: f64,
    /// Probability that the error is added rather than subtracted.
    pub add_probability: f64,
}

impl ErrorSampling {
    pub fn validate(&self) -> Result<(), SimError> {
        self.model.validate()?;
        if !(self.min <= self.max) {
            return Err(SimError::config(format!(
                "error range [{}, {}] is empty",
                self.min, self.max
            )));
        }
        if !(0.0..=1.0).contains(&self.add_probability) {
            return Err(SimError::config(format!(
                "add_probability {} outside [0, 1]",
                self.add_probability
            )));
        }
        Ok(())
    }

    fn apply(&self, value: f64, rng: &mut SimRng) -> Result<f64, SimError> {
        let error = self.model.sample(rng)?;
        let signed = if rng.gen_bool(self.add_probability) {
            error
        } else {
            -error
        };
        Ok((value + signed).clamp(self.min, self.max))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct NoisyAnnotatorParams {
    pub zero_probability: f64,
    /// Error applied to ordinary pairs; `None` reports the true value.
    pub error: Option<ErrorSampling>,
    pub high_error_nodes: Vec<NodeId>,
    pub high_error: Option<ErrorSampling>,
}

/// Annotator with zero judgments, additive random error and high-error nodes.
#[derive(Debug, Clone, Default)]
pub struct NoisyAnnotator {
    zero_probability: f64,
    error: Option<ErrorSampling>,
    high_error_nodes: FxHashSet<NodeId>,
    high_error: Option<ErrorSampling>,
}

impl NoisyAnnotator {
    pub fn new(params: NoisyAnnotatorParams) -> Result<Self, SimError> {
        if !(0.0..=1.0).contains(&params.zero_probability) {
            return Err(SimError::config(format!(
                "zero_probability {} outside [0, 1]",
                params.zero_probability
            )));
        }
        if let Some(error) = &params.error {
            error.validate()?;
        }
        match &params.high_error {
            Some(error) => error.validate()?,
            None if !params.high_error_nodes.is_empty() => {
                return Err(SimError::config(
                    "high_error_nodes given without a high_error model",
                ));
            }
            None => {}
        }
        Ok(Self {
            zero_probability: params.zero_probability,
            error: params.error,
            high_error_nodes: params.high_error_nodes.into_iter().collect(),
            high_error: params.high_error,
        })
    }

    /// An annotator that always reports the true value.
    pub fn exact() -> Self {
        Self::default()
    }

    fn model_for(&self, u: NodeId, v: NodeId) -> Option<&ErrorSampling> {
        if self.high_error_nodes.contains(&u) || self.high_error_nodes.contains(&v) {
            self.high_error.as_ref()
        } else {
            self.error.as_ref()
        }
    }
}

impl Annotator for NoisyAnnotator {
    fn annotate(
        &self,
        u: NodeId,
        v: NodeId,
        true_value: f64,
        rng: &mut SimRng,
    ) -> Result<f64, SimError> {
        if self.zero_probability > 0.0 && rng.gen_bool(self.zero_probability) {
            return Ok(NO_RELATION);
        }
        match self.model_for(u, v) {
            Some(model) => model.apply(true_value, rng),
            None => Ok(true_value),
        }
    }
}
