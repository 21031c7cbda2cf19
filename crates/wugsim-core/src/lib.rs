//! # Wugsim Core
//!
//! Simulation of noisy word usage graph annotation: incremental sampling of
//! judgments, correlation clustering of the partially observed graph, and
//! statistical stopping criteria.

#[cfg(feature = "serde")]
pub mod config;
pub mod engine;
pub mod metrics;

// Re-export commonly used types
pub use engine::errors::SimError;
pub use engine::graph::{NodeId, Observation, SignedGraph, UsageGraph};
pub use engine::partition::Partition;
pub use engine::simulation::{Simulation, SimulationReport, SimulationRun};
pub use engine::solver::{solve, SolverParams};
pub use engine::{seeded_rng, SimRng};
