//! The simulation engine for word usage graph annotation.
//!
//! This module provides:
//! - **errors**: Error type shared by every fallible operation
//! - **graph**: Usage graph with annotation histories, signed solver view
//! - **partition**: Disjoint clusters with canonical cluster ids
//! - **solver**: Correlation clustering over signed graphs
//! - **clustering**: `Clusterer` strategies built on the solver
//! - **stopping**: Stopping criteria evaluated after every round
//! - **sampling** / **annotator**: Observation sources and noise models
//! - **listener**: Checkpoint consumers keyed on the edges-added counter
//! - **simulation**: The round loop tying everything together
//! - **reference**: Reference ("true") graph recipes

pub mod annotator;
pub mod clustering;
pub mod errors;
pub mod graph;
pub mod listener;
mod local_search;
pub mod partition;
pub mod reference;
pub mod sampling;
pub mod simulation;
pub mod solver;
pub mod stopping;

use rand::SeedableRng;

/// Random source threaded through every randomized operation.
pub type SimRng = rand_chacha::ChaCha8Rng;

/// Seeded RNG, or one seeded from OS entropy when `seed` is `None`.
pub fn seeded_rng(seed: Option<u64>) -> SimRng {
    match seed {
        Some(seed) => SimRng::seed_from_u64(seed),
        None => SimRng::from_entropy(),
    }
}
