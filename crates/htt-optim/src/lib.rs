//! Bevel models and the particle-swarm optimizer that fits them.
//!
//! - [`pso`] is a bounded, seeded particle-swarm minimizer over any
//!   [`SwarmCost`].
//! - [`models`] holds the bevel variants. Each owns its own
//!   [`htt_core::ScheimpflugTransform`], rasterizes its projected polygon
//!   and scores it against a [`htt_core::LossField`].
//!
//! The optimizer knows nothing about bevels; the pipeline crate wires a
//! model's `set_free_params`/`mse` pair into a cost closure.

/// Parametric bevel models and polyline scoring.
pub mod models;
/// Particle-swarm optimization.
pub mod pso;

pub use models::{
    BevelModel, CustomBevelModel, FitTarget, Measures, MiniBevelModel, ModelCore, ModelType,
    ShrinkOffsets, TBevelModel, TestMeasures, EMPTY_BEVEL_LOSS,
};
pub use pso::*;
