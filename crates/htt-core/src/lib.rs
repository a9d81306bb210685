//! Core geometry primitives for hot-tip bevel profiling.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Vec3`, ...) and rotation helpers,
//! - the tilted-lens [`ScheimpflugTransform`] mapping the object plane (mm) to
//!   the sensor (pixels) and back,
//! - the detected edge [`Profile`] and the per-pixel [`LossField`] carved from it,
//! - deterministic synthetic helpers used by tests and demos.
//!
//! Projection pipeline:
//! `pixel = T ∘ ray/plane(sensor) ∘ stretch(R + δ) ∘ RZ(-H) (object)`

/// Per-pixel loss raster built from a detected profile.
pub mod loss_field;
/// Linear algebra type aliases and rotation helpers.
pub mod math;
/// Detected edge trace and auxiliary point sets.
pub mod profile;
/// Tilted-lens projection model.
pub mod scheimpflug;
/// Synthetic profiles and grids.
pub mod synthetic;

pub use loss_field::*;
pub use math::*;
pub use profile::*;
pub use scheimpflug::*;
