//! Lens fitting and transform calibration on top of `htt-core` and `htt-optim`.
//!
//! [`OptimizationEngine`] is the single entry point. It holds an
//! [`EngineConfig`] and the active calibration, and exposes:
//! - lens fitting: [`OptimizationEngine::init_model`],
//!   [`OptimizationEngine::optimize_model`] and the one-call
//!   [`OptimizationEngine::fit_profile`];
//! - calibration: [`OptimizationEngine::calibrate_frame`],
//!   [`OptimizationEngine::calibrate_multi_frame`] and
//!   [`OptimizationEngine::calibrate_grid`].
//!
//! Every entry returns an output bundle with a [`ReturnCode`]; nothing
//! fails across the crate boundary except configuration loading.

/// Transform calibration from a jig frame or a reference grid.
pub mod calibration;
/// Serde configuration of the engine.
pub mod config;
/// Lens fitting.
pub mod engine;
/// Return codes and process selectors.
pub mod return_code;
/// Profile anchors and model search boxes.
pub mod search_space;

pub use calibration::{CalibrationFrame, GridOutput, TransformOutput};
pub use config::{ConfigError, EngineConfig};
pub use engine::{FitOutput, ModelInit, OptimizationEngine};
pub use return_code::{CalibrationType, ProcessType, ReturnCode};
pub use search_space::{find_anchors, Anchors};

pub use htt_optim::{Measures, ModelType};
