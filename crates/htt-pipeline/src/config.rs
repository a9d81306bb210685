//! Engine configuration.
//!
//! One [`EngineConfig`] carries every bound, weight and swarm setting the
//! engine reads. All structs accept partial JSON: missing fields take their
//! defaults.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use htt_core::{LossFieldParams, Real, ScheimpflugParams, N_TRANSFORM_PARAMS, TRANSFORM_PARAM_NAMES};
use htt_optim::{ModelType, PsoOptions, SearchSpace, ShrinkOffsets, TestMeasures};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::return_code::ProcessType;

/// Errors raised by [`EngineConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A `[min, max]` pair is inverted or not finite.
    #[error("invalid bounds for {name}: [{min}, {max}]")]
    InvalidBounds {
        name: String,
        min: Real,
        max: Real,
    },
    /// A model has no segment weights.
    #[error("no segment weights configured for {0}")]
    MissingWeights(ModelType),
    /// The raster has no pixels.
    #[error("invalid image size {width}x{height}")]
    BadImageSize { width: usize, height: usize },
    /// A swarm with no particles or no iterations.
    #[error("empty swarm configured for {0}")]
    EmptySwarm(String),
}

/// Raster size of the camera images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub width: usize,
    pub height: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1024,
        }
    }
}

/// Loss-field margin and intersection policy of one process type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Shift of the carved gradients to the right of the profile (px).
    pub loss_field_margin: i32,
    /// Reject candidates crossing the detected edge.
    pub check_intersections: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            loss_field_margin: 2,
            check_intersections: true,
        }
    }
}

/// Loss-field geometry and intersection limits shared by all models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Dump search spaces, swarm settings and vertices at info level.
    pub debug: bool,
    /// Reach of the gradients right of the rightmost profile column (px).
    pub loss_field_right_offset: i32,
    /// Reach of the free rows left of the leftmost profile column (px).
    pub loss_field_left_offset: i32,
    /// Width of the band carved left of each profile point (px).
    pub left_gradient_width: i32,
    /// Maximum number of bevel pixels allowed on the wrong side of the edge.
    pub intersection_threshold: usize,
    pub lens_fitting: ProcessOptions,
    pub calibration: ProcessOptions,
    pub validation: ProcessOptions,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            debug: false,
            loss_field_right_offset: 60,
            loss_field_left_offset: 30,
            left_gradient_width: 6,
            intersection_threshold: 20,
            lens_fitting: ProcessOptions::default(),
            calibration: ProcessOptions {
                loss_field_margin: 0,
                check_intersections: false,
            },
            validation: ProcessOptions::default(),
        }
    }
}

impl OptimizationConfig {
    /// Options of a process that builds a loss field; `None` for the others.
    pub fn process(&self, process: ProcessType) -> Option<&ProcessOptions> {
        match process {
            ProcessType::LensFitting => Some(&self.lens_fitting),
            ProcessType::Calibration => Some(&self.calibration),
            ProcessType::Validation => Some(&self.validation),
            ProcessType::Testing | ProcessType::Measure => None,
        }
    }

    pub fn loss_field_params(&self, process: &ProcessOptions) -> LossFieldParams {
        LossFieldParams {
            margin: process.loss_field_margin,
            right_offset: self.loss_field_right_offset,
            left_offset: self.loss_field_left_offset,
            left_gradient_width: self.left_gradient_width,
        }
    }
}

/// Slope thresholds of the anchor scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencePointsConfig {
    /// Row distance of the two points a local slope is measured over.
    pub offset: usize,
    /// Upper anchor: first `Δx/Δy ≤ -up_threshold`.
    pub up_threshold: Real,
    /// Lower anchor: last `Δx/Δy ≥ lo_threshold`.
    pub lo_threshold: Real,
    /// Refinement threshold walking back up from the upper anchor.
    pub up_threshold_ref: Real,
    /// Refinement threshold walking down from the lower anchor.
    pub lo_threshold_ref: Real,
}

impl Default for ReferencePointsConfig {
    fn default() -> Self {
        Self {
            offset: 10,
            up_threshold: 0.8,
            lo_threshold: 0.2,
            up_threshold_ref: 0.5,
            lo_threshold_ref: 0.5,
        }
    }
}

/// Search-space heuristics of one model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpaceConfig {
    /// Half-width of the anchor window (px).
    pub win_size_x: i32,
    /// Half-height of the anchor window (px).
    pub win_size_y: i32,
    pub reference_points: ReferencePointsConfig,
    pub min_m_multiplier: Real,
    pub max_m_multiplier: Real,
    /// Offset added to the estimated base tilt (rad).
    pub min_alpha: Real,
    pub max_alpha: Real,
    pub min_b_multiplier: Real,
    pub max_b_multiplier: Real,
    /// Upper step bounds of the custom bevel (px).
    pub min_s: Real,
    pub max_s: Real,
    /// Front face bounds of the custom bevel (px).
    pub min_e: Real,
    pub max_e: Real,
    /// Half-range of the free bevel angle (degrees).
    pub delta_beta: Real,
    /// Bevel angle of the mini-bevel (degrees).
    pub bevel_angle: Real,
    /// Per-segment loss weights.
    pub weight: Vec<Real>,
    /// Shrink of `M` applied when a T-bevel is finalized (mm).
    pub shrink_offset_m: Real,
    /// Shrink of `B` applied when a T-bevel is finalized (mm).
    pub shrink_offset_b: Real,
    /// Image row below which the T-bevel face is scored on shifted rows.
    pub offset_row_threshold: i32,
}

impl Default for SearchSpaceConfig {
    fn default() -> Self {
        Self {
            win_size_x: 20,
            win_size_y: 20,
            reference_points: ReferencePointsConfig::default(),
            min_m_multiplier: 0.8,
            max_m_multiplier: 1.2,
            min_alpha: -0.2,
            max_alpha: 0.2,
            min_b_multiplier: 0.7,
            max_b_multiplier: 1.3,
            min_s: 30.0,
            max_s: 200.0,
            min_e: 20.0,
            max_e: 100.0,
            delta_beta: 10.0,
            bevel_angle: 55.0,
            weight: vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 1.0],
            shrink_offset_m: 0.0,
            shrink_offset_b: 0.0,
            offset_row_threshold: 200,
        }
    }
}

impl SearchSpaceConfig {
    pub fn shrink_offsets(&self) -> ShrinkOffsets {
        ShrinkOffsets {
            m: self.shrink_offset_m,
            b: self.shrink_offset_b,
        }
    }
}

/// One value per model type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerModel<T> {
    pub mini_bevel: T,
    pub t_bevel: T,
    pub custom_bevel: T,
    pub mini_bevel_ext: T,
}

impl<T> PerModel<T> {
    pub fn get(&self, model: ModelType) -> &T {
        match model {
            ModelType::MiniBevel => &self.mini_bevel,
            ModelType::TBevel => &self.t_bevel,
            ModelType::CustomBevel => &self.custom_bevel,
            ModelType::MiniBevelExt => &self.mini_bevel_ext,
        }
    }

    pub fn get_mut(&mut self, model: ModelType) -> &mut T {
        match model {
            ModelType::MiniBevel => &mut self.mini_bevel,
            ModelType::TBevel => &mut self.t_bevel,
            ModelType::CustomBevel => &mut self.custom_bevel,
            ModelType::MiniBevelExt => &mut self.mini_bevel_ext,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (ModelType, &T)> {
        [
            (ModelType::MiniBevel, &self.mini_bevel),
            (ModelType::TBevel, &self.t_bevel),
            (ModelType::CustomBevel, &self.custom_bevel),
            (ModelType::MiniBevelExt, &self.mini_bevel_ext),
        ]
        .into_iter()
    }
}

/// Closed interval of one transform parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: Real,
    pub max: Real,
}

impl Bound {
    pub fn new(min: Real, max: Real) -> Self {
        Self { min, max }
    }

    fn around(center: Real, half: Real) -> Self {
        Self::new(center - half, center + half)
    }
}

/// Calibration box of the ten transform parameters (degrees, mm, px).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformBounds {
    pub alpha: Bound,
    pub beta: Bound,
    pub cx0: Bound,
    pub cy0: Bound,
    pub delta: Bound,
    pub p1: Bound,
    pub p2: Bound,
    pub phi: Bound,
    pub theta: Bound,
    pub tt: Bound,
}

impl Default for TransformBounds {
    fn default() -> Self {
        let n = ScheimpflugParams::default();
        Self {
            alpha: Bound::around(n.alpha, 5.0),
            beta: Bound::around(n.beta, 5.0),
            cx0: Bound::around(n.cx0, 40.0),
            cy0: Bound::around(n.cy0, 40.0),
            delta: Bound::around(n.delta, 5.0),
            p1: Bound::around(n.p1, 5.0),
            p2: Bound::around(n.p2, 5.0),
            phi: Bound::around(n.phi, 5.0),
            theta: Bound::around(n.theta, 5.0),
            tt: Bound::around(n.tt, 5.0),
        }
    }
}

impl TransformBounds {
    /// Bounds in flat-vector order.
    pub fn as_array(&self) -> [Bound; N_TRANSFORM_PARAMS] {
        [
            self.alpha, self.beta, self.cx0, self.cy0, self.delta, self.p1, self.p2, self.phi,
            self.theta, self.tt,
        ]
    }

    pub fn search_space(&self) -> Result<SearchSpace, htt_optim::PsoError> {
        let b = self.as_array();
        SearchSpace::new(b.iter().map(|b| b.min).collect(), b.iter().map(|b| b.max).collect())
    }
}

/// Measures of the calibration jig (mm, angles in degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceMeasures {
    pub b: Real,
    pub m: Real,
    pub angle1: Real,
    pub angle2: Real,
}

impl Default for ReferenceMeasures {
    fn default() -> Self {
        Self {
            b: 1.4,
            m: 4.0,
            angle1: 55.0,
            angle2: 55.0,
        }
    }
}

impl ReferenceMeasures {
    /// Same measures with the angles in radians.
    pub fn to_test_measures(&self) -> TestMeasures {
        TestMeasures {
            b: self.b,
            m: self.m,
            angle1: self.angle1.to_radians(),
            angle2: self.angle2.to_radians(),
        }
    }
}

/// Grid calibration settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Stylus angle `H` the grid is imaged at (degrees).
    pub h: Real,
    /// Stylus angle `R` the grid is imaged at (degrees).
    pub delta_n: Real,
    /// Weight of the pull towards the nominal parameters (0 disables it).
    pub lambda: Real,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            h: 0.0,
            delta_n: 0.0,
            lambda: 0.0,
        }
    }
}

/// Transform calibration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Swarm of single-frame and grid calibration.
    pub pso: PsoOptions,
    /// Swarm of multi-frame calibration.
    pub multi_frame_pso: PsoOptions,
    /// Accepted relative error of the reference measures.
    pub epsilon: Real,
    /// Accepted grid loss.
    pub epsilon_grid: Real,
    pub max_retries: usize,
    /// Accept optima lying on the transform bounds.
    pub permit_boundary_solutions: bool,
    /// Frames entering the multi-frame cost (all when `None`).
    pub k_training: Option<usize>,
    /// Regularization target and default transform.
    pub nominal: ScheimpflugParams,
    /// Currently active calibration.
    pub transform: ScheimpflugParams,
    pub bounds: TransformBounds,
    pub reference: ReferenceMeasures,
    pub grid: GridConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            pso: PsoOptions::default(),
            multi_frame_pso: PsoOptions {
                n_iterations: 50,
                n_particles: 10_000,
                ..PsoOptions::default()
            },
            epsilon: 0.05,
            epsilon_grid: 0.01,
            max_retries: 3,
            permit_boundary_solutions: false,
            k_training: None,
            nominal: ScheimpflugParams::default(),
            transform: ScheimpflugParams::default(),
            bounds: TransformBounds::default(),
            reference: ReferenceMeasures::default(),
            grid: GridConfig::default(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub image: ImageConfig,
    pub optimization: OptimizationConfig,
    pub search_space: PerModel<SearchSpaceConfig>,
    pub pso: PerModel<PsoOptions>,
    pub calibration: CalibrationConfig,
}

impl EngineConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.width == 0 || self.image.height == 0 {
            return Err(ConfigError::BadImageSize {
                width: self.image.width,
                height: self.image.height,
            });
        }

        for (model, ss) in self.search_space.iter() {
            if ss.weight.is_empty() {
                return Err(ConfigError::MissingWeights(model));
            }
            let pairs = [
                ("m_multiplier", ss.min_m_multiplier, ss.max_m_multiplier),
                ("alpha", ss.min_alpha, ss.max_alpha),
                ("b_multiplier", ss.min_b_multiplier, ss.max_b_multiplier),
                ("s", ss.min_s, ss.max_s),
                ("e", ss.min_e, ss.max_e),
            ];
            for (name, min, max) in pairs {
                check_bound(&format!("{model}.{name}"), min, max)?;
            }
        }

        for (model, pso) in self.pso.iter() {
            check_swarm(&model.to_string(), pso)?;
        }
        check_swarm("calibration", &self.calibration.pso)?;
        check_swarm("multi-frame calibration", &self.calibration.multi_frame_pso)?;

        for (name, b) in TRANSFORM_PARAM_NAMES
            .iter()
            .zip(self.calibration.bounds.as_array())
        {
            check_bound(name, b.min, b.max)?;
        }
        Ok(())
    }
}

fn check_bound(name: &str, min: Real, max: Real) -> Result<(), ConfigError> {
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(ConfigError::InvalidBounds {
            name: name.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

fn check_swarm(name: &str, pso: &PsoOptions) -> Result<(), ConfigError> {
    if pso.n_particles == 0 || pso.n_iterations == 0 {
        return Err(ConfigError::EmptySwarm(name.to_string()));
    }
    Ok(())
}
