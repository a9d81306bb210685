//! Calibration of the ten transform parameters.
//!
//! Three entry points share one retry loop:
//! - [`OptimizationEngine::calibrate_frame`]: a mini-bevel anchored on five
//!   image points of the calibration jig must reproduce the jig's reference
//!   base length and flank angles;
//! - [`OptimizationEngine::calibrate_multi_frame`]: the same on several
//!   frames at once, each at its own stylus orientation, matching the
//!   averaged measures;
//! - [`OptimizationEngine::calibrate_grid`]: the back-projected corners of a
//!   3 mm reference square must form a square.

use std::sync::Arc;

use htt_core::{LossField, Profile, Real, ScheimpflugParams, ScheimpflugTransform, Vec2};
use htt_optim::{
    minimize, BevelModel, FitTarget, Measures, MiniBevelModel, ModelType, PsoOptions, PsoReport,
    PsoStatus, SearchSpace, SwarmCost, TestMeasures, EMPTY_BEVEL_LOSS,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    engine::OptimizationEngine,
    return_code::{ProcessType, ReturnCode},
};

/// Side of the reference square (mm).
pub const GRID_SIDE_MM: Real = 3.0;

/// Result of a frame or multi-frame calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOutput {
    /// Best parameters found (the start parameters if the swarm never ran).
    pub params: ScheimpflugParams,
    /// Calibration bevel under `params` (first frame for multi-frame runs).
    pub bevel: Profile,
    pub measures: Measures,
    pub loss: Real,
    pub iteration: usize,
    pub r: Real,
    pub h: Real,
    pub rcode: ReturnCode,
}

/// Result of a grid calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOutput {
    pub params: ScheimpflugParams,
    pub loss: Real,
    pub iteration: usize,
    pub r: Real,
    pub h: Real,
    pub rcode: ReturnCode,
}

/// One acquisition of the calibration jig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFrame {
    pub profile: Profile,
    /// The five mini-bevel vertices picked on the frame (pixels).
    pub points: Vec<Vec2>,
    /// Stylus angle `R` (degrees).
    pub r: Real,
    /// Stylus angle `H` (degrees).
    pub h: Real,
}

/// Outcome of the retry loop.
struct SwarmRun {
    /// Report of the attempt `rcode` describes: the accepted one, or else
    /// the lowest-loss one.
    best: Option<PsoReport>,
    rcode: ReturnCode,
}

impl SwarmRun {
    fn accepted(&self) -> Option<&PsoReport> {
        match self.rcode {
            ReturnCode::CalibrationSuccessful => self.best.as_ref(),
            _ => None,
        }
    }

    fn loss(&self) -> Real {
        self.best.as_ref().map_or(EMPTY_BEVEL_LOSS, |r| r.loss)
    }

    fn iteration(&self, n_iterations: usize) -> usize {
        self.best
            .as_ref()
            .and_then(|r| r.optimum_iteration)
            .unwrap_or(n_iterations)
    }

    fn params(&self, start: &ScheimpflugParams) -> ScheimpflugParams {
        self.best
            .as_ref()
            .map_or(*start, |r| start.with_free_vector(&r.optimum_x))
    }
}

/// Run the swarm until `accept(loss)` holds or the retries run out.
///
/// Optima on the box boundary are discarded unless `permit_boundary` is set.
/// Each attempt is classified on its own; the returned code always belongs
/// to the returned report.
fn run_with_retries<C: SwarmCost + ?Sized>(
    cost: &mut C,
    space: &SearchSpace,
    pso: &PsoOptions,
    max_retries: usize,
    permit_boundary: bool,
    accept: impl Fn(Real) -> bool,
) -> SwarmRun {
    let mut run = SwarmRun {
        best: None,
        rcode: ReturnCode::CalibrationFailedPsoInit,
    };

    for attempt in 0..max_retries.max(1) {
        let opts = pso.with_seed(pso.seed.wrapping_add(attempt as u64));
        let report = match minimize(&mut *cost, space, &opts) {
            Ok(report) => report,
            Err(e) => {
                warn!("calibration swarm failed on attempt {}: {e}", attempt + 1);
                continue;
            }
        };

        let rcode = if report.status == PsoStatus::BoundaryReached && !permit_boundary {
            warn!("calibration optimum on the search-space boundary (attempt {})", attempt + 1);
            ReturnCode::CalibrationFailedSearchSpace
        } else if accept(report.loss) {
            ReturnCode::CalibrationSuccessful
        } else {
            ReturnCode::CalibrationFailedConvergence
        };

        let accepted = rcode == ReturnCode::CalibrationSuccessful;
        if accepted || run.best.as_ref().map_or(true, |b| report.loss < b.loss) {
            run.best = Some(report);
            run.rcode = rcode;
        }
        if accepted {
            break;
        }
    }
    run
}

/// Squared error of `measured` against the reference base length and angles.
fn reference_cost(reference: &TestMeasures, measured: &TestMeasures) -> Real {
    (reference.m - measured.m).powi(2)
        + (measured.angle1 - reference.angle1).powi(2)
        + (measured.angle2 - reference.angle2).powi(2)
}

impl OptimizationEngine {
    fn calibration_target(&self, profile: &Profile) -> Option<FitTarget> {
        let opt = &self.config.optimization;
        let process = opt.process(ProcessType::Calibration)?;
        profile.validate().ok()?;
        let field = LossField::build(
            self.config.image.width,
            self.config.image.height,
            profile,
            &opt.loss_field_params(process),
        );
        Some(FitTarget::new(
            Arc::new(field),
            profile,
            process.check_intersections,
            opt.intersection_threshold,
            self.config
                .search_space
                .get(ModelType::MiniBevel)
                .weight
                .clone(),
        ))
    }

    fn calibration_model(&self, st: &ScheimpflugTransform) -> MiniBevelModel {
        let angle = self
            .config
            .search_space
            .get(ModelType::MiniBevel)
            .bevel_angle;
        let mut model = MiniBevelModel::new(st.clone(), angle);
        model.core_mut().set_debug(self.config.optimization.debug);
        model
    }

    /// Relative error acceptance of the reference measures.
    fn reference_acceptance(&self) -> (TestMeasures, impl Fn(Real) -> bool) {
        let reference = self.config.calibration.reference.to_test_measures();
        let norm = (reference.b * reference.b + reference.m * reference.m).sqrt();
        let epsilon = self.config.calibration.epsilon;
        (reference, move |loss: Real| loss.sqrt() / norm <= epsilon)
    }

    /// Rebuild `model` under `params` and collect its bevel and measures.
    fn finish_model(
        model: &mut MiniBevelModel,
        params: &ScheimpflugParams,
        points: &[Vec2],
    ) -> (Profile, Measures) {
        model.core_mut().transform_mut().init(params);
        model.set_from_img_points(points);
        let bevel = if model.core().fit_target().is_some() {
            model.bevel()
        } else {
            Profile::default()
        };
        model.log_measures();
        (bevel, model.measures())
    }

    fn failed_transform(st: &ScheimpflugTransform, n_iterations: usize, rcode: ReturnCode) -> TransformOutput {
        TransformOutput {
            params: *st.params(),
            bevel: Profile::default(),
            measures: Measures::new(),
            loss: EMPTY_BEVEL_LOSS,
            iteration: n_iterations,
            r: st.r(),
            h: st.h(),
            rcode,
        }
    }

    /// Calibrate the transform on one frame of the calibration jig.
    ///
    /// `st` is the starting transform at the frame's stylus orientation;
    /// `points` are the five mini-bevel vertices on the frame. An accepted
    /// result becomes the active calibration.
    pub fn calibrate_frame(
        &mut self,
        st: &ScheimpflugTransform,
        profile: &Profile,
        points: &[Vec2],
    ) -> TransformOutput {
        let calib = self.config.calibration.clone();
        let n_iterations = calib.pso.n_iterations;

        let mut model = self.calibration_model(st);
        if let Some(target) = self.calibration_target(profile) {
            model.core_mut().set_fit_target(target);
        }
        if !model.set_from_img_points(points) {
            warn!("frame calibration needs 5 valid image points, got {}", points.len());
            return Self::failed_transform(st, n_iterations, ReturnCode::CalibrationFailedLineDetection);
        }
        let space = match calib.bounds.search_space() {
            Ok(space) => space,
            Err(e) => {
                warn!("invalid calibration bounds: {e}");
                return Self::failed_transform(st, n_iterations, ReturnCode::CalibrationFailedSearchSpace);
            }
        };

        let (reference, accept) = self.reference_acceptance();
        let run = run_with_retries(
            &mut |x: &[Real]| {
                model.core_mut().transform_mut().init_from_vector(x);
                model.update_from_image();
                reference_cost(&reference, &model.test_measures())
            },
            &space,
            &calib.pso,
            calib.max_retries,
            calib.permit_boundary_solutions,
            accept,
        );

        let params = run.params(st.params());
        let mut out = TransformOutput {
            params,
            bevel: Profile::default(),
            measures: Measures::new(),
            loss: run.loss(),
            iteration: run.iteration(n_iterations),
            r: st.r(),
            h: st.h(),
            rcode: run.rcode,
        };
        if run.accepted().is_some() {
            info!("frame calibration accepted: loss {:.3e}", out.loss);
            self.set_active_calibration(&params);
            (out.bevel, out.measures) = Self::finish_model(&mut model, &params, points);
        } else {
            warn!("frame calibration rejected: {} (loss {:.3e})", out.rcode, out.loss);
        }
        out
    }

    /// Calibrate the transform on several frames sharing one parameter set.
    ///
    /// Each frame keeps its own stylus orientation. The cost compares the
    /// measures averaged over the first `k_training` frames. An accepted
    /// result becomes the active calibration.
    pub fn calibrate_multi_frame(&mut self, frames: &[CalibrationFrame]) -> TransformOutput {
        let calib = self.config.calibration.clone();
        let n_iterations = calib.multi_frame_pso.n_iterations;
        let start = self.transform.clone();

        let Some(first) = frames.first() else {
            warn!("multi-frame calibration without frames");
            return Self::failed_transform(&start, n_iterations, ReturnCode::CalibrationFailedLineDetection);
        };

        let mut models = Vec::with_capacity(frames.len());
        for (i, frame) in frames.iter().enumerate() {
            let mut model = self.calibration_model(&self.transform_at(frame.r, frame.h));
            if !model.set_from_img_points(&frame.points) {
                warn!("frame {i}: need 5 image points, got {}", frame.points.len());
                return Self::failed_transform(
                    &self.transform_at(frame.r, frame.h),
                    n_iterations,
                    ReturnCode::CalibrationFailedLineDetection,
                );
            }
            models.push(model);
        }
        let space = match calib.bounds.search_space() {
            Ok(space) => space,
            Err(e) => {
                warn!("invalid calibration bounds: {e}");
                return Self::failed_transform(&start, n_iterations, ReturnCode::CalibrationFailedSearchSpace);
            }
        };

        let k = calib.k_training.unwrap_or(models.len()).clamp(1, models.len());
        let (reference, accept) = self.reference_acceptance();
        let run = run_with_retries(
            &mut |x: &[Real]| {
                let mut avg = TestMeasures::default();
                for model in models.iter_mut().take(k) {
                    model.core_mut().transform_mut().init_from_vector(x);
                    model.update_from_image();
                    let tm = model.test_measures();
                    avg.b += tm.b;
                    avg.m += tm.m;
                    avg.angle1 += tm.angle1;
                    avg.angle2 += tm.angle2;
                }
                let n = k as Real;
                avg.b /= n;
                avg.m /= n;
                avg.angle1 /= n;
                avg.angle2 /= n;
                reference_cost(&reference, &avg)
            },
            &space,
            &calib.multi_frame_pso,
            calib.max_retries,
            calib.permit_boundary_solutions,
            accept,
        );

        let params = run.params(start.params());
        let mut out = TransformOutput {
            params,
            bevel: Profile::default(),
            measures: Measures::new(),
            loss: run.loss(),
            iteration: run.iteration(n_iterations),
            r: first.r,
            h: first.h,
            rcode: run.rcode,
        };
        if run.accepted().is_some() {
            info!("multi-frame calibration accepted on {} of {} frames", k, frames.len());
            self.set_active_calibration(&params);
            let target = self.calibration_target(&first.profile);
            if let Some(model) = models.first_mut() {
                if let Some(target) = target {
                    model.core_mut().set_fit_target(target);
                }
                (out.bevel, out.measures) = Self::finish_model(model, &params, &first.points);
            }
        } else {
            warn!("multi-frame calibration rejected: {} (loss {:.3e})", out.rcode, out.loss);
        }
        out
    }

    /// Calibrate the transform on a reference grid.
    ///
    /// `points` are the grid intersections in detection order: the end
    /// points of each line (constant-row lines first), then the centre.
    /// The corners of the reference square are picked from that order and
    /// must back-project to a 3 mm square. The stylus orientation comes
    /// from the grid configuration. With `save_values` an accepted result
    /// becomes the active calibration.
    pub fn calibrate_grid(
        &mut self,
        st: &ScheimpflugTransform,
        points: &[Vec2],
        save_values: bool,
    ) -> GridOutput {
        let calib = self.config.calibration.clone();
        let grid = calib.grid;
        let n_iterations = calib.pso.n_iterations;

        let mut st = st.clone();
        st.set_stylus_orientation(grid.delta_n, grid.h);
        let start = *st.params();
        let failed = |st: &ScheimpflugTransform, rcode| GridOutput {
            params: *st.params(),
            loss: EMPTY_BEVEL_LOSS,
            iteration: n_iterations,
            r: st.r(),
            h: st.h(),
            rcode,
        };

        let Some(corners) = square_corners(points) else {
            warn!("grid of {} points has no reference square", points.len());
            return failed(&st, ReturnCode::CalibrationFailedGrid);
        };
        let space = match calib.bounds.search_space() {
            Ok(space) => space,
            Err(e) => {
                warn!("invalid calibration bounds: {e}");
                return failed(&st, ReturnCode::CalibrationFailedSearchSpace);
            }
        };

        let nominal = calib.nominal.free_vector();
        let lambda = grid.lambda;
        let epsilon = calib.epsilon_grid;
        let run = run_with_retries(
            &mut |x: &[Real]| {
                st.init_from_vector(x);
                let [a, b, c, d] = corners.map(|p| st.image_to_object(&p));
                let mut err = 0.0;
                if lambda > 0.0 {
                    err += lambda
                        * nominal
                            .iter()
                            .zip(x)
                            .map(|(n, v)| (n - v).powi(2))
                            .sum::<Real>();
                }
                err + square_error(&a, &b, &c, &d)
            },
            &space,
            &calib.pso,
            calib.max_retries,
            calib.permit_boundary_solutions,
            |loss| loss < epsilon,
        );

        let params = run.params(&start);
        st.init(&params);
        let out = GridOutput {
            params,
            loss: run.loss(),
            iteration: run.iteration(n_iterations),
            r: st.r(),
            h: st.h(),
            rcode: run.rcode,
        };
        if run.accepted().is_some() {
            info!("grid calibration accepted: loss {:.3e}", out.loss);
            if save_values {
                self.set_active_calibration(&params);
            }
        } else {
            warn!("grid calibration rejected: {} (loss {:.3e})", out.rcode, out.loss);
        }
        out
    }
}

/// Corners `[A, B, C, D]` of the reference square in detection order.
///
/// With `n_lines = (N - 1) / 2` line end-point pairs, `A`/`B` are the ends
/// of the first line and `D`/`C` those of line `n_lines / 2 - 1`.
pub fn square_corners(points: &[Vec2]) -> Option<[Vec2; 4]> {
    let n_lines = points.len().checked_sub(1)? / 2;
    let half = n_lines >> 1;
    if half < 2 {
        return None;
    }
    let off = (half - 1) * 2;
    Some([
        *points.first()?,
        *points.get(1)?,
        *points.get(off + 1)?,
        *points.get(off)?,
    ])
}

/// Squared deviation of the four sides and two diagonals of `ABCD` from
/// the reference square.
pub fn square_error(a: &Vec2, b: &Vec2, c: &Vec2, d: &Vec2) -> Real {
    let side = GRID_SIDE_MM;
    let diag = GRID_SIDE_MM * std::f64::consts::SQRT_2;
    let sides: Real = [(a, b), (c, b), (c, d), (a, d)]
        .iter()
        .map(|(p, q)| ((*p - *q).norm() - side).powi(2))
        .sum();
    let diagonals: Real = [(a, c), (b, d)]
        .iter()
        .map(|(p, q)| ((*p - *q).norm() - diag).powi(2))
        .sum();
    sides + diagonals
}

#[cfg(test)]
mod tests {
    use super::*;
    use htt_core::synthetic::calibration_grid_points;

    #[test]
    fn corners_of_the_hough_grid() {
        let pts = calibration_grid_points(GRID_SIDE_MM, 7);
        let [a, b, c, d] = square_corners(&pts).unwrap();
        assert_eq!(a, Vec2::new(0.0, 0.0));
        assert_eq!(b, Vec2::new(3.0, 0.0));
        assert_eq!(c, Vec2::new(3.0, 3.0));
        assert_eq!(d, Vec2::new(0.0, 3.0));
        assert!(square_error(&a, &b, &c, &d) < 1e-20);
    }

    #[test]
    fn too_small_grid_has_no_square() {
        let pts = calibration_grid_points(GRID_SIDE_MM, 2);
        assert_eq!(pts.len(), 9);
        assert!(square_corners(&pts).is_some());
        assert!(square_corners(&pts[..5]).is_none());
        assert!(square_corners(&[]).is_none());
    }

    #[test]
    fn stretched_square_costs_its_errors() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(4.0, 0.0);
        let c = Vec2::new(4.0, 3.0);
        let d = Vec2::new(0.0, 3.0);
        // Two sides off by 1, both diagonals 5 instead of 3√2.
        let expected = 2.0 + 2.0 * (5.0 - 3.0 * std::f64::consts::SQRT_2).powi(2);
        assert!((square_error(&a, &b, &c, &d) - expected).abs() < 1e-12);
    }

    #[test]
    fn retries_report_search_space_failure() {
        let space = SearchSpace::new(vec![0.0], vec![1.0]).unwrap();
        let pso = PsoOptions {
            n_iterations: 20,
            n_particles: 10,
            ..PsoOptions::default()
        };
        let mut cost = |x: &[Real]| (x[0] - 3.0).powi(2);
        let run = run_with_retries(&mut cost, &space, &pso, 2, false, |l| l < 10.0);
        assert_eq!(run.rcode, ReturnCode::CalibrationFailedSearchSpace);
        assert!(run.accepted().is_none());

        let run = run_with_retries(&mut cost, &space, &pso, 2, true, |l| l < 10.0);
        assert_eq!(run.rcode, ReturnCode::CalibrationSuccessful);
        assert!((run.loss() - 4.0).abs() < 1e-3, "loss {}", run.loss());

        let run = run_with_retries(&mut cost, &space, &pso, 2, true, |l| l < 1.0);
        assert_eq!(run.rcode, ReturnCode::CalibrationFailedConvergence);

        let mut inf = |_: &[Real]| Real::INFINITY;
        let run = run_with_retries(&mut inf, &space, &pso, 2, true, |_| true);
        assert_eq!(run.rcode, ReturnCode::CalibrationFailedPsoInit);
        assert_eq!(run.loss(), EMPTY_BEVEL_LOSS);
    }

    #[test]
    fn reported_code_belongs_to_the_reported_attempt() {
        let space = SearchSpace::new(vec![0.0], vec![1.0]).unwrap();
        let pso = PsoOptions {
            n_iterations: 20,
            n_particles: 10,
            ..PsoOptions::default()
        };
        let per_attempt = pso.n_particles * (pso.n_iterations + 1);

        // Attempt 1 ends on the boundary with loss 4; attempt 2 converges
        // inside the box with loss 5.
        let mut calls = 0usize;
        let mut cost = |x: &[Real]| {
            calls += 1;
            if calls <= per_attempt {
                (x[0] - 3.0).powi(2)
            } else {
                (x[0] - 0.5).powi(2) + 5.0
            }
        };
        let run = run_with_retries(&mut cost, &space, &pso, 2, false, |l| l < 1.0);
        assert_eq!(run.rcode, ReturnCode::CalibrationFailedSearchSpace);
        assert!((run.loss() - 4.0).abs() < 1e-9, "loss {}", run.loss());
        assert_eq!(run.best.as_ref().map(|r| r.optimum_x[0]), Some(1.0));

        // Reversed: the interior attempt has the lower loss.
        let mut calls = 0usize;
        let mut cost = |x: &[Real]| {
            calls += 1;
            if calls <= per_attempt {
                (x[0] - 0.5).powi(2) + 2.0
            } else {
                (x[0] - 3.0).powi(2)
            }
        };
        let run = run_with_retries(&mut cost, &space, &pso, 2, false, |l| l < 1.0);
        assert_eq!(run.rcode, ReturnCode::CalibrationFailedConvergence);
        assert!((run.loss() - 2.0).abs() < 1e-3, "loss {}", run.loss());
    }
}
