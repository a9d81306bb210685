//! Lens fitting: fit a bevel model to a detected profile.
//!
//! [`OptimizationEngine::init_model`] carves the loss field, finds the
//! anchors and builds the search box; [`OptimizationEngine::optimize_model`]
//! runs the swarm with retries and finalizes the accepted solution. Neither
//! returns an error: failures are reported through [`ReturnCode`].

use std::sync::Arc;

use htt_core::{LossField, Profile, Real, ScheimpflugParams, ScheimpflugTransform};
use htt_optim::{
    minimize, BevelModel, CustomBevelModel, FitTarget, Measures, MiniBevelModel, ModelType,
    PsoOptions, PsoStatus, SearchSpace, TBevelModel, EMPTY_BEVEL_LOSS,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::EngineConfig,
    return_code::{ProcessType, ReturnCode},
    search_space::{find_anchors, model_search_space, Anchors, InitialEstimate},
};

/// Everything one lens-fitting run needs, produced by
/// [`OptimizationEngine::init_model`].
#[derive(Debug)]
pub struct ModelInit {
    pub model: Box<dyn BevelModel>,
    pub pso: PsoOptions,
    pub search_space: SearchSpace,
    pub anchors: Anchors,
    pub loss_field: Arc<LossField>,
    /// Input profile annotated with the anchors.
    pub profile: Profile,
}

/// Result of a lens-fitting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutput {
    /// Rasterized bevel with its vertices, distance points and anchors.
    pub bevel: Profile,
    pub measures: Measures,
    pub loss: Real,
    /// Swarm iteration at which the optimum was found.
    pub iteration: usize,
    pub model_type: ModelType,
    /// Stylus angle `R` (degrees).
    pub r: Real,
    /// Stylus angle `H` (degrees).
    pub h: Real,
    pub rcode: ReturnCode,
}

impl FitOutput {
    fn failed(model_type: ModelType, st: &ScheimpflugTransform, iterations: usize, rcode: ReturnCode) -> Self {
        Self {
            bevel: Profile::default(),
            measures: Measures::new(),
            loss: EMPTY_BEVEL_LOSS,
            iteration: iterations,
            model_type,
            r: st.r(),
            h: st.h(),
            rcode,
        }
    }
}

/// Fitting and calibration front-end holding the configuration and the
/// active calibration.
#[derive(Debug, Clone)]
pub struct OptimizationEngine {
    pub(crate) config: EngineConfig,
    pub(crate) transform: ScheimpflugTransform,
}

impl OptimizationEngine {
    /// Engine whose active calibration is `config.calibration.transform`.
    pub fn new(config: EngineConfig) -> Self {
        let transform = ScheimpflugTransform::new(&config.calibration.transform);
        Self { config, transform }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Active calibration, at stylus orientation `R = H = 0`.
    pub fn transform(&self) -> &ScheimpflugTransform {
        &self.transform
    }

    /// Active calibration at the given stylus orientation (degrees).
    pub fn transform_at(&self, r: Real, h: Real) -> ScheimpflugTransform {
        let mut st = self.transform.clone();
        st.set_stylus_orientation(r, h);
        st
    }

    /// Replace the active calibration.
    pub fn set_active_calibration(&mut self, params: &ScheimpflugParams) {
        info!("active calibration: {:?}", params.free_vector());
        self.config.calibration.transform = *params;
        self.transform.init(params);
    }

    /// Bevel angle used by the mini-bevel in `process` (degrees).
    fn bevel_angle(&self, model: ModelType, process: ProcessType) -> Real {
        match process {
            ProcessType::Validation => self.config.calibration.reference.angle1,
            _ => self.config.search_space.get(model).bevel_angle,
        }
    }

    fn build_model(&self, model: ModelType, st: &ScheimpflugTransform, bevel_angle: Real) -> Box<dyn BevelModel> {
        let ss = self.config.search_space.get(model);
        match model {
            ModelType::MiniBevel => Box::new(MiniBevelModel::new(st.clone(), bevel_angle)),
            ModelType::MiniBevelExt => Box::new(MiniBevelModel::extended(st.clone(), bevel_angle)),
            ModelType::TBevel => Box::new(TBevelModel::new(
                st.clone(),
                ss.shrink_offsets(),
                ss.offset_row_threshold,
            )),
            ModelType::CustomBevel => Box::new(CustomBevelModel::new(st.clone())),
        }
    }

    /// Prepare a fitting run: loss field, anchors, model and search box.
    ///
    /// `None` when the process type does not fit models, when no anchors
    /// are found on the profile, or when the derived box is degenerate.
    pub fn init_model(
        &self,
        st: &ScheimpflugTransform,
        profile: &Profile,
        model_type: ModelType,
        process: ProcessType,
    ) -> Option<ModelInit> {
        if let Err(e) = profile.validate() {
            warn!("cannot fit {model_type}: {e}");
            return None;
        }
        let opt = &self.config.optimization;
        let Some(process_opts) = opt.process(process) else {
            warn!("process {process:?} does not fit bevel models");
            return None;
        };
        let ss = self.config.search_space.get(model_type);
        let pso = match process {
            ProcessType::Calibration => self.config.calibration.pso.clone(),
            _ => self.config.pso.get(model_type).clone(),
        };

        let anchors = find_anchors(profile, &ss.reference_points)?;
        let mut annotated = profile.clone();
        annotated.set_anchors(&anchors.as_array());

        let loss_field = Arc::new(LossField::build(
            self.config.image.width,
            self.config.image.height,
            profile,
            &opt.loss_field_params(process_opts),
        ));

        let bevel_angle = self.bevel_angle(model_type, process);
        let estimate = InitialEstimate::from_anchors(st, profile, &anchors);
        let search_space =
            match model_search_space(model_type, st, &estimate, &anchors, ss, bevel_angle) {
                Ok(space) => space,
                Err(e) => {
                    warn!("degenerate search space for {model_type}: {e}");
                    return None;
                }
            };

        let mut model = self.build_model(model_type, st, bevel_angle);
        model.core_mut().set_debug(opt.debug);
        model.core_mut().set_fit_target(FitTarget::new(
            Arc::clone(&loss_field),
            profile,
            process_opts.check_intersections,
            opt.intersection_threshold,
            ss.weight.clone(),
        ));

        if opt.debug {
            info!("{model_type} initial estimate: {estimate:?}");
            info!("search space lb: {:?}", search_space.lb);
            info!("search space ub: {:?}", search_space.ub);
            info!("pso: {pso:?}");
        } else {
            debug!("{model_type} search space: {:?} .. {:?}", search_space.lb, search_space.ub);
        }

        Some(ModelInit {
            model,
            pso,
            search_space,
            anchors,
            loss_field,
            profile: annotated,
        })
    }

    /// Run the swarm up to `max_retries` times and finalize the first
    /// solution that passes the model's validity check.
    ///
    /// Retry `k` reseeds the swarm with `seed + k`.
    pub fn optimize_model(&self, init: &mut ModelInit, max_retries: usize) -> FitOutput {
        let ModelInit {
            model,
            pso,
            search_space,
            profile,
            ..
        } = init;
        let model_type = model.model_type();
        let last_point = profile.last_point().unwrap_or_default();

        let mut out = FitOutput::failed(
            model_type,
            model.transform(),
            pso.n_iterations,
            ReturnCode::LensFittingFailedMaxRetriesReached,
        );

        for attempt in 0..max_retries.max(1) {
            let opts = pso.with_seed(pso.seed.wrapping_add(attempt as u64));
            let result = minimize(
                &mut |x: &[Real]| {
                    model.set_free_params(x);
                    model.mse()
                },
                search_space,
                &opts,
            );

            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    warn!("{model_type}: swarm failed on attempt {}: {e}", attempt + 1);
                    out.rcode = ReturnCode::LensFittingFailedMaxRetriesReached;
                    continue;
                }
            };

            if !model.finalize(&report.optimum_x, last_point, profile) {
                warn!(
                    "{model_type}: solution crosses the detected edge ({} intersections) on attempt {}",
                    model.core().intersections(),
                    attempt + 1
                );
                out.rcode = ReturnCode::LensFittingFailedBevelFrameIntersection;
                continue;
            }

            let mut bevel = model.bevel();
            bevel.anchor_img_x = profile.anchor_img_x.clone();
            bevel.anchor_img_y = profile.anchor_img_y.clone();
            out.bevel = bevel;
            out.measures = model.measures();
            out.loss = report.loss;
            out.iteration = report.optimum_iteration.unwrap_or(pso.n_iterations);
            out.rcode = match report.status {
                PsoStatus::Success => ReturnCode::LensFittingSuccessful,
                PsoStatus::BoundaryReached => {
                    warn!("{model_type}: optimum on the search-space boundary");
                    ReturnCode::LensFittingFailedPsoBoundaryReached
                }
            };
            info!(
                "{model_type}: loss {:.4} at iteration {} ({})",
                out.loss, out.iteration, out.rcode
            );
            model.log_measures();
            break;
        }
        out
    }

    /// Fit `model_type` to `profile` with the active calibration at stylus
    /// orientation `(r, h)`.
    pub fn fit_profile(
        &self,
        profile: &Profile,
        model_type: ModelType,
        process: ProcessType,
        r: Real,
        h: Real,
        max_retries: usize,
    ) -> FitOutput {
        let st = self.transform_at(r, h);
        match self.init_model(&st, profile, model_type, process) {
            Some(mut init) => self.optimize_model(&mut init, max_retries),
            None => FitOutput::failed(
                model_type,
                &st,
                self.config.pso.get(model_type).n_iterations,
                ReturnCode::LensFittingFailedModelNotInitialized,
            ),
        }
    }
}
