//! Parametric bevel models.
//!
//! A model turns a handful of free parameters into a small polygon of
//! object-plane vertices, projects it through its own
//! [`ScheimpflugTransform`], rasterizes the image polyline and scores it
//! against a [`LossField`]. Variants differ only in their vertex geometry,
//! their scoring rule and the measures they report; the shared state lives
//! in [`ModelCore`].

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use htt_core::{LossField, Profile, Real, ScheimpflugTransform, Vec2};
use log::info;
use serde::{Deserialize, Serialize};

mod custom_bevel;
mod mini_bevel;
mod raster;
mod t_bevel;

pub use custom_bevel::CustomBevelModel;
pub use mini_bevel::{MiniBevelModel, TestMeasures};
pub use raster::for_each_segment_pixel;
pub use t_bevel::{ShrinkOffsets, TBevelModel};

/// Named scalar outputs of a fitted model (mm, degrees for `beta`).
pub type Measures = BTreeMap<String, Real>;

/// Sentinel loss of a candidate whose polyline never touched the raster.
pub const EMPTY_BEVEL_LOSS: Real = 1e10;

/// Bevel shape families, with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelType {
    #[default]
    MiniBevel = 1,
    TBevel = 2,
    CustomBevel = 4,
    MiniBevelExt = 8,
}

impl ModelType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::MiniBevel => "MINI_BEVEL",
            ModelType::TBevel => "T_BEVEL",
            ModelType::CustomBevel => "CUSTOM_BEVEL",
            ModelType::MiniBevelExt => "MINI_BEVEL_EXT",
        }
    }

    /// Lenient parse, case-insensitive and accepting `-` for `_`: unknown names select [`ModelType::MiniBevel`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "T_BEVEL" => ModelType::TBevel,
            "CUSTOM_BEVEL" => ModelType::CustomBevel,
            "MINI_BEVEL_EXT" => ModelType::MiniBevelExt,
            _ => ModelType::MiniBevel,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

/// Everything a model scores against, set once per optimization run.
#[derive(Debug, Clone)]
pub struct FitTarget {
    loss_field: Arc<LossField>,
    left_boundary: Vec<i32>,
    profile_len: usize,
    check_intersections: bool,
    intersection_threshold: usize,
    weights: Vec<Real>,
}

impl FitTarget {
    /// `weights` holds one factor per polyline segment; missing entries are `1.0`.
    pub fn new(
        loss_field: Arc<LossField>,
        profile: &Profile,
        check_intersections: bool,
        intersection_threshold: usize,
        weights: Vec<Real>,
    ) -> Self {
        let mut left_boundary = vec![0; loss_field.height()];
        for (x, y) in profile.points() {
            if y >= 0 && (y as usize) < left_boundary.len() {
                left_boundary[y as usize] = x;
            }
        }
        Self {
            loss_field,
            left_boundary,
            profile_len: profile.len(),
            check_intersections,
            intersection_threshold,
            weights,
        }
    }

    pub fn loss_field(&self) -> &LossField {
        &self.loss_field
    }

    pub fn weight(&self, segment: usize) -> Real {
        self.weights.get(segment).copied().unwrap_or(1.0)
    }

    /// Whether a bevel pixel at `(x, y)` lies on or left of the detected edge.
    #[inline]
    pub fn intersects(&self, x: i32, y: i32) -> bool {
        self.left_boundary
            .get(y as usize)
            .is_some_and(|&edge| edge >= x)
    }
}

/// State shared by every model variant.
#[derive(Debug, Clone)]
pub struct ModelCore {
    st: ScheimpflugTransform,
    obj: Vec<Vec2>,
    img: Vec<Vec2>,
    distance_img: Vec<Vec2>,
    target: Option<FitTarget>,
    bevel: Vec<(i32, i32)>,
    mse: Real,
    intersections: usize,
    degenerate: bool,
    debug: bool,
}

impl ModelCore {
    pub fn new(st: ScheimpflugTransform, n_points: usize) -> Self {
        Self {
            st,
            obj: vec![Vec2::zeros(); n_points],
            img: vec![Vec2::zeros(); n_points],
            distance_img: Vec::new(),
            target: None,
            bevel: Vec::with_capacity(1200),
            mse: EMPTY_BEVEL_LOSS,
            intersections: 0,
            degenerate: false,
            debug: false,
        }
    }

    pub fn transform(&self) -> &ScheimpflugTransform {
        &self.st
    }

    pub fn transform_mut(&mut self) -> &mut ScheimpflugTransform {
        &mut self.st
    }

    pub fn set_fit_target(&mut self, target: FitTarget) {
        self.target = Some(target);
    }

    pub fn fit_target(&self) -> Option<&FitTarget> {
        self.target.as_ref()
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn obj_points(&self) -> &[Vec2] {
        &self.obj
    }

    pub(crate) fn obj_points_mut(&mut self) -> &mut [Vec2] {
        &mut self.obj
    }

    pub fn img_points(&self) -> &[Vec2] {
        &self.img
    }

    pub fn distance_points(&self) -> &[Vec2] {
        &self.distance_img
    }

    pub(crate) fn set_distance_points(&mut self, points: Vec<Vec2>) {
        self.distance_img = points;
    }

    /// Replace the image vertices (e.g. points clicked on a calibration frame).
    pub fn set_img_points(&mut self, img: &[Vec2]) {
        self.img.clear();
        self.img.extend_from_slice(img);
    }

    /// Project the object vertices into the image, snapped to whole pixels.
    pub fn project(&mut self) {
        let Self { st, obj, img, .. } = self;
        st.object_to_image_batch(obj, img, true);
    }

    /// Back-project the image vertices into the object plane.
    pub fn back_project(&mut self) {
        self.obj = self.st.image_to_object_batch(&self.img);
    }

    /// Loss of the last scoring pass.
    ///
    /// `+∞` for degenerate geometry, [`EMPTY_BEVEL_LOSS`] when nothing was
    /// rasterized.
    pub fn mse(&self) -> Real {
        if self.degenerate {
            Real::INFINITY
        } else if self.bevel_len() == 0 {
            EMPTY_BEVEL_LOSS
        } else {
            self.mse
        }
    }

    pub fn intersections(&self) -> usize {
        self.intersections
    }

    fn bevel_len(&self) -> usize {
        self.bevel.len()
    }

    /// Mark the current candidate invalid without rasterizing it.
    pub(crate) fn reject(&mut self) -> bool {
        self.degenerate = true;
        self.bevel.clear();
        self.intersections = 0;
        self.mse = Real::INFINITY;
        false
    }

    /// Rasterized bevel of the last [`Self::score_final`] pass plus the
    /// model and distance vertices.
    pub fn bevel_profile(&self) -> Profile {
        let (x, y) = self.bevel.iter().copied().unzip();
        Profile {
            x,
            y,
            img_x: self.img.iter().map(|p| p.x as i32).collect(),
            img_y: self.img.iter().map(|p| p.y as i32).collect(),
            distance_img_x: self.distance_img.iter().map(|p| p.x as i32).collect(),
            distance_img_y: self.distance_img.iter().map(|p| p.y as i32).collect(),
            ..Profile::default()
        }
    }

    fn log_points(&self) {
        info!("image points (px): {:?}", self.img);
        info!("object points (mm): {:?}", self.obj);
    }
}

/// Common interface of every bevel variant.
pub trait BevelModel: fmt::Debug + Send {
    fn model_type(&self) -> ModelType;

    /// Length of the free-parameter vector.
    fn n_free_params(&self) -> usize;

    fn core(&self) -> &ModelCore;

    fn core_mut(&mut self) -> &mut ModelCore;

    /// Rebuild the polygon from `v` and score it.
    ///
    /// Returns `false` when the candidate is invalid: degenerate geometry,
    /// or more bevel/profile intersections than the configured threshold.
    fn set_free_params(&mut self, v: &[Real]) -> bool;

    /// One-shot evaluation of the accepted solution: derived measures and
    /// distance points.
    fn finalize(&mut self, v: &[Real], last_profile_point: (i32, i32), profile: &Profile) -> bool;

    fn measures(&self) -> Measures;

    /// Loss of the last [`Self::set_free_params`] call.
    fn mse(&self) -> Real {
        self.core().mse()
    }

    /// Rasterize the current polygon without the search-time shortcuts and
    /// return it with its vertices.
    fn bevel(&mut self) -> Profile {
        let core = self.core_mut();
        core.score_final();
        core.bevel_profile()
    }

    fn transform(&self) -> &ScheimpflugTransform {
        self.core().transform()
    }

    fn log_measures(&self) {
        let measures = self.measures();
        let text: Vec<String> = measures
            .iter()
            .map(|(k, v)| format!("{k}: {v:.4}"))
            .collect();
        info!("{} measures: {}", self.model_type(), text.join("  "));
        if self.core().debug() {
            self.core().log_points();
        }
    }
}

/// First `N` entries of `v`, if present.
pub(crate) fn free_params<const N: usize>(v: &[Real]) -> Option<[Real; N]> {
    v.get(..N)?.try_into().ok()
}

/// Foot of the perpendicular from `p` onto the line through `a` and `b`.
pub(crate) fn perpendicular_foot(a: &Vec2, b: &Vec2, p: &Vec2) -> Vec2 {
    let d = b - a;
    let len2 = d.norm_squared();
    if len2 <= Real::EPSILON {
        return *a;
    }
    a + d * ((p - a).dot(&d) / len2)
}

/// Depth measure shared by the flat-bottom variants.
///
/// Back-projects the last profile point, drops it perpendicularly onto the
/// line `a`-`b` and returns `|foot - mid|` together with the image position
/// of the foot.
pub(crate) fn depth_to_line(
    st: &ScheimpflugTransform,
    a: &Vec2,
    b: &Vec2,
    mid: &Vec2,
    last_profile_point: (i32, i32),
) -> (Real, Vec2) {
    let last = st.image_to_object(&Vec2::new(
        last_profile_point.0 as Real,
        last_profile_point.1 as Real,
    ));
    let foot = perpendicular_foot(a, b, &last);
    ((foot - mid).norm(), st.object_to_image(&foot, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_type_names_round_trip_and_default() {
        for t in [
            ModelType::MiniBevel,
            ModelType::TBevel,
            ModelType::CustomBevel,
            ModelType::MiniBevelExt,
        ] {
            assert_eq!(ModelType::from_name(t.as_str()), t);
        }
        assert_eq!(ModelType::from_name("whatever"), ModelType::MiniBevel);
        assert_eq!(ModelType::from_name("mini-bevel-ext"), ModelType::MiniBevelExt);
        assert_eq!("t_bevel".parse::<ModelType>().unwrap(), ModelType::TBevel);
        assert_eq!(ModelType::MiniBevelExt.code(), 8);
        assert_eq!(
            serde_json::to_string(&ModelType::CustomBevel).unwrap(),
            "\"CUSTOM_BEVEL\""
        );
    }

    #[test]
    fn perpendicular_foot_handles_vertical_lines() {
        let a = Vec2::new(2.0, 0.0);
        let b = Vec2::new(2.0, 5.0);
        let foot = perpendicular_foot(&a, &b, &Vec2::new(7.0, 3.0));
        assert_eq!(foot, Vec2::new(2.0, 3.0));
    }

    #[test]
    fn free_params_needs_enough_entries() {
        assert_eq!(free_params::<2>(&[1.0, 2.0, 3.0]), Some([1.0, 2.0]));
        assert_eq!(free_params::<4>(&[1.0, 2.0, 3.0]), None);
    }
}
