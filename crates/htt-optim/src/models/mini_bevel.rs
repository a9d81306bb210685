//! Symmetric triangular bevel with rear shoulders.
//!
//! Free parameters `[x1, y1, α (rad), M]`. Vertices (object plane, mm):
//!
//! ```text
//! p0 = p1 + A·(-sin α,  cos α)        upper shoulder
//! p1 = (x1, y1)                        upper base point
//! p2 = m  + B·( cos α,  sin α)         apex, m = (p1 + p3) / 2
//! p3 = p1 + M·( sin α, -cos α)        lower base point
//! p4 = p3 + A·( sin α, -cos α)        lower shoulder
//! ```
//!
//! `B = M·tan(δ)/2` with `δ = 90° - bevel angle`.

use htt_core::{math::line_angle, Profile, Real, ScheimpflugTransform, Vec2};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{
    depth_to_line, free_params, raster::ScoreRule, BevelModel, Measures, ModelCore, ModelType,
};

/// Shoulder length in pixels, converted to mm at construction.
const SHOULDER_PX: Real = 120.0;
const N_POINTS: usize = 5;

/// Reference shape of a mini-bevel used by single-frame calibration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TestMeasures {
    /// Apex height (mm).
    pub b: Real,
    /// Base length (mm).
    pub m: Real,
    /// Angle between the upper flank and the apex axis (rad).
    pub angle1: Real,
    /// Angle between the apex axis and the lower flank (rad).
    pub angle2: Real,
}

/// Mini-bevel model; the extended flavour also frees the bevel angle.
#[derive(Debug, Clone)]
pub struct MiniBevelModel {
    core: ModelCore,
    extended: bool,
    a: Real,
    b: Real,
    b_star: Real,
    d: Real,
    m: Real,
    mid: Vec2,
    delta: Real,
    tan_delta: Real,
}

impl MiniBevelModel {
    /// Four free parameters `[x1, y1, α, M]`.
    pub fn new(st: ScheimpflugTransform, bevel_angle_deg: Real) -> Self {
        info!("mini-bevel angle: {}°", bevel_angle_deg);
        let mut model = Self {
            a: st.pixel_to_mm(SHOULDER_PX),
            core: ModelCore::new(st, N_POINTS),
            extended: false,
            b: 0.0,
            b_star: 0.0,
            d: 0.0,
            m: 0.0,
            mid: Vec2::zeros(),
            delta: 0.0,
            tan_delta: 0.0,
        };
        model.set_bevel_angle(bevel_angle_deg);
        model
    }

    /// Five free parameters `[x1, y1, α, M, bevel angle (deg)]`.
    pub fn extended(st: ScheimpflugTransform, bevel_angle_deg: Real) -> Self {
        Self {
            extended: true,
            ..Self::new(st, bevel_angle_deg)
        }
    }

    fn set_bevel_angle(&mut self, angle_deg: Real) {
        self.delta = (90.0 - angle_deg).to_radians();
        self.tan_delta = self.delta.tan() * 0.5;
    }

    /// Derive `M` and the base midpoint from back-projected vertices.
    fn update_base(&mut self) {
        let obj = self.core.obj_points();
        let (p1, p3) = (obj[1], obj[3]);
        self.m = (p1 - p3).norm();
        self.mid = (p1 + p3) * 0.5;
    }

    fn update_apex_height(&mut self) {
        let p2 = self.core.obj_points()[2];
        self.b = (self.mid - p2).norm();
    }

    /// Set the vertices from image points, back-project them, and score the
    /// resulting polyline when a fit target is present.
    pub fn set_from_img_points(&mut self, img: &[Vec2]) -> bool {
        if img.len() != N_POINTS {
            return self.core.reject();
        }
        self.core.set_img_points(img);
        self.update_from_image();
        if self.core.fit_target().is_some() {
            self.core.score(ScoreRule::Constrained)
        } else {
            true
        }
    }

    /// Re-derive object points and base measures from the stored image
    /// points, typically after the transform changed.
    pub fn update_from_image(&mut self) {
        self.core.back_project();
        self.update_base();
        self.update_apex_height();
    }

    /// Shape measures compared against a reference during calibration.
    pub fn test_measures(&self) -> TestMeasures {
        let obj = self.core.obj_points();
        let (p1, p2, p3) = (obj[1], obj[2], obj[3]);
        let axis = p2 - self.mid;
        TestMeasures {
            b: self.b,
            m: self.m,
            angle1: line_angle(&(p2 - p1), &axis),
            angle2: line_angle(&axis, &(p2 - p3)),
        }
    }

    /// `B*`: distance from the base midpoint to where the apex axis meets
    /// the detected profile.
    fn apex_on_profile(&self, mid_img: &Vec2, profile: &Profile) -> Option<Real> {
        let apex = self.core.img_points()[2];
        let dir = apex - mid_img;
        let len = dir.norm();
        if len <= Real::EPSILON {
            return None;
        }
        let (x, y) = profile.points().min_by(|a, b| {
            let da = line_residual(mid_img, &dir, *a);
            let db = line_residual(mid_img, &dir, *b);
            da.total_cmp(&db)
        })?;
        let st = self.core.transform();
        let hit = st.image_to_object(&Vec2::new(x as Real, y as Real));
        Some((hit - self.mid).norm())
    }
}

/// Unnormalized perpendicular offset of `p` from the line `origin + t·dir`.
fn line_residual(origin: &Vec2, dir: &Vec2, p: (i32, i32)) -> Real {
    let d = Vec2::new(p.0 as Real, p.1 as Real) - origin;
    (dir.x * d.y - dir.y * d.x).abs()
}

impl BevelModel for MiniBevelModel {
    fn model_type(&self) -> ModelType {
        if self.extended {
            ModelType::MiniBevelExt
        } else {
            ModelType::MiniBevel
        }
    }

    fn n_free_params(&self) -> usize {
        if self.extended {
            5
        } else {
            4
        }
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn set_free_params(&mut self, v: &[Real]) -> bool {
        let Some([x1, y1, alpha, m]) = free_params::<4>(v) else {
            return self.core.reject();
        };
        if self.extended {
            match v.get(4) {
                Some(&angle) => self.set_bevel_angle(angle),
                None => return self.core.reject(),
            }
        }

        self.m = m;
        self.b = self.tan_delta * m;
        let (s, c) = alpha.sin_cos();
        let down = Vec2::new(s, -c);
        let p1 = Vec2::new(x1, y1);
        let p3 = p1 + down * m;
        self.mid = (p1 + p3) * 0.5;

        let obj = self.core.obj_points_mut();
        obj[0] = p1 + Vec2::new(-s, c) * self.a;
        obj[1] = p1;
        obj[2] = self.mid + Vec2::new(c, s) * self.b;
        obj[3] = p3;
        obj[4] = p3 + down * self.a;

        self.core.project();
        self.core.score(ScoreRule::Constrained)
    }

    fn finalize(&mut self, v: &[Real], last_profile_point: (i32, i32), profile: &Profile) -> bool {
        let valid = self.set_free_params(v);
        if valid {
            let st = self.core.transform();
            let mid_img = st.object_to_image(&self.mid, true);
            let obj = self.core.obj_points();
            let (d, foot_img) = depth_to_line(st, &obj[3], &obj[4], &self.mid, last_profile_point);
            self.d = d;
            if let Some(b_star) = self.apex_on_profile(&mid_img, profile) {
                self.b_star = b_star;
            }
            self.core.set_distance_points(vec![mid_img, foot_img]);
        }
        if self.core.debug() {
            debug!("intersections: {}", self.core.intersections());
        }
        valid
    }

    fn measures(&self) -> Measures {
        let mut m = Measures::new();
        m.insert("A".into(), self.a);
        m.insert("B".into(), self.b);
        m.insert("C".into(), self.a);
        m.insert("D".into(), self.d);
        m.insert("M".into(), self.m);
        m.insert("B*".into(), self.b_star);
        if self.extended {
            m.insert("beta".into(), (90.0 - self.delta.to_degrees()) * 2.0);
        }
        m
    }
}
