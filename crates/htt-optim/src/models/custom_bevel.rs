//! Asymmetric bevel with a flat front face.
//!
//! Free parameters `[x1, y1, x5, y5, α (rad), M, S, E]`: the two base
//! anchors, the base tilt, the base length, the upper step `S` and the
//! front face `E`. The remaining vertices follow from a fixed 60° rear
//! flank:
//!
//! ```text
//! p2  = p1 + S·(cos α, sin α)
//! β   = acos(M / |p2 - p5|),   ΔH = |p2 - p5|·sin β
//! D   = (M - E - ΔH) / (1 + tan 60°),   B = D + ΔH
//! m   = p2 + B·(sin α, -cos α)
//! p3  = m + B·(cos α, sin α),   p4 = p3 + E·(sin α, -cos α)
//! ```
//!
//! `M > |p2 - p5|` has no solution and yields an invalid candidate.

use htt_core::{Profile, Real, ScheimpflugTransform, Vec2};
use log::debug;

use super::{free_params, raster::ScoreRule, BevelModel, Measures, ModelCore, ModelType};

const SHOULDER_PX: Real = 80.0;
const N_POINTS: usize = 7;

#[derive(Debug, Clone)]
pub struct CustomBevelModel {
    core: ModelCore,
    a: Real,
    b: Real,
    d: Real,
    e: Real,
    f: Real,
    g: Real,
    s: Real,
    mid: Vec2,
    tan_delta2: Real,
}

impl CustomBevelModel {
    pub fn new(st: ScheimpflugTransform) -> Self {
        Self {
            a: st.pixel_to_mm(SHOULDER_PX),
            core: ModelCore::new(st, N_POINTS),
            b: 0.0,
            d: 0.0,
            e: 0.0,
            f: 0.0,
            g: 0.0,
            s: 0.0,
            mid: Vec2::zeros(),
            tan_delta2: 60.0_f64.to_radians().tan(),
        }
    }
}

impl BevelModel for CustomBevelModel {
    fn model_type(&self) -> ModelType {
        ModelType::CustomBevel
    }

    fn n_free_params(&self) -> usize {
        8
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn set_free_params(&mut self, v: &[Real]) -> bool {
        let Some([x1, y1, x5, y5, alpha, m, s, e]) = free_params::<8>(v) else {
            return self.core.reject();
        };
        self.s = s;
        self.e = e;

        let (sin_a, cos_a) = alpha.sin_cos();
        let down = Vec2::new(sin_a, -cos_a);
        let out = Vec2::new(cos_a, sin_a);
        let p1 = Vec2::new(x1, y1);
        let p5 = Vec2::new(x5, y5);
        let p2 = p1 + out * s;

        let d25 = (p2 - p5).norm();
        let beta = (m / d25).acos();
        let delta_h = d25 * beta.sin();
        self.d = (m - e - delta_h) / (1.0 + self.tan_delta2);
        self.b = self.d + delta_h;
        self.mid = p2 + down * self.b;
        let p3 = self.mid + out * self.b;

        let obj = self.core.obj_points_mut();
        obj[0] = p1 + Vec2::new(-sin_a, cos_a) * self.a;
        obj[1] = p1;
        obj[2] = p2;
        obj[3] = p3;
        obj[4] = p3 + down * e;
        obj[5] = p5;
        obj[6] = p5 + down * self.a;

        self.core.project();
        self.core.score(ScoreRule::Constrained)
    }

    fn finalize(&mut self, v: &[Real], _last_profile_point: (i32, i32), _profile: &Profile) -> bool {
        let valid = self.set_free_params(v);
        if valid {
            let mid_img = self.core.transform().object_to_image(&self.mid, true);
            self.core.set_distance_points(vec![mid_img]);
            self.g = self.e + self.b;
            self.f = self.b + self.s;
        }
        if self.core.debug() {
            debug!("intersections: {}", self.core.intersections());
        }
        valid
    }

    fn measures(&self) -> Measures {
        let mut m = Measures::new();
        m.insert("A".into(), self.a);
        m.insert("C".into(), self.a);
        m.insert("D".into(), self.d);
        m.insert("E".into(), self.e);
        m.insert("F".into(), self.f);
        m.insert("G".into(), self.g);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_face_geometry() {
        let mut model = CustomBevelModel::new(ScheimpflugTransform::default());
        // Vertical base, p5 straight below p1 shifted out by S: β = 0, ΔH = 0.
        model.set_free_params(&[0.0, 1.0, 0.3, -1.0, 0.0, 2.0, 0.3, 0.5]);
        let t = 60.0_f64.to_radians().tan();
        let d = (2.0 - 0.5) / (1.0 + t);
        let m = model.measures();
        assert!((m["D"] - d).abs() < 1e-9, "D = {}", m["D"]);
        let obj = model.core().obj_points();
        assert!((obj[2] - Vec2::new(0.3, 1.0)).norm() < 1e-12);
        assert!((obj[3] - Vec2::new(0.3 + d, 1.0 - d)).norm() < 1e-9);
        assert!((obj[4] - Vec2::new(0.3 + d, 0.5 - d)).norm() < 1e-9);
    }

    #[test]
    fn impossible_base_is_invalid() {
        let mut model = CustomBevelModel::new(ScheimpflugTransform::default());
        assert!(!model.set_free_params(&[0.0, 1.0, 0.0, -1.0, 0.0, 5.0, 0.3, 0.5]));
        assert_eq!(model.mse(), Real::INFINITY);
    }
}
