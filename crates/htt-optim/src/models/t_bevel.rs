//! Rectangular (T) bevel.
//!
//! Free parameters `[x1, y1, α (rad), M, B]`. Vertices:
//!
//! ```text
//! p0 = p1 + A·(-sin α,  cos α)
//! p2 = p1 + B·( cos α,  sin α)
//! p3 = p2 + M·( sin α, -cos α)
//! p4 = p1 + M·( sin α, -cos α)
//! p5 = p4 + A·( sin α, -cos α)
//! ```
//!
//! The polyline runs `p0 … p5`, so segment `p3 → p4` returns along the
//! underside of the T. It is rasterized but never scored.

use htt_core::{Profile, Real, ScheimpflugTransform, Vec2};
use log::debug;

use super::{depth_to_line, free_params, raster::ScoreRule, BevelModel, Measures, ModelCore, ModelType};

const SHOULDER_PX: Real = 80.0;
const N_POINTS: usize = 6;

/// Shrink applied when an accepted solution is finalized (mm).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShrinkOffsets {
    /// Moves `p1` down the base and shortens `M` by twice this amount.
    pub m: Real,
    /// Shortens `B`.
    pub b: Real,
}

#[derive(Debug, Clone)]
pub struct TBevelModel {
    core: ModelCore,
    a: Real,
    b: Real,
    d: Real,
    m: Real,
    mid: Vec2,
    shrink: ShrinkOffsets,
    row_threshold: i32,
}

impl TBevelModel {
    /// `row_threshold`: image row below which the T face is scored against
    /// rows shifted by the height of the T.
    pub fn new(st: ScheimpflugTransform, shrink: ShrinkOffsets, row_threshold: i32) -> Self {
        Self {
            a: st.pixel_to_mm(SHOULDER_PX),
            core: ModelCore::new(st, N_POINTS),
            b: 0.0,
            d: 0.0,
            m: 0.0,
            mid: Vec2::zeros(),
            shrink,
            row_threshold,
        }
    }

    fn build(&mut self, v: &[Real], shrink: Option<ShrinkOffsets>) -> bool {
        let Some([x1, y1, alpha, m, b]) = free_params::<5>(v) else {
            return self.core.reject();
        };
        let (s, c) = alpha.sin_cos();
        let down = Vec2::new(s, -c);
        let mut p1 = Vec2::new(x1, y1);
        self.m = m;
        self.b = b;
        if let Some(off) = shrink {
            p1 += down * off.m;
            self.m -= 2.0 * off.m;
            self.b -= off.b;
        }

        let obj = self.core.obj_points_mut();
        obj[1] = p1;
        obj[0] = p1 + Vec2::new(-s, c) * self.a;
        obj[2] = p1 + Vec2::new(c, s) * self.b;
        obj[3] = obj[2] + down * self.m;
        obj[4] = p1 + down * self.m;
        obj[5] = obj[4] + down * self.a;
        self.mid = (obj[1] + obj[4]) * 0.5;

        self.core.project();
        self.core.score(ScoreRule::TBevel {
            row_threshold: self.row_threshold,
        })
    }
}

impl BevelModel for TBevelModel {
    fn model_type(&self) -> ModelType {
        ModelType::TBevel
    }

    fn n_free_params(&self) -> usize {
        5
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn set_free_params(&mut self, v: &[Real]) -> bool {
        self.build(v, None)
    }

    fn finalize(&mut self, v: &[Real], last_profile_point: (i32, i32), _profile: &Profile) -> bool {
        let valid = self.build(v, Some(self.shrink));
        if valid {
            let st = self.core.transform();
            let mid_img = st.object_to_image(&self.mid, true);
            let obj = self.core.obj_points();
            let (d, foot_img) = depth_to_line(st, &obj[4], &obj[5], &self.mid, last_profile_point);
            self.d = d;
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
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertices_form_a_t() {
        let mut model = TBevelModel::new(ScheimpflugTransform::default(), ShrinkOffsets::default(), 200);
        model.set_free_params(&[0.0, 1.0, 0.0, 2.0, 0.5]);
        let obj = model.core().obj_points();
        assert!((obj[2] - Vec2::new(0.5, 1.0)).norm() < 1e-12);
        assert!((obj[3] - Vec2::new(0.5, -1.0)).norm() < 1e-12);
        assert!((obj[4] - Vec2::new(0.0, -1.0)).norm() < 1e-12);
        assert!(obj[5].y < -1.0 && obj[0].y > 1.0);
        assert_eq!(model.n_free_params(), 5);
    }

    #[test]
    fn finalize_applies_shrink_offsets() {
        let shrink = ShrinkOffsets { m: 0.1, b: 0.05 };
        let mut model = TBevelModel::new(ScheimpflugTransform::default(), shrink, 200);
        let profile = Profile::from_points([(600, 500)]).unwrap();
        // No fit target: rejected, but the shrunk geometry is still built.
        assert!(!model.finalize(&[0.0, 1.0, 0.0, 2.0, 0.5], (600, 500), &profile));
        let m = model.measures();
        assert!((m["M"] - 1.8).abs() < 1e-12);
        assert!((m["B"] - 0.45).abs() < 1e-12);
        assert!((model.core().obj_points()[1] - Vec2::new(0.0, 0.9)).norm() < 1e-12);
    }
}
