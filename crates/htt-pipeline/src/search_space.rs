//! Anchor detection on a detected profile and the model search boxes built
//! around the anchors.
//!
//! The upper anchor is where the trace first turns sharply left (the top of
//! the bevel's upper flank), the lower anchor where it last turns right (the
//! bottom of the lower flank). Slopes are `Δx/Δy` measured over `offset`
//! rows; pairs closer than one row apart are skipped.

use htt_core::{Profile, Real, ScheimpflugTransform, Vec2};
use htt_optim::{ModelType, PsoError, SearchSpace};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ReferencePointsConfig, SearchSpaceConfig};

/// Detection passes per anchor before giving up.
const MAX_WATCHDOG: usize = 6;

/// Reference points found on a profile (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchors {
    pub upper: (i32, i32),
    pub lower: (i32, i32),
    /// Leftmost profile point between the two anchors.
    pub minimum: (i32, i32),
}

impl Anchors {
    pub fn as_array(&self) -> [(i32, i32); 3] {
        [self.upper, self.lower, self.minimum]
    }
}

/// Local slope `Δx/Δy` between profile points `i` and `j`.
fn local_slope(profile: &Profile, i: usize, j: usize) -> Option<Real> {
    let (xi, yi) = profile.point(i)?;
    let (xj, yj) = profile.point(j)?;
    let dy = (yj - yi) as Real;
    if dy.abs() < 1.0 {
        return None;
    }
    Some((xj - xi) as Real / dy)
}

/// Index of the upper anchor, or `None` once the watchdog runs out.
fn upper_anchor(profile: &Profile, cfg: &ReferencePointsConfig) -> Option<usize> {
    let n = profile.len();
    let off = cfg.offset;
    let half = (n + 1) >> 1;
    let step = cfg.up_threshold / 10.0;
    let mut threshold = cfg.up_threshold;

    for pass in 0..MAX_WATCHDOG {
        let found = (0..half.saturating_sub(off))
            .find(|&i| local_slope(profile, i, i + off).is_some_and(|dx| dx <= -threshold));
        let Some(i) = found else {
            threshold -= step;
            debug!("upper anchor: relaxing threshold to {threshold:.3} (pass {})", pass + 1);
            continue;
        };
        let index = i + off / 2;
        debug!("upper anchor candidate @ {index} (threshold {threshold:.3})");

        // Walk back up while the flank above is still steep.
        let refined = (off..=index)
            .rev()
            .find(|&i| local_slope(profile, i, i - off).is_some_and(|dx| dx >= -cfg.up_threshold_ref))
            .map(|i| i - off / 2);
        return Some(refined.unwrap_or(index));
    }
    warn!("watchdog activated: upper anchor not found");
    None
}

/// Index of the lower anchor, or `None` once the watchdog runs out.
fn lower_anchor(profile: &Profile, cfg: &ReferencePointsConfig) -> Option<usize> {
    let n = profile.len();
    let off = cfg.offset;
    let half = (n + 1) >> 1;
    let first = half.saturating_sub(off).max(off);
    let step = cfg.lo_threshold / 10.0;
    let mut threshold = cfg.lo_threshold;

    for pass in 0..MAX_WATCHDOG {
        let found = (first..n)
            .rev()
            .find(|&i| local_slope(profile, i - off, i).is_some_and(|dx| dx >= threshold));
        let Some(i) = found else {
            threshold -= step;
            debug!("lower anchor: relaxing threshold to {threshold:.3} (pass {})", pass + 1);
            continue;
        };
        let index = i - off / 2;
        debug!("lower anchor candidate @ {index} (threshold {threshold:.3})");

        let refined = (index..n.saturating_sub(off))
            .find(|&i| local_slope(profile, i, i + off).is_some_and(|dx| dx >= cfg.lo_threshold_ref))
            .map(|i| i + off / 2);
        return Some(refined.unwrap_or(index));
    }
    warn!("watchdog activated: lower anchor not found");
    None
}

/// Find the upper, lower and minimum anchors of `profile`.
///
/// `None` when either anchor cannot be found, which is the expected outcome
/// for a flat or badly cropped trace.
pub fn find_anchors(profile: &Profile, cfg: &ReferencePointsConfig) -> Option<Anchors> {
    let n = profile.len();
    if cfg.offset == 0 || n <= cfg.offset {
        warn!("profile of {} points is too short for slope offset {}", n, cfg.offset);
        return None;
    }

    let Some(up) = upper_anchor(profile, cfg) else {
        warn!("candidate upper anchor not found");
        return None;
    };
    let Some(lo) = lower_anchor(profile, cfg) else {
        warn!("candidate lower anchor not found");
        return None;
    };

    let upper = profile.point(up)?;
    let lower = profile.point(lo)?;
    let mut minimum = upper;
    for i in up..lo {
        if let Some(p) = profile.point(i) {
            if p.0 < minimum.0 {
                minimum = p;
            }
        }
    }
    debug!("anchors: upper {upper:?} @ {up}, lower {lower:?} @ {lo}, minimum {minimum:?}");
    Some(Anchors {
        upper,
        lower,
        minimum,
    })
}

fn to_vec2(p: (i32, i32)) -> Vec2 {
    Vec2::new(p.0 as Real, p.1 as Real)
}

/// Closed-form starting point derived from the anchors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialEstimate {
    /// Base length between the back-projected anchors (mm).
    pub m: Real,
    /// Base tilt in the object plane (rad).
    pub alpha: Real,
    /// Largest excursion of the profile left of the anchor line (mm).
    pub b: Real,
}

impl InitialEstimate {
    pub fn from_anchors(st: &ScheimpflugTransform, profile: &Profile, anchors: &Anchors) -> Self {
        let up = st.image_to_object(&to_vec2(anchors.upper));
        let lo = st.image_to_object(&to_vec2(anchors.lower));
        let m = (up - lo).norm();
        let alpha = (lo.x - up.x).atan2(up.y - lo.y);

        // Excursion is measured in the image, along rows between the anchors.
        let (ux, uy) = anchors.upper;
        let (lx, ly) = anchors.lower;
        let tan_img = ((lx - ux) as Real).atan2((ly - uy) as Real).tan();
        let b_px = profile
            .points()
            .filter(|&(_, y)| y >= uy && y <= ly)
            .map(|(x, y)| ux as Real + tan_img * (y - uy) as Real - x as Real)
            .fold(0.0, Real::max);

        Self {
            m,
            alpha,
            b: st.pixel_to_mm(b_px),
        }
    }
}

/// Object-plane box around an image point: back-projected window corners.
fn window_bounds(st: &ScheimpflugTransform, center: (i32, i32), wx: i32, wy: i32) -> [(Real, Real); 2] {
    let c = to_vec2(center);
    let mut lo = Vec2::repeat(Real::INFINITY);
    let mut hi = Vec2::repeat(Real::NEG_INFINITY);
    for (sx, sy) in [(-1, -1), (-1, 1), (1, -1), (1, 1)] {
        let corner = c + Vec2::new((sx * wx) as Real, (sy * wy) as Real);
        let p = st.image_to_object(&corner);
        lo = lo.inf(&p);
        hi = hi.sup(&p);
    }
    [(lo.x, hi.x), (lo.y, hi.y)]
}

/// `[lo, hi]` of `value · [a, b]`, ordered.
fn scaled(value: Real, a: Real, b: Real) -> (Real, Real) {
    let (p, q) = (value * a, value * b);
    (p.min(q), p.max(q))
}

/// Search box of `model` around the detected anchors.
///
/// `bevel_angle` is the centre of the free angle of the extended
/// mini-bevel (degrees).
pub fn model_search_space(
    model: ModelType,
    st: &ScheimpflugTransform,
    estimate: &InitialEstimate,
    anchors: &Anchors,
    cfg: &SearchSpaceConfig,
    bevel_angle: Real,
) -> Result<SearchSpace, PsoError> {
    let [x1, y1] = window_bounds(st, anchors.upper, cfg.win_size_x, cfg.win_size_y);
    let alpha = (estimate.alpha + cfg.min_alpha, estimate.alpha + cfg.max_alpha);
    let m = scaled(estimate.m, cfg.min_m_multiplier, cfg.max_m_multiplier);

    let bounds: Vec<(Real, Real)> = match model {
        ModelType::MiniBevel => vec![x1, y1, alpha, m],
        ModelType::MiniBevelExt => vec![
            x1,
            y1,
            alpha,
            m,
            (bevel_angle - cfg.delta_beta, bevel_angle + cfg.delta_beta),
        ],
        ModelType::TBevel => {
            let b = estimate.b.max(st.pixel_to_mm(1.0));
            vec![x1, y1, alpha, m, scaled(b, cfg.min_b_multiplier, cfg.max_b_multiplier)]
        }
        ModelType::CustomBevel => {
            let [x5, y5] = window_bounds(st, anchors.lower, cfg.win_size_x, cfg.win_size_y);
            let s = (st.pixel_to_mm(cfg.min_s), st.pixel_to_mm(cfg.max_s));
            let e = (st.pixel_to_mm(cfg.min_e), st.pixel_to_mm(cfg.max_e));
            vec![x1, y1, x5, y5, alpha, m, s, e]
        }
    };

    let (lb, ub) = bounds.into_iter().unzip();
    SearchSpace::new(lb, ub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use htt_core::synthetic::polyline_profile;

    /// `>` shaped trace: upper flank running left, lower flank back right.
    fn chevron() -> Profile {
        let v = [
            Vec2::new(500.0, 100.0),
            Vec2::new(480.0, 200.0),
            Vec2::new(330.0, 300.0),
            Vec2::new(400.0, 500.0),
            Vec2::new(370.0, 600.0),
        ];
        polyline_profile(&v, 0).unwrap()
    }

    #[test]
    fn anchors_sit_on_the_flank_corners() {
        let profile = chevron();
        let anchors = find_anchors(&profile, &ReferencePointsConfig::default()).unwrap();
        assert!(
            (anchors.upper.1 - 200).abs() <= 10,
            "upper anchor {:?}",
            anchors.upper
        );
        assert!(
            (anchors.lower.1 - 500).abs() <= 10,
            "lower anchor {:?}",
            anchors.lower
        );
        assert_eq!(anchors.minimum, (330, 300));
    }

    #[test]
    fn straight_trace_has_no_anchors() {
        let profile = Profile::from_points((0..400).map(|y| (600, y))).unwrap();
        assert!(find_anchors(&profile, &ReferencePointsConfig::default()).is_none());
    }

    #[test]
    fn short_trace_has_no_anchors() {
        let profile = Profile::from_points((0..5).map(|y| (600 - 3 * y, y))).unwrap();
        assert!(find_anchors(&profile, &ReferencePointsConfig::default()).is_none());
    }

    #[test]
    fn watchdog_relaxes_the_threshold() {
        // Upper flank slope of -0.6 only passes after two relaxation steps.
        let v = [
            Vec2::new(500.0, 0.0),
            Vec2::new(500.0, 100.0),
            Vec2::new(440.0, 200.0),
            Vec2::new(500.0, 300.0),
            Vec2::new(500.0, 400.0),
        ];
        let profile = polyline_profile(&v, 0).unwrap();
        let anchors = find_anchors(&profile, &ReferencePointsConfig::default());
        assert!(anchors.is_some());

        let strict = ReferencePointsConfig {
            up_threshold: 2.0,
            ..ReferencePointsConfig::default()
        };
        assert!(find_anchors(&profile, &strict).is_none());
    }

    #[test]
    fn search_box_dimensions_per_model() {
        let st = ScheimpflugTransform::default();
        let profile = chevron();
        let anchors = find_anchors(&profile, &ReferencePointsConfig::default()).unwrap();
        let est = InitialEstimate::from_anchors(&st, &profile, &anchors);
        assert!(est.m > 0.0 && est.b > 0.0, "{est:?}");
        let cfg = SearchSpaceConfig::default();
        for (model, dim) in [
            (ModelType::MiniBevel, 4),
            (ModelType::MiniBevelExt, 5),
            (ModelType::TBevel, 5),
            (ModelType::CustomBevel, 8),
        ] {
            let space = model_search_space(model, &st, &est, &anchors, &cfg, 55.0).unwrap();
            assert_eq!(space.dim(), dim, "{model}");
        }
        let ext = model_search_space(ModelType::MiniBevelExt, &st, &est, &anchors, &cfg, 55.0).unwrap();
        assert_eq!((ext.lb[4], ext.ub[4]), (45.0, 65.0));
    }
}
