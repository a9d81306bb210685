//! Polyline rasterization and scoring against the loss field.

use htt_core::{Real, Vec2};
use log::trace;

use super::{FitTarget, ModelCore, EMPTY_BEVEL_LOSS};

/// Penalty per profile row the bevel fails to cover (T-bevel and final scoring).
const SHORTFALL_PENALTY: Real = 1e3;

/// Scoring flavour of a rasterization pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ScoreRule {
    /// Weighted mean loss plus coverage and intersection penalties.
    Constrained,
    /// Like [`ScoreRule::Final`] but weighted. The returning face (segment
    /// 3) adds pixels only, and below `row_threshold` the T face (segment
    /// 2) samples loss and edge on rows shifted up by the height of the T.
    TBevel { row_threshold: i32 },
    /// Unweighted per-segment loss of an accepted solution.
    Final,
}

/// Visit the pixels of the segment `a → b` on a `width × height` raster.
///
/// Steps one pixel at a time along the major axis, starting at `a` and
/// excluding `b`. Pixels outside the raster are skipped without being
/// walked, so far-away vertices cost nothing. Non-finite input visits
/// nothing.
pub fn for_each_segment_pixel(
    a: &Vec2,
    b: &Vec2,
    width: usize,
    height: usize,
    mut visit: impl FnMut(i32, i32),
) {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    if !(a.x.is_finite() && a.y.is_finite() && dx.is_finite() && dy.is_finite()) {
        return;
    }
    let (w, h) = (width as i64, height as i64);

    if dx.abs() >= dy.abs() {
        let steps = dx.abs() as i64;
        if steps == 0 {
            return;
        }
        let dir = if dx >= 0.0 { 1 } else { -1 };
        let x0 = a.x.floor() as i64;
        let rate = dy / dx.abs();
        let (lo, hi) = axis_window(x0, dir, steps, w);
        for k in lo..hi {
            let y = (a.y + rate * k as Real).floor() as i64;
            if (0..h).contains(&y) {
                visit((x0 + dir * k) as i32, y as i32);
            }
        }
    } else {
        let steps = dy.abs() as i64;
        let dir = if dy >= 0.0 { 1 } else { -1 };
        let y0 = a.y.floor() as i64;
        let rate = dx / dy.abs();
        let (lo, hi) = axis_window(y0, dir, steps, h);
        for k in lo..hi {
            let x = (a.x + rate * k as Real).floor() as i64;
            if (0..w).contains(&x) {
                visit(x as i32, (y0 + dir * k) as i32);
            }
        }
    }
}

/// Step indices `k ∈ [lo, hi)` for which `start + dir·k` stays in `[0, len)`.
fn axis_window(start: i64, dir: i64, steps: i64, len: i64) -> (i64, i64) {
    if dir > 0 {
        ((-start).max(0), steps.min(len - start))
    } else {
        ((start - (len - 1)).max(0), steps.min(start + 1))
    }
}

impl ModelCore {
    /// Rasterize the image polyline into the bevel buffer and score it.
    ///
    /// Returns `false` for degenerate geometry, a missing fit target, or
    /// more intersections than the target tolerates.
    pub(crate) fn score(&mut self, rule: ScoreRule) -> bool {
        self.bevel.clear();
        self.intersections = 0;
        self.degenerate = false;

        if self.target.is_none() || self.img.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return self.reject();
        }
        let Self {
            img,
            target,
            bevel,
            ..
        } = self;
        let Some(target) = target.as_ref() else {
            return false;
        };

        let field = target.loss_field();
        let (w, h) = (field.width(), field.height());
        let row_offset = match (img.get(3), img.get(4)) {
            (Some(p3), Some(p4)) => (p3.y - p4.y) as i32,
            _ => 0,
        };

        let mut loss = 0.0;
        let mut intersections = 0usize;
        for (n, seg) in img.windows(2).enumerate() {
            let (a, b) = (seg[0], seg[1]);
            let y_major = (b.y - a.y).abs() > (b.x - a.x).abs();
            let weight = match rule {
                ScoreRule::Final => 1.0,
                _ => target.weight(n),
            };
            let mut seg_loss = 0.0;
            for_each_segment_pixel(&a, &b, w, h, |x, y| {
                bevel.push((x, y));
                let mut row = y;
                if let ScoreRule::TBevel { row_threshold } = rule {
                    if n == 3 {
                        return;
                    }
                    if n == 2 && y_major && y > row_threshold {
                        row = (y - row_offset).max(0);
                    }
                }
                if let Some(v) = field.get(x, row) {
                    seg_loss += v as Real;
                }
                if target.check_intersections && target.intersects(x, row) {
                    intersections += 1;
                }
            });
            loss += seg_loss * weight;
        }

        let bevel_n = bevel.len();
        let shortfall = target.profile_len.saturating_sub(bevel_n) as Real;
        let n_segments = img.len().saturating_sub(1).max(1) as Real;
        let mse = match rule {
            ScoreRule::Constrained if bevel_n == 0 => EMPTY_BEVEL_LOSS,
            ScoreRule::Constrained => loss / bevel_n as Real + shortfall + intersections as Real,
            _ => (loss + SHORTFALL_PENALTY * shortfall + intersections as Real) / n_segments,
        };
        let valid = !target.check_intersections || intersections <= target.intersection_threshold;
        trace!(
            "{:?}: {} px, loss {:.3}, {} intersections",
            rule,
            bevel_n,
            mse,
            intersections
        );

        self.mse = mse;
        self.intersections = intersections;
        valid
    }

    /// Unweighted rasterization of the current polygon, used once a
    /// solution is accepted.
    pub fn score_final(&mut self) -> bool {
        self.score(ScoreRule::Final)
    }
}

impl FitTarget {
    /// Rows of the detected profile this target was built from.
    pub fn profile_len(&self) -> usize {
        self.profile_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htt_core::{LossField, LossFieldParams, Profile, ScheimpflugTransform, HI_LOSS};
    use std::sync::Arc;

    fn collect(a: Vec2, b: Vec2, w: usize, h: usize) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        for_each_segment_pixel(&a, &b, w, h, |x, y| out.push((x, y)));
        out
    }

    #[test]
    fn end_point_is_excluded() {
        let px = collect(Vec2::new(2.0, 3.0), Vec2::new(6.0, 3.0), 10, 10);
        assert_eq!(px, vec![(2, 3), (3, 3), (4, 3), (5, 3)]);
    }

    #[test]
    fn walks_backwards_when_needed() {
        let px = collect(Vec2::new(4.0, 6.0), Vec2::new(4.0, 2.0), 10, 10);
        assert_eq!(px, vec![(4, 6), (4, 5), (4, 4), (4, 3)]);
        let px = collect(Vec2::new(6.0, 1.0), Vec2::new(2.0, 1.0), 10, 10);
        assert_eq!(px.first(), Some(&(6, 1)));
        assert_eq!(px.len(), 4);
    }

    #[test]
    fn diagonal_segment_interpolates_minor_axis() {
        let px = collect(Vec2::new(0.0, 0.0), Vec2::new(4.0, 2.0), 10, 10);
        assert_eq!(px, vec![(0, 0), (1, 0), (2, 1), (3, 1)]);
    }

    #[test]
    fn clips_to_raster() {
        let px = collect(Vec2::new(-5.0, 2.0), Vec2::new(1e9, 2.0), 8, 4);
        assert_eq!(px.len(), 8);
        assert!(px.iter().all(|&(x, y)| (0..8).contains(&x) && y == 2));

        assert!(collect(Vec2::new(0.0, 10.0), Vec2::new(5.0, 10.0), 8, 4).is_empty());
        assert!(collect(Vec2::new(Real::NAN, 1.0), Vec2::new(5.0, 1.0), 8, 4).is_empty());
    }

    fn target(check: bool) -> FitTarget {
        let profile = Profile::from_points((0..10).map(|y| (20, y))).unwrap();
        let params = LossFieldParams {
            margin: 0,
            right_offset: 10,
            left_offset: 5,
            left_gradient_width: 2,
        };
        let field = LossField::build(40, 10, &profile, &params);
        FitTarget::new(Arc::new(field), &profile, check, 5, vec![1.0])
    }

    #[test]
    fn constrained_score_averages_loss_over_pixels() {
        let mut core = ModelCore::new(ScheimpflugTransform::default(), 2);
        core.set_fit_target(target(true));
        core.set_img_points(&[Vec2::new(25.0, 0.0), Vec2::new(25.0, 10.0)]);
        assert!(core.score(ScoreRule::Constrained));
        // right_x = 30, ten-pixel gradient: column 25 is step 6.
        assert!((core.mse() - 36.0).abs() < 1e-9, "mse {}", core.mse());
        assert_eq!(core.intersections(), 0);
    }

    #[test]
    fn crossing_the_profile_invalidates_candidate() {
        let mut core = ModelCore::new(ScheimpflugTransform::default(), 2);
        core.set_fit_target(target(true));
        core.set_img_points(&[Vec2::new(15.0, 0.0), Vec2::new(15.0, 10.0)]);
        assert!(!core.score(ScoreRule::Constrained));
        assert_eq!(core.intersections(), 10);
        let hi2 = (HI_LOSS * HI_LOSS) as Real;
        assert!((core.mse() - (hi2 + 10.0)).abs() < 1e-3);

        core.set_fit_target(target(false));
        assert!(core.score(ScoreRule::Constrained));
        assert_eq!(core.intersections(), 0);
    }

    #[test]
    fn degenerate_vertices_score_infinite() {
        let mut core = ModelCore::new(ScheimpflugTransform::default(), 2);
        core.set_fit_target(target(true));
        core.set_img_points(&[Vec2::new(Real::NAN, 0.0), Vec2::new(25.0, 10.0)]);
        assert!(!core.score(ScoreRule::Constrained));
        assert_eq!(core.mse(), Real::INFINITY);
    }

    #[test]
    fn uncovered_profile_rows_are_penalized() {
        let mut core = ModelCore::new(ScheimpflugTransform::default(), 2);
        core.set_fit_target(target(false));
        core.set_img_points(&[Vec2::new(25.0, 0.0), Vec2::new(25.0, 4.0)]);
        assert!(core.score(ScoreRule::Constrained));
        assert!((core.mse() - (36.0 + 6.0)).abs() < 1e-9);

        assert!(core.score_final());
        assert!((core.mse() - (4.0 * 36.0 + 6e3)).abs() < 1e-6);
    }

    #[test]
    fn t_face_checks_the_edge_on_shifted_rows() {
        // Edge at x = 30 above row 20 and x = 5 below it.
        let profile = Profile::from_points((0..40).map(|y| (if y < 20 { 30 } else { 5 }, y))).unwrap();
        let field = LossField::build(40, 40, &profile, &LossFieldParams::default());
        let target = FitTarget::new(Arc::new(field), &profile, true, 100, vec![]);

        // T face p2 → p3 on column 20, rows 25..35; the T is 10 rows high.
        let tip = Vec2::new(20.0, 25.0);
        let back = Vec2::new(38.0, 25.0);
        let img = [tip, tip, tip, Vec2::new(20.0, 35.0), back, back];
        let mut core = ModelCore::new(ScheimpflugTransform::default(), 6);
        core.set_fit_target(target);
        core.set_img_points(&img);

        assert!(core.score(ScoreRule::Constrained));
        assert_eq!(core.intersections(), 0);

        // Shifted rows 15..25 cross the edge on rows 15..20.
        assert!(core.score(ScoreRule::TBevel { row_threshold: 0 }));
        assert_eq!(core.intersections(), 5);

        // Above the threshold nothing is shifted.
        assert!(core.score(ScoreRule::TBevel { row_threshold: 40 }));
        assert_eq!(core.intersections(), 0);
    }
}
