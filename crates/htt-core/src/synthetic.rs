//! Synthetic fixtures.
//!
//! The helpers here turn known object-plane geometry into the inputs the
//! pipeline consumes: an edge [`Profile`] traced along an image polyline, and
//! the ordered intersection points of a planar calibration grid.

use crate::{
    math::{Real, Vec2},
    profile::{Profile, ProfileError},
    scheimpflug::ScheimpflugTransform,
};

/// Trace an image-plane polyline into a one-point-per-row edge profile.
///
/// Rows are visited top to bottom; each row takes the column where the
/// first segment spanning it crosses the row centre, rounded and moved
/// `shift_left` pixels to the left.
pub fn polyline_profile(vertices: &[Vec2], shift_left: i32) -> Result<Profile, ProfileError> {
    let finite: Vec<Vec2> = vertices
        .iter()
        .copied()
        .filter(|v| v.x.is_finite() && v.y.is_finite())
        .collect();
    if finite.len() < 2 {
        return Err(ProfileError::Empty);
    }

    let y_min = finite.iter().map(|v| v.y).fold(Real::INFINITY, Real::min);
    let y_max = finite.iter().map(|v| v.y).fold(Real::NEG_INFINITY, Real::max);

    let mut points = Vec::new();
    let mut row = y_min.ceil() as i32;
    while (row as Real) <= y_max {
        let yc = row as Real;
        let hit = finite.windows(2).find_map(|w| {
            let (a, b) = (w[0], w[1]);
            let (lo, hi) = if a.y <= b.y { (a.y, b.y) } else { (b.y, a.y) };
            if yc < lo || yc > hi || hi == lo {
                return None;
            }
            let t = (yc - a.y) / (b.y - a.y);
            Some(a.x + t * (b.x - a.x))
        });
        if let Some(x) = hit {
            points.push((x.round() as i32 - shift_left, row));
        }
        row += 1;
    }

    Profile::from_points(points)
}

/// Ordered intersection points of a square calibration grid (object plane, mm).
///
/// The grid has `lines_per_axis` evenly spaced lines in each direction
/// spanning a `side × side` square. Each line contributes its two end
/// points: first the lines of constant `y`, then those of constant `x`,
/// then the centre point.
pub fn calibration_grid_points(side: Real, lines_per_axis: usize) -> Vec<Vec2> {
    let n = lines_per_axis.max(2);
    let step = side / (n - 1) as Real;
    let mut points = Vec::with_capacity(4 * n + 1);
    for k in 0..n {
        let y = k as Real * step;
        points.push(Vec2::new(0.0, y));
        points.push(Vec2::new(side, y));
    }
    for k in 0..n {
        let x = k as Real * step;
        points.push(Vec2::new(x, 0.0));
        points.push(Vec2::new(x, side));
    }
    points.push(Vec2::new(side / 2.0, side / 2.0));
    points
}

/// Project object points through `st`.
pub fn project_points(st: &ScheimpflugTransform, obj: &[Vec2], rounding: bool) -> Vec<Vec2> {
    let mut out = Vec::with_capacity(obj.len());
    st.object_to_image_batch(obj, &mut out, rounding);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polyline_profile_has_one_point_per_row() {
        let v = [Vec2::new(10.0, 0.0), Vec2::new(0.0, 10.0), Vec2::new(10.0, 20.0)];
        let p = polyline_profile(&v, 2).unwrap();
        assert_eq!(p.len(), 21);
        assert_eq!(p.point(0), Some((8, 0)));
        assert_eq!(p.point(10), Some((-2, 10)));
        assert_eq!(p.last_point(), Some((8, 20)));
    }

    #[test]
    fn grid_corners_sit_where_the_cost_expects_them() {
        let pts = calibration_grid_points(3.0, 7);
        assert_eq!(pts.len(), 29);
        let n_lines = (pts.len() - 1) / 2;
        let offset = ((n_lines >> 1) - 1) * 2;
        assert_eq!(pts[0], Vec2::new(0.0, 0.0));
        assert_eq!(pts[1], Vec2::new(3.0, 0.0));
        assert_eq!(pts[offset], Vec2::new(0.0, 3.0));
        assert_eq!(pts[offset + 1], Vec2::new(3.0, 3.0));
        assert_eq!(pts[28], Vec2::new(1.5, 1.5));
    }
}
