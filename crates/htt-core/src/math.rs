use nalgebra::{Matrix3, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Mat3 = Matrix3<Real>;

/// Rotation about the X axis by `t` radians.
pub fn rot_x(t: Real) -> Mat3 {
    let (s, c) = t.sin_cos();
    Mat3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

/// Rotation about the Y axis by `t` radians.
pub fn rot_y(t: Real) -> Mat3 {
    let (s, c) = t.sin_cos();
    Mat3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

/// Rotation about the Z axis by `t` radians.
pub fn rot_z(t: Real) -> Mat3 {
    let (s, c) = t.sin_cos();
    Mat3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Sign with `signum(0) == 0`.
pub fn sign(v: Real) -> Real {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Angle in `[0, π]` between the lines along `u` and `v`, each taken
/// with its direction pointing to `+x` (`+y` when vertical).
///
/// Matches `|atan((m1 - m2) / (1 + m1·m2))|` on the slopes, extended to
/// vertical lines. A zero vector gives `0`.
pub fn line_angle(u: &Vec2, v: &Vec2) -> Real {
    let orient = |d: &Vec2| {
        if d.x < 0.0 || (d.x == 0.0 && d.y < 0.0) {
            -d
        } else {
            *d
        }
    };
    let (u, v) = (orient(u), orient(v));
    (u.x * v.y - u.y * v.x).abs().atan2(u.dot(&v))
}
