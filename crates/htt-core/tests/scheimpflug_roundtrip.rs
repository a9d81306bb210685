//! Integration tests for the tilted-lens projection.
//!
//! Validates that back-projection inverts projection across stylus
//! orientations and tilted configurations.

use htt_core::{ScheimpflugParams, ScheimpflugTransform, Vec2};

fn tilted_configs() -> Vec<ScheimpflugParams> {
    let base = ScheimpflugParams::default();
    vec![
        base,
        ScheimpflugParams {
            alpha: -3.0,
            beta: 1.5,
            delta: 2.0,
            phi: -4.0,
            theta: 28.0,
            ..base
        },
        ScheimpflugParams {
            alpha: 8.0,
            beta: -2.0,
            cx0: 700.0,
            cy0: 400.0,
            delta: -5.0,
            p1: 38.0,
            p2: 47.5,
            tt: 90.0,
            px: 0.0055,
            ..base
        },
    ]
}

#[test]
fn back_projection_inverts_projection() {
    let obj_points = [
        Vec2::new(0.0, 0.0),
        Vec2::new(1.2, -0.7),
        Vec2::new(-2.5, 1.9),
        Vec2::new(3.0, 3.0),
        Vec2::new(-1.0, -2.2),
    ];

    for params in tilted_configs() {
        let mut st = ScheimpflugTransform::new(&params);
        for r in [-30.0, -10.0, 0.0, 15.0, 35.0] {
            for h in [-20.0, 0.0, 12.0] {
                st.set_stylus_orientation(r, h);
                for p in &obj_points {
                    let img = st.object_to_image(p, false);
                    assert!(
                        img.x.is_finite() && img.y.is_finite(),
                        "projection of {:?} not finite for R={} H={}",
                        p,
                        r,
                        h
                    );
                    let back = st.image_to_object(&img);
                    let err = (back - p).norm();
                    assert!(
                        err < 1e-3,
                        "round trip error too large: {} mm for point {:?} (R={}, H={}, params={:?})",
                        err,
                        p,
                        r,
                        h,
                        params
                    );
                }
            }
        }
    }
}

#[test]
fn rounded_projection_stays_within_half_a_pixel() {
    let mut st = ScheimpflugTransform::new(&tilted_configs()[1]);
    st.set_stylus_orientation(10.0, -5.0);
    let p = Vec2::new(0.37, -1.21);
    let exact = st.object_to_image(&p, false);
    let rounded = st.object_to_image(&p, true);
    assert!((exact.x - rounded.x).abs() <= 0.5);
    assert!((exact.y - rounded.y).abs() <= 0.5);
}

#[test]
fn batch_projection_matches_single_points() {
    let st = ScheimpflugTransform::default();
    let obj = [Vec2::new(0.5, 0.5), Vec2::new(-1.0, 2.0)];
    let mut out = vec![Vec2::zeros(); 7];
    st.object_to_image_batch(&obj, &mut out, false);
    assert_eq!(out.len(), 2);
    for (o, p) in out.iter().zip(&obj) {
        assert_eq!(*o, st.object_to_image(p, false));
    }
    let back = st.image_to_object_batch(&out);
    assert!((back[1] - obj[1]).norm() < 1e-6);
}

#[test]
fn unit_conversions_are_inverse() {
    for params in tilted_configs() {
        let st = ScheimpflugTransform::new(&params);
        for v in [-250.0, -1.0, 0.0, 0.25, 120.0, 4096.0] {
            let back = st.mm_to_pixel(st.pixel_to_mm(v));
            assert!((back - v).abs() < 1e-9 * v.abs().max(1.0), "{} -> {}", v, back);
        }
    }
}
