//! Tilted-lens (Scheimpflug) projection between the object plane and the sensor.
//!
//! The object plane is the measurement plane (millimetres, `Z = 0`). The lens
//! is modelled by two nodal points `P1`/`P2` on the optical axis, the sensor by
//! a plane through `S` tilted by `(alpha, beta)` relative to the axis, and the
//! axis itself by `(theta, phi)`. The stylus orientation `(R, H)` rotates the
//! part around the probe: `H` spins it in the object plane, `R + delta`
//! stretches the horizontal axis and shifts it by a characteristic length `dBC`.
//!
//! All configuration angles are given in degrees; the transform stores and
//! consumes radians internally. Every parameter change goes through
//! [`ScheimpflugTransform::init`] or
//! [`ScheimpflugTransform::set_stylus_orientation`], which refresh the cached
//! rotations so that per-point projection is a handful of dot products.

use crate::math::{rot_x, rot_y, rot_z, sign, Mat3, Real, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Number of calibratable transform parameters.
pub const N_TRANSFORM_PARAMS: usize = 10;

/// Names of the calibratable parameters, in flat-vector order.
pub const TRANSFORM_PARAM_NAMES: [&str; N_TRANSFORM_PARAMS] = [
    "alpha", "beta", "cx0", "cy0", "delta", "p1", "p2", "phi", "theta", "tt",
];

/// Named configuration of a [`ScheimpflugTransform`].
///
/// Angles are in degrees, lengths in millimetres, `cx0`/`cy0` in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheimpflugParams {
    /// Sensor tilt around Y (degrees).
    pub alpha: Real,
    /// Sensor tilt around X (degrees).
    pub beta: Real,
    /// Sensor centre column (pixels, truncated to an integer).
    pub cx0: Real,
    /// Sensor centre row (pixels, truncated to an integer).
    pub cy0: Real,
    /// Probe mounting offset added to the stylus angle `R` (degrees).
    pub delta: Real,
    /// Distance of the first nodal point along the optical axis (mm).
    pub p1: Real,
    /// Distance of the second nodal point along the optical axis (mm).
    pub p2: Real,
    /// Optical axis tilt around X (degrees).
    pub phi: Real,
    /// Optical axis tilt around Y (degrees).
    pub theta: Real,
    /// Distance of the sensor centre along the optical axis (mm).
    pub tt: Real,
    /// Pixel pitch (mm). Not calibrated.
    pub px: Real,
    /// Signed optical magnification. Not calibrated.
    pub magnification: Real,
}

impl Default for ScheimpflugParams {
    fn default() -> Self {
        Self {
            alpha: 5.0,
            beta: 0.0,
            cx0: 640.0,
            cy0: 512.0,
            delta: 0.0,
            p1: 40.0,
            p2: 45.0,
            phi: 0.0,
            theta: 20.0,
            tt: 85.0,
            px: 0.01,
            magnification: -1.0,
        }
    }
}

impl ScheimpflugParams {
    /// Calibratable parameters as a flat vector (see [`TRANSFORM_PARAM_NAMES`]).
    pub fn free_vector(&self) -> [Real; N_TRANSFORM_PARAMS] {
        [
            self.alpha, self.beta, self.cx0, self.cy0, self.delta, self.p1, self.p2, self.phi,
            self.theta, self.tt,
        ]
    }

    /// Copy of `self` with the calibratable parameters replaced by `v`.
    ///
    /// Missing trailing entries keep their current value; `px` and
    /// `magnification` are never touched. `cx0`/`cy0` are truncated.
    pub fn with_free_vector(&self, v: &[Real]) -> Self {
        let mut out = *self;
        let mut cur = self.free_vector();
        for (dst, src) in cur.iter_mut().zip(v) {
            *dst = *src;
        }
        out.alpha = cur[0];
        out.beta = cur[1];
        out.cx0 = cur[2].trunc();
        out.cy0 = cur[3].trunc();
        out.delta = cur[4];
        out.p1 = cur[5];
        out.p2 = cur[6];
        out.phi = cur[7];
        out.theta = cur[8];
        out.tt = cur[9];
        out
    }
}

/// Closed-form projector/back-projector with cached rotations.
///
/// Not reentrant: candidate evaluation mutates the caches in place, so one
/// instance must only be driven by one optimizer run at a time.
#[derive(Debug, Clone)]
pub struct ScheimpflugTransform {
    params: ScheimpflugParams,
    cx0: Real,
    cy0: Real,
    delta: Real,
    // Geometry caches, refreshed by `init`.
    s: Vec3,
    p1v: Vec3,
    p2v: Vec3,
    rtf_rab: Mat3,
    n_s: Vec3,
    t: Mat3,
    ry_delta: Mat3,
    // Stylus caches, refreshed by `set_stylus_orientation`.
    r: Real,
    h: Real,
    rz_h: Mat3,
    rz_mh: Mat3,
    c: Vec3,
    dbc: Real,
    v1: Real,
    v2: Real,
    v3: Real,
    v4: Real,
}

impl Default for ScheimpflugTransform {
    fn default() -> Self {
        Self::new(&ScheimpflugParams::default())
    }
}

impl ScheimpflugTransform {
    /// Build a transform with stylus orientation `R = H = 0`.
    pub fn new(params: &ScheimpflugParams) -> Self {
        let mut st = Self {
            params: *params,
            cx0: 0.0,
            cy0: 0.0,
            delta: 0.0,
            s: Vec3::zeros(),
            p1v: Vec3::zeros(),
            p2v: Vec3::zeros(),
            rtf_rab: Mat3::identity(),
            n_s: Vec3::z(),
            t: Mat3::identity(),
            ry_delta: Mat3::identity(),
            r: 0.0,
            h: 0.0,
            rz_h: Mat3::identity(),
            rz_mh: Mat3::identity(),
            c: Vec3::zeros(),
            dbc: 0.0,
            v1: 0.0,
            v2: 1.0,
            v3: 1.0,
            v4: 0.0,
        };
        st.init(params);
        st
    }

    /// Re-derive every cache from a named configuration.
    ///
    /// The current stylus orientation is kept and its caches are refreshed
    /// too, since they depend on the sensor geometry.
    pub fn init(&mut self, params: &ScheimpflugParams) {
        self.params = *params;
        self.params.cx0 = params.cx0.trunc();
        self.params.cy0 = params.cy0.trunc();
        self.cx0 = self.params.cx0;
        self.cy0 = self.params.cy0;
        self.delta = params.delta.to_radians();

        let rtf = rot_y(params.theta.to_radians()) * rot_x(params.phi.to_radians());
        let rab = rot_x(params.beta.to_radians()) * rot_y(params.alpha.to_radians());
        let vr = rtf * Vec3::z();

        self.s = vr * params.tt;
        self.p1v = vr * params.p1;
        self.p2v = vr * params.p2;

        self.rtf_rab = rtf * rab;
        self.n_s = self.rtf_rab * Vec3::z();
        self.t = self.rtf_rab.transpose() / params.px;
        self.ry_delta = rot_y(self.delta);

        let (r, h) = (self.r(), self.h());
        self.set_stylus_orientation(r, h);
    }

    /// Re-derive every cache from a flat candidate vector.
    ///
    /// See [`ScheimpflugParams::with_free_vector`] for the vector layout.
    pub fn init_from_vector(&mut self, v: &[Real]) {
        let params = self.params.with_free_vector(v);
        self.init(&params);
    }

    /// Set the stylus orientation `(R, H)` in degrees.
    pub fn set_stylus_orientation(&mut self, r_deg: Real, h_deg: Real) {
        self.r = (-r_deg).to_radians();
        self.h = h_deg.to_radians();

        self.rz_h = rot_z(self.h);
        self.rz_mh = rot_z(-self.h);
        let ry_r = rot_y(self.r);

        let z = Vec3::z();
        let w = Vec3::new(10.0, 0.0, 1.0);
        let vg = ry_r * self.ry_delta * z;

        self.c = self.ry_delta * w + (ry_r * z - z) - w;
        let b = Vec3::new(0.0, 0.0, (vg.z * self.c.z + vg.x * self.c.x) / vg.z);
        self.dbc = (b - self.c).norm();

        let rd = self.r + self.delta;
        self.v1 = self.dbc * sign(self.c.x);
        self.v3 = rd.cos();
        self.v2 = 1.0 / self.v3;
        self.v4 = self.n_s.dot(&self.s) - self.n_s.dot(&self.p2v);
    }

    /// Project an object-plane point (mm, `Z = 0`) onto the sensor (pixels).
    ///
    /// Degenerate geometry yields non-finite coordinates rather than an error.
    pub fn object_to_image(&self, obj: &Vec2, rounding: bool) -> Vec2 {
        let m = self.rz_mh * Vec3::new(obj.x, obj.y, 0.0);
        let vt = Vec3::new(
            self.p1v.x - (m.x * self.v2 - self.v1),
            self.p1v.y - m.y,
            self.p1v.z - m.z,
        );
        let lam = self.v4 / self.n_s.dot(&vt);
        let msc = self.p2v + vt * lam - self.s;

        let sensor = self.t * msc;
        let u = sensor.x + self.cx0;
        let v = sensor.y + self.cy0;
        if rounding {
            Vec2::new(u.round(), v.round())
        } else {
            Vec2::new(u, v)
        }
    }

    /// Batch form of [`Self::object_to_image`]; `out` is cleared and reused.
    pub fn object_to_image_batch(&self, obj: &[Vec2], out: &mut Vec<Vec2>, rounding: bool) {
        out.clear();
        out.extend(obj.iter().map(|p| self.object_to_image(p, rounding)));
    }

    /// Back-project a sensor pixel onto the object plane (mm).
    pub fn image_to_object(&self, img: &Vec2) -> Vec2 {
        let p_sens = Vec3::new(
            (img.x - self.cx0) * self.params.px,
            (img.y - self.cy0) * self.params.px,
            0.0,
        );
        let p_sens2 = self.rtf_rab * p_sens + self.s;
        let vt = p_sens2 - self.p2v;

        let lam = -self.p1v.z / vt.z;
        let mut po = self.p1v + vt * lam;
        po.x = (po.x + self.v1) * self.v3;
        let out = self.rz_h * po;
        Vec2::new(out.x, out.y)
    }

    /// Batch form of [`Self::image_to_object`].
    pub fn image_to_object_batch(&self, img: &[Vec2]) -> Vec<Vec2> {
        img.iter().map(|p| self.image_to_object(p)).collect()
    }

    pub fn pixel_to_mm(&self, v: Real) -> Real {
        v * self.params.px / self.params.magnification.abs()
    }

    pub fn mm_to_pixel(&self, v: Real) -> Real {
        v / self.params.px * self.params.magnification.abs()
    }

    /// Stylus angle `R` in degrees.
    pub fn r(&self) -> Real {
        (-self.r).to_degrees()
    }

    /// Stylus angle `H` in degrees.
    pub fn h(&self) -> Real {
        self.h.to_degrees()
    }

    /// Current configuration (degrees), with `cx0`/`cy0` truncated.
    pub fn params(&self) -> &ScheimpflugParams {
        &self.params
    }

    /// Characteristic length of the current stylus orientation (mm).
    pub fn dbc(&self) -> Real {
        self.dbc
    }
}
