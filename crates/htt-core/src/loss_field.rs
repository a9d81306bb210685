//! Per-pixel loss raster carved from a detected profile.
//!
//! Every pixel starts in the forbidden region (`548²`). Each profile point
//! then carves a quadratic gradient to its right, rising from `0` towards
//! `10²` at the right limit, plus a narrow band to its left. Rows that carry
//! no profile point are free (`0`) between the left and right limits, so a
//! model may run past the ends of the detected trace without penalty.

use crate::profile::Profile;
use serde::{Deserialize, Serialize};

/// Loss assigned to the forbidden region, before squaring.
pub const HI_LOSS: f32 = 548.0;
/// Loss reached at the end of each carved gradient, before squaring.
pub const LOW_LOSS: f32 = 10.0;
/// Clip level used by [`LossField::normalized`].
pub const DEBUG_CLIP: f32 = 120.0;

/// Geometry of the carved gradients (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossFieldParams {
    /// Shift applied to every profile column before carving.
    pub margin: i32,
    /// How far right of the rightmost profile column the gradients extend.
    pub right_offset: i32,
    /// How far left of the leftmost profile column free rows extend.
    pub left_offset: i32,
    /// Width of the band carved to the left of each profile point.
    pub left_gradient_width: i32,
}

impl Default for LossFieldParams {
    fn default() -> Self {
        Self {
            margin: 2,
            right_offset: 60,
            left_offset: 30,
            left_gradient_width: 6,
        }
    }
}

/// Row-major single-channel `f32` raster.
#[derive(Debug, Clone, PartialEq)]
pub struct LossField {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl LossField {
    /// Build the field for `profile` on a `width × height` raster.
    ///
    /// Writes falling outside the raster are dropped.
    pub fn build(width: usize, height: usize, profile: &Profile, params: &LossFieldParams) -> Self {
        let hi2 = HI_LOSS * HI_LOSS;
        let mut field = Self {
            width,
            height,
            data: vec![hi2; width * height],
        };
        if width == 0 || height == 0 {
            return field;
        }

        let (min_x, max_x) = profile.x_range().unwrap_or((0, 0));
        let right_x = (max_x + params.right_offset).min(width as i32 - 1);
        let left_x = (min_x - params.left_offset).max(0);

        let mut has_profile = vec![false; height];

        for (x, y) in profile.points().collect::<Vec<_>>().into_iter().rev() {
            if y < 0 || y as usize >= height {
                continue;
            }
            has_profile[y as usize] = true;
            let x = x + params.margin;

            let x_range = right_x - x;
            if x_range > 0 {
                let ib = LOW_LOSS / x_range as f32;
                for k in 0..x_range {
                    let value = ib * (k + 1) as f32;
                    field.set(x + k, y, value * value);
                }
            }

            let band = params.left_gradient_width;
            if band > 0 {
                let ib = LOW_LOSS / band as f32;
                for k in 0..band {
                    let value = ib * (k + 1) as f32;
                    field.set(x - k, y, value * value);
                }
            }
        }

        for (y, carved) in has_profile.iter().enumerate() {
            if *carved {
                continue;
            }
            for x in left_x..right_x {
                field.set(x, y as i32, 0.0);
            }
        }

        field
    }

    fn set(&mut self, x: i32, y: i32, value: f32) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let idx = y as usize * self.width + x as usize;
        self.data[idx] = value;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Value at `(x, y)`, or `None` outside the raster.
    pub fn get(&self, x: i32, y: i32) -> Option<f32> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(self.data[y as usize * self.width + x as usize])
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Field clipped at [`DEBUG_CLIP`] and scaled into `[0, 1]`.
    ///
    /// A constant field normalizes to all zeros.
    pub fn normalized(&self) -> Vec<f32> {
        let min = self.data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if min >= max {
            return vec![0.0; self.data.len()];
        }
        self.data
            .iter()
            .map(|v| v.min(DEBUG_CLIP) / DEBUG_CLIP)
            .collect()
    }

    /// 8-bit grayscale rendering of [`Self::normalized`].
    pub fn to_gray8(&self) -> Vec<u8> {
        self.normalized()
            .into_iter()
            .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> LossFieldParams {
        LossFieldParams {
            margin: 0,
            right_offset: 10,
            left_offset: 5,
            left_gradient_width: 2,
        }
    }

    #[test]
    fn carves_gradients_around_profile() {
        let profile = Profile::from_points([(20, 1), (22, 2)]).unwrap();
        let field = LossField::build(40, 4, &profile, &params());

        // right_x = 22 + 10 = 32; row 1 gradient spans x = 20..32 (12 px)
        let ib = LOW_LOSS / 12.0;
        assert_relative_eq!(field.get(21, 1).unwrap(), (2.0 * ib).powi(2));
        assert_relative_eq!(field.get(31, 1).unwrap(), (12.0 * ib).powi(2));
        assert_relative_eq!(field.get(32, 1).unwrap(), HI_LOSS * HI_LOSS);

        // The left band overwrites the profile pixel itself.
        let ib2 = LOW_LOSS / 2.0;
        assert_relative_eq!(field.get(20, 1).unwrap(), ib2.powi(2));
        assert_relative_eq!(field.get(19, 1).unwrap(), (2.0 * ib2).powi(2));
        assert_relative_eq!(field.get(18, 1).unwrap(), HI_LOSS * HI_LOSS);
    }

    #[test]
    fn rows_without_profile_are_free_between_limits() {
        let profile = Profile::from_points([(20, 1), (22, 2)]).unwrap();
        let field = LossField::build(40, 4, &profile, &params());
        // left_x = 20 - 5 = 15, right_x = 32
        assert_eq!(field.get(15, 0), Some(0.0));
        assert_eq!(field.get(31, 3), Some(0.0));
        assert_eq!(field.get(14, 0), Some(HI_LOSS * HI_LOSS));
        assert_eq!(field.get(32, 3), Some(HI_LOSS * HI_LOSS));
    }

    #[test]
    fn out_of_raster_profile_points_are_ignored() {
        let profile = Profile::from_points([(-5, 0), (38, 1), (10, 99)]).unwrap();
        let field = LossField::build(40, 4, &profile, &params());
        assert_eq!(field.data().len(), 160);
        assert_eq!(field.get(40, 1), None);
    }

    #[test]
    fn normalized_field_is_clipped() {
        let profile = Profile::from_points([(20, 1)]).unwrap();
        let field = LossField::build(40, 4, &profile, &params());
        let norm = field.normalized();
        assert!(norm.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(norm[0], 1.0);
    }
}
