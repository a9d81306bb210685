use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a profile violates its shape invariants.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProfileError {
    /// `x` and `y` must have the same length.
    #[error("profile coordinates have mismatched lengths ({0} x vs {1} y)")]
    LengthMismatch(usize, usize),
    /// A profile needs at least one point.
    #[error("profile is empty")]
    Empty,
}

/// Ordered pixel trace of a detected edge, one point per image row.
///
/// `x`/`y` are the detected boundary, ordered by increasing row. The
/// auxiliary sets are filled by the fitting pipeline for presentation:
/// model vertices (`img_*`), depth anchor points (`distance_img_*`) and the
/// search-space anchors (`anchor_img_*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub x: Vec<i32>,
    pub y: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub img_x: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub img_y: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distance_img_x: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distance_img_y: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchor_img_x: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchor_img_y: Vec<i32>,
}

impl Profile {
    /// Build a profile from parallel coordinate vectors.
    pub fn new(x: Vec<i32>, y: Vec<i32>) -> Result<Self, ProfileError> {
        let profile = Self {
            x,
            y,
            ..Self::default()
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Build a profile from `(x, y)` pairs.
    pub fn from_points<I>(points: I) -> Result<Self, ProfileError>
    where
        I: IntoIterator<Item = (i32, i32)>,
    {
        let (x, y) = points.into_iter().unzip();
        Self::new(x, y)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.x.len() != self.y.len() {
            return Err(ProfileError::LengthMismatch(self.x.len(), self.y.len()));
        }
        if self.x.is_empty() {
            return Err(ProfileError::Empty);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.x.len().min(self.y.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn point(&self, i: usize) -> Option<(i32, i32)> {
        Some((*self.x.get(i)?, *self.y.get(i)?))
    }

    pub fn points(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }

    /// Last detected point (the lowest row of the trace).
    pub fn last_point(&self) -> Option<(i32, i32)> {
        self.point(self.len().checked_sub(1)?)
    }

    /// `(min, max)` of the column coordinates.
    pub fn x_range(&self) -> Option<(i32, i32)> {
        min_max(&self.x)
    }

    /// `(min, max)` of the row coordinates.
    pub fn y_range(&self) -> Option<(i32, i32)> {
        min_max(&self.y)
    }

    /// Replace the search-space anchor set.
    pub fn set_anchors(&mut self, anchors: &[(i32, i32)]) {
        self.anchor_img_x = anchors.iter().map(|p| p.0).collect();
        self.anchor_img_y = anchors.iter().map(|p| p.1).collect();
    }
}

fn min_max(v: &[i32]) -> Option<(i32, i32)> {
    let min = v.iter().copied().min()?;
    let max = v.iter().copied().max()?;
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_and_empty_profiles() {
        assert_eq!(
            Profile::new(vec![1, 2], vec![1]),
            Err(ProfileError::LengthMismatch(2, 1))
        );
        assert_eq!(Profile::new(vec![], vec![]), Err(ProfileError::Empty));
    }

    #[test]
    fn ranges_and_last_point() {
        let p = Profile::from_points([(10, 3), (7, 4), (12, 5)]).unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.x_range(), Some((7, 12)));
        assert_eq!(p.y_range(), Some((3, 5)));
        assert_eq!(p.last_point(), Some((12, 5)));
    }

    #[test]
    fn auxiliary_sets_are_optional_in_json() {
        let p: Profile = serde_json::from_str(r#"{"x":[1,2],"y":[5,6]}"#).unwrap();
        assert!(p.img_x.is_empty());
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("img_x"), "unexpected aux field in {json}");
    }
}
