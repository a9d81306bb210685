use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a fitting or calibration run, with its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    #[default]
    Uninitialized = 0,

    CalibrationSuccessful = 200,
    /// The swarm converged but the residual stayed above epsilon.
    CalibrationFailedConvergence = 201,
    CalibrationFailedGrid = 202,
    CalibrationFailedLineDetection = 203,
    /// The optimum sits on a transform bound and boundary solutions are not permitted.
    CalibrationFailedSearchSpace = 204,
    /// The swarm could not be initialized.
    CalibrationFailedPsoInit = 205,

    LensFittingSuccessful = 300,
    /// No anchors were found on the profile.
    LensFittingFailedModelNotInitialized = 301,
    /// Every attempt failed inside the swarm.
    LensFittingFailedMaxRetriesReached = 302,
    /// Every converged attempt crossed the detected edge.
    LensFittingFailedBevelFrameIntersection = 303,
    /// Accepted, but the optimum sits on a search-space bound.
    LensFittingFailedPsoBoundaryReached = 304,
}

impl ReturnCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            ReturnCode::CalibrationSuccessful | ReturnCode::LensFittingSuccessful
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReturnCode::Uninitialized => "UNINITIALIZED",
            ReturnCode::CalibrationSuccessful => "CALIBRATION_SUCCESSFUL",
            ReturnCode::CalibrationFailedConvergence => "CALIBRATION_FAILED_CONVERGENCE",
            ReturnCode::CalibrationFailedGrid => "CALIBRATION_FAILED_GRID",
            ReturnCode::CalibrationFailedLineDetection => "CALIBRATION_FAILED_LINE_DETECTION",
            ReturnCode::CalibrationFailedSearchSpace => "CALIBRATION_FAILED_SEARCH_SPACE",
            ReturnCode::CalibrationFailedPsoInit => "CALIBRATION_FAILED_PSO_INIT",
            ReturnCode::LensFittingSuccessful => "LENS_FITTING_SUCCESSFUL",
            ReturnCode::LensFittingFailedModelNotInitialized => {
                "LENS_FITTING_FAILED_MODEL_NOT_INITIALIZED"
            }
            ReturnCode::LensFittingFailedMaxRetriesReached => {
                "LENS_FITTING_FAILED_MAX_RETRIES_REACHED"
            }
            ReturnCode::LensFittingFailedBevelFrameIntersection => {
                "LENS_FITTING_FAILED_BEVEL_FRAME_INTERSECTION"
            }
            ReturnCode::LensFittingFailedPsoBoundaryReached => {
                "LENS_FITTING_FAILED_PSO_BOUNDARY_REACHED"
            }
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

/// What a model is being fitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessType {
    #[default]
    LensFitting,
    Calibration,
    Validation,
    Testing,
    Measure,
}

/// Calibration entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationType {
    Grid,
    Frame,
    MultiFrames,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_values() {
        assert_eq!(ReturnCode::Uninitialized.code(), 0);
        assert_eq!(ReturnCode::CalibrationFailedPsoInit.code(), 205);
        assert_eq!(ReturnCode::LensFittingFailedPsoBoundaryReached.code(), 304);
        assert!(ReturnCode::LensFittingSuccessful.is_success());
        assert!(!ReturnCode::LensFittingFailedPsoBoundaryReached.is_success());
    }

    #[test]
    fn serde_and_display_names() {
        let json = serde_json::to_string(&ReturnCode::CalibrationSuccessful).unwrap();
        assert_eq!(json, "\"CALIBRATION_SUCCESSFUL\"");
        assert_eq!(
            ReturnCode::LensFittingFailedMaxRetriesReached.to_string(),
            "LENS_FITTING_FAILED_MAX_RETRIES_REACHED (302)"
        );
        let p: ProcessType = serde_json::from_str("\"lens-fitting\"").unwrap();
        assert_eq!(p, ProcessType::LensFitting);
    }
}
