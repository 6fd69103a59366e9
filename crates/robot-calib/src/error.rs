use robot_calib_core::{HomographyError, Pose6};
use std::sync::Arc;

/// Fatal conditions of a calibration run.
///
/// Each variant renders a diagnostic naming the marker, phase and limit
/// involved. A run that ends in the ERROR state carries one of these; I/O and
/// JSON errors are shared so the state and the caller can both hold it.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CalibrationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Axis mapping failed: reference marker {marker_id} not found after {attempts} attempts"
    )]
    AxisMappingFailed { marker_id: u32, attempts: usize },

    #[error(
        "Axis mapping failed: no camera frame within {timeout_s}s while locating reference marker {marker_id}"
    )]
    MappingFrameTimeout { marker_id: u32, timeout_s: f64 },

    #[error(
        "Robot movement failed: could not reach the calibration reference position {target} \
         (driver code {code})"
    )]
    ReferenceMoveFailed { target: Pose6, code: i32 },

    #[error(
        "Robot movement failed for marker {marker_id}. Could not reach target position {target} \
         after retry (driver code {code}). Check robot safety limits and workspace boundaries."
    )]
    MotionFailed {
        marker_id: u32,
        target: Pose6,
        code: i32,
    },

    #[error(
        "Robot movement failed during axis mapping with marker {marker_id}: target {target} \
         (driver code {code})"
    )]
    MappingMoveFailed {
        marker_id: u32,
        target: Pose6,
        code: i32,
    },

    #[error(
        "Robot movement failed during fine alignment of marker {marker_id}. \
         Iteration {iteration}/{max_iterations}. Check robot connectivity and safety systems."
    )]
    FineMoveFailed {
        marker_id: u32,
        iteration: u32,
        max_iterations: u32,
        code: i32,
    },

    #[error(
        "Could not align with marker {marker_id} after {max_iterations} iterations. \
         Required precision: {threshold_mm}mm"
    )]
    ConvergenceFailed {
        marker_id: u32,
        max_iterations: u32,
        threshold_mm: f64,
    },

    #[error("missing calibration data: {}", missing.join(", "))]
    MissingCalibrationData { missing: Vec<String> },

    #[error(transparent)]
    Homography(#[from] HomographyError),

    #[error(transparent)]
    Io(Arc<std::io::Error>),

    #[error(transparent)]
    Json(Arc<serde_json::Error>),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}
