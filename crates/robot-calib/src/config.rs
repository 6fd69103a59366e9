//! Run configuration.
//!
//! Every section is `#[serde(default)]`, so a JSON file only needs the keys it
//! overrides. Durations are written as fractional seconds.

use crate::error::CalibrationError;
use robot_calib_core::HomographyMethod;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        Duration::try_from_secs_f64(v).map_err(serde::de::Error::custom)
    }
}

/// Physical chessboard description (inner-corner counts).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChessboardSpec {
    pub cols: usize,
    pub rows: usize,
    pub square_size_mm: f64,
}

impl Default for ChessboardSpec {
    fn default() -> Self {
        Self {
            cols: 9,
            rows: 6,
            square_size_mm: 25.0,
        }
    }
}

/// Test moves used to discover the image-to-robot axis mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisMappingConfig {
    /// Reference marker observed during the test moves.
    pub marker_id: u32,
    pub move_mm: f64,
    /// Frames inspected per detection before giving up.
    pub max_attempts: usize,
    /// Settle time after each test move.
    #[serde(with = "secs")]
    pub delay: Duration,
    /// Longest wait for a single frame while locating the marker.
    #[serde(with = "secs")]
    pub frame_timeout: Duration,
}

impl Default for AxisMappingConfig {
    fn default() -> Self {
        Self {
            marker_id: 4,
            move_mm: 100.0,
            max_attempts: 100,
            delay: Duration::from_secs(1),
            frame_timeout: Duration::from_secs(5),
        }
    }
}

/// Step-size law of the fine alignment loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveMovementConfig {
    pub min_step_mm: f64,
    pub max_step_mm: f64,
    /// Defaults to the alignment threshold when unset.
    pub target_error_mm: Option<f64>,
    /// Error at which the step saturates.
    pub max_error_ref: f64,
    /// Gain inside `tanh`.
    pub responsiveness: f64,
    /// Damping applied to fast error changes.
    pub derivative_scaling: f64,
}

impl Default for AdaptiveMovementConfig {
    fn default() -> Self {
        Self {
            min_step_mm: 0.1,
            max_step_mm: 25.0,
            target_error_mm: None,
            max_error_ref: 100.0,
            responsiveness: 2.0,
            derivative_scaling: 0.5,
        }
    }
}

/// Wall-clock waits of the run. Zero everything for simulations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    #[serde(with = "secs")]
    pub align_settle: Duration,
    #[serde(with = "secs")]
    pub fast_iteration_wait: Duration,
    #[serde(with = "secs")]
    pub pose_averaging_window: Duration,
    #[serde(with = "secs")]
    pub pose_sample_interval: Duration,
    /// Sleep between polls while waiting for a frame.
    #[serde(with = "secs")]
    pub frame_poll_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            align_settle: Duration::from_secs(1),
            fast_iteration_wait: Duration::from_secs(1),
            pose_averaging_window: Duration::from_secs(1),
            pose_sample_interval: Duration::from_millis(50),
            frame_poll_interval: Duration::from_millis(2),
        }
    }
}

impl TimingConfig {
    /// No waits at all.
    pub fn instant() -> Self {
        Self {
            align_settle: Duration::ZERO,
            fast_iteration_wait: Duration::ZERO,
            pose_averaging_window: Duration::ZERO,
            pose_sample_interval: Duration::ZERO,
            frame_poll_interval: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomographyConfig {
    pub method: HomographyMethod,
    /// Acceptance gate on the mean reprojection error.
    pub max_mean_error_mm: f64,
}

impl Default for HomographyConfig {
    fn default() -> Self {
        Self {
            method: HomographyMethod::LeastSquares,
            max_mean_error_mm: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub matrix_path: PathBuf,
    /// Optional per-point error report.
    pub report_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            matrix_path: PathBuf::from("camera_to_robot_matrix.json"),
            report_path: None,
        }
    }
}

/// Complete configuration of one calibration run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub required_ids: Vec<u32>,
    pub chessboard: ChessboardSpec,
    /// Robot Z during marker alignment, mm.
    pub z_target: f64,
    pub alignment_threshold_mm: f64,
    pub max_iterations: u32,
    /// Frames discarded before each marker search.
    pub camera_flush_frames: usize,
    pub axis_mapping: AxisMappingConfig,
    pub adaptive: AdaptiveMovementConfig,
    pub timing: TimingConfig,
    pub homography: HomographyConfig,
    pub output: OutputConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            required_ids: vec![0, 1, 2, 3, 4, 5, 6, 8],
            chessboard: ChessboardSpec::default(),
            z_target: 300.0,
            alignment_threshold_mm: 0.25,
            max_iterations: 50,
            camera_flush_frames: 5,
            axis_mapping: AxisMappingConfig::default(),
            adaptive: AdaptiveMovementConfig::default(),
            timing: TimingConfig::default(),
            homography: HomographyConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Required ids, ascending and deduplicated.
    pub fn sorted_required_ids(&self) -> Vec<u32> {
        let mut ids = self.required_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Step target of the adaptive controller.
    pub fn adaptive_target_mm(&self) -> f64 {
        self.adaptive
            .target_error_mm
            .unwrap_or(self.alignment_threshold_mm)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let invalid = |reason: &str| Err(CalibrationError::InvalidConfig(reason.to_string()));

        if self.required_ids.is_empty() {
            return invalid("required_ids is empty");
        }
        if self.chessboard.cols < 2 || self.chessboard.rows < 2 {
            return invalid("chessboard needs at least 2x2 inner corners");
        }
        if !(self.chessboard.square_size_mm > 0.0) {
            return invalid("chessboard.square_size_mm must be positive");
        }
        if !(self.z_target > 0.0) {
            return invalid("z_target must be positive");
        }
        if !(self.alignment_threshold_mm > 0.0) {
            return invalid("alignment_threshold_mm must be positive");
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1");
        }
        if self.axis_mapping.max_attempts == 0 || !(self.axis_mapping.move_mm > 0.0) {
            return invalid("axis_mapping needs a positive move and at least one attempt");
        }
        let a = &self.adaptive;
        if !(a.min_step_mm > 0.0) || a.min_step_mm > a.max_step_mm {
            return invalid("adaptive step range must satisfy 0 < min_step_mm <= max_step_mm");
        }
        if !(a.max_error_ref > 0.0) {
            return invalid("adaptive.max_error_ref must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_setup() {
        let cfg = CalibrationConfig::default();
        assert_eq!(cfg.required_ids, vec![0, 1, 2, 3, 4, 5, 6, 8]);
        assert_eq!(cfg.z_target, 300.0);
        assert_eq!(cfg.max_iterations, 50);
        assert_eq!(cfg.adaptive_target_mm(), 0.25);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "required_ids": [3, 1, 3],
            "timing": { "align_settle": 0.0, "pose_sample_interval": 0.025 },
            "homography": { "method": { "kind": "ransac", "reproj_threshold": 2.0, "max_iterations": 200 } }
        }"#;
        let cfg: CalibrationConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(cfg.sorted_required_ids(), vec![1, 3]);
        assert_eq!(cfg.timing.align_settle, Duration::ZERO);
        assert_eq!(cfg.timing.pose_sample_interval, Duration::from_millis(25));
        assert_eq!(cfg.timing.fast_iteration_wait, Duration::from_secs(1));
        assert_eq!(cfg.chessboard, ChessboardSpec::default());
        assert!(matches!(
            cfg.homography.method,
            HomographyMethod::Ransac { max_iterations: 200, .. }
        ));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{ "timing": { "align_settle": -1.0 } }"#;
        assert!(serde_json::from_str::<CalibrationConfig>(json).is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = CalibrationConfig::default();
        cfg.required_ids.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = CalibrationConfig::default();
        cfg.adaptive.min_step_mm = 30.0;
        let err = cfg.validate().expect_err("min > max");
        assert!(err.to_string().contains("min_step_mm"));

        let mut cfg = CalibrationConfig::default();
        cfg.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg.json");
        let mut cfg = CalibrationConfig::default();
        cfg.timing = TimingConfig::instant();
        cfg.write_json(&path).expect("write");
        assert_eq!(CalibrationConfig::load_json(&path).expect("load"), cfg);
    }
}
