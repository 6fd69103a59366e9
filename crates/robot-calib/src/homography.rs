//! Camera-to-robot homography: fit, acceptance gate and persistence.
//!
//! The matrix maps a pixel seen from the calibration reference pose to the
//! robot XY (mm) that centers the camera on it. Correspondences are always
//! paired by marker id in ascending order.

use crate::config::{HomographyConfig, OutputConfig};
use crate::error::CalibrationError;
use log::{info, warn};
use nalgebra::Point2;
use robot_calib_core::{estimate_homography, reprojection_errors, Homography, Pose6};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// One marker's correspondence and its residual.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub marker_id: u32,
    pub camera_point: Point2<f64>,
    pub transformed_point: Point2<f64>,
    pub robot_point: Point2<f64>,
    pub error_mm: f64,
    pub inlier: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HomographyResult {
    pub homography: Homography,
    pub points: Vec<CalibrationPoint>,
    pub mean_error_mm: f64,
}

impl HomographyResult {
    pub fn max_error_mm(&self) -> f64 {
        self.points.iter().map(|p| p.error_mm).fold(0.0, f64::max)
    }

    /// Whether the mean error passes the gate (`<=`).
    #[inline]
    pub fn accepted(&self, max_mean_error_mm: f64) -> bool {
        self.mean_error_mm <= max_mean_error_mm
    }
}

/// Pair camera and robot points by ascending marker id.
///
/// Every required id must be present on both sides.
pub fn correspondences(
    required_ids: &[u32],
    camera_points: &BTreeMap<u32, Point2<f64>>,
    robot_positions: &BTreeMap<u32, Pose6>,
) -> Result<(Vec<u32>, Vec<Point2<f64>>, Vec<Point2<f64>>), CalibrationError> {
    let mut ids: Vec<u32> = required_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut missing = Vec::new();
    let mut camera = Vec::with_capacity(ids.len());
    let mut robot = Vec::with_capacity(ids.len());
    for &id in &ids {
        match (camera_points.get(&id), robot_positions.get(&id)) {
            (Some(c), Some(r)) => {
                camera.push(*c);
                robot.push(r.xy());
            }
            (c, r) => {
                if c.is_none() {
                    missing.push(format!("camera point for marker {id}"));
                }
                if r.is_none() {
                    missing.push(format!("robot position for marker {id}"));
                }
            }
        }
    }
    if !missing.is_empty() {
        return Err(CalibrationError::MissingCalibrationData { missing });
    }
    Ok((ids, camera, robot))
}

/// Fit the homography and evaluate every correspondence.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all, fields(n = required_ids.len())))]
pub fn compute_homography(
    required_ids: &[u32],
    camera_points: &BTreeMap<u32, Point2<f64>>,
    robot_positions: &BTreeMap<u32, Pose6>,
    config: &HomographyConfig,
) -> Result<HomographyResult, CalibrationError> {
    let (ids, camera, robot) = correspondences(required_ids, camera_points, robot_positions)?;
    let fit = estimate_homography(&camera, &robot, config.method)?;
    let errors = reprojection_errors(&fit.homography, &camera, &robot);

    let points: Vec<CalibrationPoint> = ids
        .iter()
        .zip(camera.iter().zip(&robot))
        .zip(errors.iter().zip(&fit.status))
        .map(|((&marker_id, (c, r)), (&error_mm, &status))| CalibrationPoint {
            marker_id,
            camera_point: *c,
            transformed_point: fit.homography.apply(*c),
            robot_point: *r,
            error_mm,
            inlier: status != 0,
        })
        .collect();
    let mean_error_mm = errors.iter().sum::<f64>() / errors.len() as f64;

    Ok(HomographyResult {
        homography: fit.homography,
        points,
        mean_error_mm,
    })
}

#[derive(Serialize, Deserialize)]
struct MatrixFile {
    matrix: Homography,
}

#[derive(Serialize)]
struct MatrixMeta {
    mean_error_mm: f64,
    timestamp_unix_s: f64,
    points: usize,
}

#[derive(Serialize)]
struct PointReport<'a> {
    calibration_points: &'a [CalibrationPoint],
    average_error_mm: f64,
}

/// `<matrix_path>.meta.json`
pub fn sidecar_path(matrix_path: &Path) -> PathBuf {
    let mut s = matrix_path.as_os_str().to_owned();
    s.push(".meta.json");
    PathBuf::from(s)
}

/// Apply the acceptance gate; write the matrix and its sidecar only when it passes.
///
/// The optional per-point report is written either way. Returns whether the
/// matrix was persisted.
pub fn persist_if_accepted(
    result: &HomographyResult,
    max_mean_error_mm: f64,
    output: &OutputConfig,
) -> Result<bool, CalibrationError> {
    if let Some(path) = &output.report_path {
        let report = PointReport {
            calibration_points: &result.points,
            average_error_mm: result.mean_error_mm,
        };
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }

    if !result.accepted(max_mean_error_mm) {
        warn!(
            "High reprojection error ({:.3} mm > {:.3} mm), recalibration suggested; matrix not saved",
            result.mean_error_mm, max_mean_error_mm
        );
        return Ok(false);
    }

    save_homography(&output.matrix_path, &result.homography)?;
    let timestamp_unix_s = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let meta = MatrixMeta {
        mean_error_mm: result.mean_error_mm,
        timestamp_unix_s,
        points: result.points.len(),
    };
    std::fs::write(
        sidecar_path(&output.matrix_path),
        serde_json::to_string_pretty(&meta)?,
    )?;
    info!(
        "homography saved to {} (mean error {:.4} mm)",
        output.matrix_path.display(),
        result.mean_error_mm
    );
    Ok(true)
}

pub fn save_homography(path: impl AsRef<Path>, h: &Homography) -> Result<(), CalibrationError> {
    let json = serde_json::to_string_pretty(&MatrixFile { matrix: *h })?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_homography(path: impl AsRef<Path>) -> Result<Homography, CalibrationError> {
    let data = std::fs::read_to_string(path)?;
    let file: MatrixFile = serde_json::from_str(&data)?;
    Ok(file.matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use robot_calib_core::HomographyMethod;

    fn scene() -> (Vec<u32>, BTreeMap<u32, Point2<f64>>, BTreeMap<u32, Pose6>) {
        // robot = (-0.5 * v + 400, -0.5 * u + 300)
        let px = [(100.0, 80.0), (540.0, 90.0), (530.0, 400.0), (110.0, 390.0), (320.0, 240.0)];
        let mut cam = BTreeMap::new();
        let mut rob = BTreeMap::new();
        for (id, &(u, v)) in [4u32, 0, 3, 1, 2].iter().zip(&px) {
            cam.insert(*id, Point2::new(u, v));
            rob.insert(*id, Pose6::new(-0.5 * v + 400.0, -0.5 * u + 300.0, 300.0, 180.0, 0.0, 0.0));
        }
        (vec![3, 1, 0, 2, 4], cam, rob)
    }

    #[test]
    fn pairs_by_ascending_id() {
        let (ids, cam, rob) = scene();
        let (sorted, c, r) = correspondences(&ids, &cam, &rob).expect("pairs");
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
        assert_eq!(c[0], cam[&0]);
        assert_eq!(r[4], rob[&4].xy());
    }

    #[test]
    fn missing_marker_is_reported() {
        let (ids, cam, mut rob) = scene();
        rob.remove(&2);
        let err = correspondences(&ids, &cam, &rob).expect_err("missing");
        assert!(err.to_string().contains("robot position for marker 2"));
    }

    #[test]
    fn exact_scene_fits_with_zero_error() {
        let (ids, cam, rob) = scene();
        let res = compute_homography(&ids, &cam, &rob, &HomographyConfig::default()).expect("fit");
        assert!(res.mean_error_mm < 1e-6);
        assert!(res.points.iter().all(|p| p.inlier));
        let mapped = res.homography.apply(Point2::new(320.0, 240.0));
        assert_abs_diff_eq!(mapped.x, 280.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mapped.y, 140.0, epsilon = 1e-6);
    }

    #[test]
    fn ransac_flags_outlier() {
        let (mut ids, mut cam, mut rob) = scene();
        for (id, u, v) in [(5u32, 200.0, 300.0), (6, 450.0, 150.0)] {
            ids.push(id);
            cam.insert(id, Point2::new(u, v));
            rob.insert(id, Pose6::new(-0.5 * v + 400.0, -0.5 * u + 300.0, 300.0, 0.0, 0.0, 0.0));
        }
        rob.get_mut(&6).expect("id 6").x += 40.0;
        let config = HomographyConfig {
            method: HomographyMethod::Ransac {
                reproj_threshold: 2.0,
                max_iterations: 500,
            },
            ..HomographyConfig::default()
        };
        let res = compute_homography(&ids, &cam, &rob, &config).expect("fit");
        let outlier = res.points.iter().find(|p| p.marker_id == 6).expect("point");
        assert!(!outlier.inlier);
        assert!(outlier.error_mm > 30.0);
    }

    fn result_with_mean(mean: f64) -> HomographyResult {
        HomographyResult {
            homography: Homography::identity(),
            points: Vec::new(),
            mean_error_mm: mean,
        }
    }

    #[test]
    fn gate_accepts_exactly_one_millimeter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = OutputConfig {
            matrix_path: dir.path().join("m.json"),
            report_path: None,
        };
        assert!(persist_if_accepted(&result_with_mean(1.0), 1.0, &output).expect("persist"));
        assert!(output.matrix_path.exists());
        assert!(sidecar_path(&output.matrix_path).exists());
        assert_eq!(
            load_homography(&output.matrix_path).expect("load"),
            Homography::identity()
        );
    }

    #[test]
    fn gate_rejects_just_above_one_millimeter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = OutputConfig {
            matrix_path: dir.path().join("m.json"),
            report_path: Some(dir.path().join("report.json")),
        };
        assert!(!persist_if_accepted(&result_with_mean(1.001), 1.0, &output).expect("persist"));
        assert!(!output.matrix_path.exists());
        assert!(!sidecar_path(&output.matrix_path).exists());
        let report = std::fs::read_to_string(dir.path().join("report.json")).expect("report");
        assert!(report.contains("\"average_error_mm\": 1.001"));
    }
}
