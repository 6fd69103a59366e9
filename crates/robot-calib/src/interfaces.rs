//! Seams to the camera, the robot driver and the pattern detector.

use crate::config::ChessboardSpec;
use nalgebra::Point2;
use robot_calib_chessboard::ChessboardMetrics;
use robot_calib_core::Pose6;
use serde::{Deserialize, Serialize};

/// A camera frame as far as calibration is concerned.
pub trait Frame {
    /// `(width, height)` in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Image center with integer halving of the dimensions.
    fn image_center(&self) -> Point2<f64> {
        let (w, h) = self.dimensions();
        Point2::new((w / 2) as f64, (h / 2) as f64)
    }
}

impl Frame for robot_calib_core::GrayImage {
    fn dimensions(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }
}

#[cfg(feature = "image")]
impl Frame for ::image::GrayImage {
    fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

/// Latest-frame access to a camera that is driven elsewhere.
pub trait FrameSource {
    type Frame: Frame;

    /// Most recent frame, or `None` when nothing new is available yet.
    fn latest_frame(&mut self) -> Option<Self::Frame>;
}

/// Cartesian robot driver.
pub trait RobotDriver {
    fn current_position(&mut self) -> Pose6;

    /// Move to `target`; `0` means success, any other value is a failure code.
    fn move_to(&mut self, target: Pose6, blocking: bool) -> i32;

    /// Pose above the chessboard from which the run starts.
    fn calibration_reference_position(&self) -> Pose6;
}

/// Result of one chessboard search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChessboardDetection {
    /// `Some` exactly when the board was found.
    pub metrics: Option<ChessboardMetrics>,
    /// Inner corners, row-major from the top-left. Empty when not found.
    pub corners: Vec<Point2<f64>>,
    pub message: String,
}

impl ChessboardDetection {
    pub fn not_found() -> Self {
        Self {
            metrics: None,
            corners: Vec::new(),
            message: "Chessboard not detected".to_string(),
        }
    }

    /// Build from an ordered corner grid; not found when the grid is inconsistent with `spec`.
    pub fn from_corners(corners: Vec<Point2<f64>>, spec: &ChessboardSpec) -> Self {
        match ChessboardMetrics::compute(&corners, spec.cols, spec.rows, spec.square_size_mm) {
            Some(metrics) => Self {
                metrics: Some(metrics),
                corners,
                message: "Chessboard detected".to_string(),
            },
            None => Self::not_found(),
        }
    }

    #[inline]
    pub fn found(&self) -> bool {
        self.metrics.is_some()
    }

    pub fn ppm(&self) -> Option<f64> {
        self.metrics.map(|m| m.ppm)
    }

    pub fn bottom_left_px(&self) -> Option<Point2<f64>> {
        self.metrics.map(|m| m.bottom_left)
    }

    pub fn center_px(&self) -> Option<Point2<f64>> {
        self.metrics.map(|m| m.center)
    }
}

/// One detected ArUco marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerCorners {
    pub id: u32,
    /// Top-left, top-right, bottom-right, bottom-left in the marker's own frame.
    pub corners: [Point2<f64>; 4],
}

impl MarkerCorners {
    #[inline]
    pub fn top_left(&self) -> Point2<f64> {
        self.corners[0]
    }
}

/// Chessboard and marker detection on one frame type. Implementations are stateless.
pub trait PatternDetector {
    type Frame: Frame;

    fn find_chessboard(&self, frame: &Self::Frame, spec: &ChessboardSpec) -> ChessboardDetection;

    fn detect_markers(&self, frame: &Self::Frame) -> Vec<MarkerCorners>;
}
