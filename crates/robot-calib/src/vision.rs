//! Marker bookkeeping across frames.
//!
//! Positions are kept in two frames: raw pixels, and millimeters relative to
//! the chessboard's bottom-left inner corner. The millimeter frame keeps the
//! image orientation (x right, y down); it is not flipped to y-up.

use crate::config::ChessboardSpec;
use crate::interfaces::{ChessboardDetection, MarkerCorners, PatternDetector};
use log::debug;
use nalgebra::{Point2, Vector2};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one required-marker search.
#[derive(Clone, Debug, PartialEq)]
pub struct ArucoSearch {
    /// Whether every required id has been seen at least once this run.
    pub found_all: bool,
    /// All markers detected in this frame.
    pub detected: Vec<MarkerCorners>,
}

/// Outcome of a single-marker presence check.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerScan {
    pub found: bool,
    pub markers: Vec<MarkerCorners>,
}

#[derive(Clone, Debug, Default)]
pub struct CalibrationVision {
    required_ids: BTreeSet<u32>,
    ppm: Option<f64>,
    bottom_left_px: Option<Point2<f64>>,
    detected_ids: BTreeSet<u32>,
    marker_top_left_px: BTreeMap<u32, Point2<f64>>,
    marker_top_left_mm: BTreeMap<u32, Point2<f64>>,
}

impl CalibrationVision {
    pub fn new(required_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            required_ids: required_ids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Forget everything learned during a run; the required set is kept.
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.required_ids));
    }

    pub fn ppm(&self) -> Option<f64> {
        self.ppm
    }

    pub fn bottom_left_px(&self) -> Option<Point2<f64>> {
        self.bottom_left_px
    }

    pub fn required_ids(&self) -> &BTreeSet<u32> {
        &self.required_ids
    }

    pub fn detected_ids(&self) -> &BTreeSet<u32> {
        &self.detected_ids
    }

    pub fn missing_ids(&self) -> Vec<u32> {
        self.required_ids
            .difference(&self.detected_ids)
            .copied()
            .collect()
    }

    pub fn marker_top_left_px(&self, id: u32) -> Option<Point2<f64>> {
        self.marker_top_left_px.get(&id).copied()
    }

    pub fn marker_top_left_mm(&self, id: u32) -> Option<Point2<f64>> {
        self.marker_top_left_mm.get(&id).copied()
    }

    pub fn marker_top_left_px_all(&self) -> &BTreeMap<u32, Point2<f64>> {
        &self.marker_top_left_px
    }

    /// Set the board reference directly.
    pub fn set_reference(&mut self, ppm: f64, bottom_left_px: Point2<f64>) {
        self.ppm = Some(ppm);
        self.bottom_left_px = Some(bottom_left_px);
    }

    /// Search for the chessboard; on success the PPM and bottom-left corner become the reference.
    pub fn find_chessboard_and_compute_ppm<D: PatternDetector>(
        &mut self,
        detector: &D,
        frame: &D::Frame,
        spec: &ChessboardSpec,
    ) -> ChessboardDetection {
        let det = detector.find_chessboard(frame, spec);
        if let Some(m) = det.metrics {
            self.set_reference(m.ppm, m.bottom_left);
        }
        debug!("{}", det.message);
        det
    }

    /// Detect markers and record the top-left corner of every required one.
    ///
    /// Detections accumulate: an id seen in an earlier frame stays found.
    pub fn find_required_aruco_markers<D: PatternDetector>(
        &mut self,
        detector: &D,
        frame: &D::Frame,
    ) -> ArucoSearch {
        let detected = detector.detect_markers(frame);
        for m in &detected {
            if self.required_ids.contains(&m.id) {
                self.detected_ids.insert(m.id);
                self.marker_top_left_px.insert(m.id, m.top_left());
            }
        }

        let found_all = self.required_ids.is_subset(&self.detected_ids);
        debug!(
            "aruco search: have {:?}, missing {:?}",
            self.detected_ids,
            self.missing_ids()
        );
        ArucoSearch {
            found_all,
            detected,
        }
    }

    /// Presence check for one id; no state is touched.
    pub fn detect_specific_marker<D: PatternDetector>(
        &self,
        detector: &D,
        frame: &D::Frame,
        marker_id: u32,
    ) -> MarkerScan {
        let markers = detector.detect_markers(frame);
        let found = markers.iter().any(|m| m.id == marker_id);
        MarkerScan { found, markers }
    }

    /// Convert a pixel to board millimeters with the stored reference.
    pub fn px_to_mm(&self, px: Point2<f64>) -> Option<Point2<f64>> {
        let ppm = self.ppm?;
        let bl = self.bottom_left_px?;
        Some(Point2::from((px - bl) / ppm))
    }

    /// Refresh the stored position of `marker_id` from a detection batch.
    ///
    /// Returns `false` when the id is not in the batch. The millimeter value
    /// is only refreshed once a board reference exists.
    pub fn update_marker_top_left_corners(
        &mut self,
        marker_id: u32,
        markers: &[MarkerCorners],
    ) -> bool {
        let Some(m) = markers.iter().find(|m| m.id == marker_id) else {
            return false;
        };
        let px = m.top_left();
        self.marker_top_left_px.insert(marker_id, px);
        if let Some(mm) = self.px_to_mm(px) {
            self.marker_top_left_mm.insert(marker_id, mm);
        }
        true
    }

    /// Recompute millimeter positions for every recorded marker.
    pub fn convert_all_to_mm(&mut self) -> bool {
        let converted: Option<BTreeMap<u32, Point2<f64>>> = self
            .marker_top_left_px
            .iter()
            .map(|(&id, &px)| self.px_to_mm(px).map(|mm| (id, mm)))
            .collect();
        match converted {
            Some(mm) => {
                self.marker_top_left_mm = mm;
                true
            }
            None => false,
        }
    }

    /// Millimeter offset of every required marker from the image center.
    ///
    /// The image center is placed in the board frame with the unscaled PPM,
    /// then subtracted from each marker's millimeter position.
    pub fn marker_offsets_from_center(
        &self,
        image_center_px: Point2<f64>,
    ) -> Option<BTreeMap<u32, Vector2<f64>>> {
        let center_mm = self.px_to_mm(image_center_px)?;
        self.required_ids
            .iter()
            .map(|&id| {
                self.marker_top_left_mm
                    .get(&id)
                    .map(|mm| (id, *mm - center_mm))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::Frame;
    use approx::assert_abs_diff_eq;
    use std::cell::RefCell;

    struct Blank;

    impl Frame for Blank {
        fn dimensions(&self) -> (u32, u32) {
            (640, 480)
        }
    }

    /// Returns a scripted marker batch per call.
    struct Scripted {
        batches: RefCell<Vec<Vec<MarkerCorners>>>,
    }

    impl PatternDetector for Scripted {
        type Frame = Blank;

        fn find_chessboard(&self, _: &Blank, _: &ChessboardSpec) -> ChessboardDetection {
            ChessboardDetection::not_found()
        }

        fn detect_markers(&self, _: &Blank) -> Vec<MarkerCorners> {
            let mut b = self.batches.borrow_mut();
            if b.is_empty() {
                Vec::new()
            } else {
                b.remove(0)
            }
        }
    }

    fn marker(id: u32, x: f64, y: f64) -> MarkerCorners {
        MarkerCorners {
            id,
            corners: [
                Point2::new(x, y),
                Point2::new(x + 20.0, y),
                Point2::new(x + 20.0, y + 20.0),
                Point2::new(x, y + 20.0),
            ],
        }
    }

    #[test]
    fn detections_accumulate_across_frames() {
        let det = Scripted {
            batches: RefCell::new(vec![
                vec![marker(0, 10.0, 10.0), marker(7, 50.0, 50.0)],
                vec![marker(2, 30.0, 30.0)],
                vec![marker(1, 40.0, 10.0)],
            ]),
        };
        let mut v = CalibrationVision::new([0, 1, 2]);

        assert!(!v.find_required_aruco_markers(&det, &Blank).found_all);
        assert!(!v.find_required_aruco_markers(&det, &Blank).found_all);
        let last = v.find_required_aruco_markers(&det, &Blank);
        assert!(last.found_all);
        assert_eq!(last.detected.len(), 1);
        assert!(v.marker_top_left_px(7).is_none());
        assert_eq!(v.marker_top_left_px(0), Some(Point2::new(10.0, 10.0)));
        assert!(v.missing_ids().is_empty());

        // A frame with nothing in it does not un-find anything.
        assert!(v.find_required_aruco_markers(&det, &Blank).found_all);
    }

    #[test]
    fn update_converts_with_y_down_and_is_idempotent() {
        let mut v = CalibrationVision::new([3]);
        v.set_reference(2.0, Point2::new(100.0, 400.0));
        let batch = vec![marker(5, 0.0, 0.0), marker(3, 300.0, 200.0)];

        assert!(v.update_marker_top_left_corners(3, &batch));
        let first = (v.marker_top_left_px(3), v.marker_top_left_mm(3));
        assert!(v.update_marker_top_left_corners(3, &batch));
        assert_eq!((v.marker_top_left_px(3), v.marker_top_left_mm(3)), first);

        let mm = v.marker_top_left_mm(3).expect("mm");
        assert_abs_diff_eq!(mm.x, 100.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mm.y, -100.0, epsilon = 1e-12);

        assert!(!v.update_marker_top_left_corners(9, &batch));
    }

    #[test]
    fn offsets_from_center() {
        let mut v = CalibrationVision::new([0, 1]);
        v.set_reference(4.0, Point2::new(120.0, 360.0));
        v.update_marker_top_left_corners(0, &[marker(0, 320.0, 240.0)]);
        v.update_marker_top_left_corners(1, &[marker(1, 360.0, 200.0)]);

        let offsets = v
            .marker_offsets_from_center(Blank.image_center())
            .expect("offsets");
        assert_abs_diff_eq!(offsets[&0].x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(offsets[&0].y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(offsets[&1].x, 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(offsets[&1].y, -10.0, epsilon = 1e-12);
    }

    #[test]
    fn offsets_need_reference_and_all_markers() {
        let mut v = CalibrationVision::new([0, 1]);
        assert!(v.marker_offsets_from_center(Point2::new(0.0, 0.0)).is_none());
        v.set_reference(1.0, Point2::origin());
        v.update_marker_top_left_corners(0, &[marker(0, 1.0, 1.0)]);
        assert!(v.marker_offsets_from_center(Point2::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn specific_marker_scan_leaves_state_alone() {
        let det = Scripted {
            batches: RefCell::new(vec![vec![marker(4, 1.0, 2.0)]]),
        };
        let v = CalibrationVision::new([4]);
        let scan = v.detect_specific_marker(&det, &Blank, 4);
        assert!(scan.found);
        assert!(v.detected_ids().is_empty());
        assert!(v.marker_top_left_px(4).is_none());
    }
}
