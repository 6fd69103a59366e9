use crate::axis_mapping::ImageToRobotMapping;
use crate::config::CalibrationConfig;
use nalgebra::{Point2, Vector2};
use robot_calib_core::Pose6;
use std::collections::BTreeMap;

/// Everything a run accumulates. Written only by the state machine.
#[derive(Clone, Debug, Default)]
pub struct CalibrationContext {
    /// Ascending, deduplicated.
    pub required_ids: Vec<u32>,
    /// Index into `required_ids` of the marker being aligned.
    pub current_marker: usize,
    /// Fine-loop iterations spent on the current marker.
    pub iteration_count: u32,
    pub mapping: Option<ImageToRobotMapping>,
    /// Robot Z while the board was measured.
    pub z_current: Option<f64>,
    /// `z_current / z_target`; applied to the PPM in the fine loop only.
    pub ppm_scale: Option<f64>,
    pub image_center_px: Option<Point2<f64>>,
    pub marker_offsets_mm: BTreeMap<u32, Vector2<f64>>,
    /// Marker top-left pixels seen from the reference pose.
    pub camera_points: BTreeMap<u32, Point2<f64>>,
    /// Robot poses that centered each marker.
    pub robot_positions: BTreeMap<u32, Pose6>,
    pub last_recorded_pose: Option<Pose6>,
}

impl CalibrationContext {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            required_ids: config.sorted_required_ids(),
            ..Self::default()
        }
    }

    pub fn current_marker_id(&self) -> Option<u32> {
        self.required_ids.get(self.current_marker).copied()
    }

    pub fn total_markers(&self) -> usize {
        self.required_ids.len()
    }

    pub fn successful_markers(&self) -> usize {
        self.robot_positions.len()
    }

    pub fn is_last_marker(&self) -> bool {
        self.current_marker + 1 >= self.required_ids.len()
    }

    pub fn record_position(&mut self, marker_id: u32, pose: Pose6) {
        self.robot_positions.insert(marker_id, pose);
        self.last_recorded_pose = Some(pose);
    }
}
