//! Simulated rig: an eye-in-hand camera looking down at a planar scene.
//!
//! The camera sits at the tool XY (plus a fixed offset) and images the plane
//! through a scaled signed-permutation model:
//!
//! `pixel = center + ppm(z) * A * (world - (tool_xy + offset))`, with
//! `ppm(z) = ppm_ref * z_ref / z`.
//!
//! Robot, camera and detector share one state so that every frame reflects
//! the pose the robot actually reached.

use crate::config::ChessboardSpec;
use crate::interfaces::{ChessboardDetection, Frame, FrameSource, MarkerCorners, PatternDetector, RobotDriver};
use nalgebra::{Matrix2, Point2, Vector2};
use robot_calib_core::Pose6;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Static scene description.
#[derive(Clone, Debug, PartialEq)]
pub struct SimScene {
    pub width: u32,
    pub height: u32,
    /// Pixels per millimeter at `reference_pose.z`.
    pub ppm_ref: f64,
    pub reference_pose: Pose6,
    /// Signed permutation from world axes to image axes.
    pub axes: Matrix2<f64>,
    pub camera_offset: Vector2<f64>,
    pub chessboard: ChessboardSpec,
    /// World position of the top-left inner corner.
    pub board_origin: Point2<f64>,
    pub marker_size_mm: f64,
    /// World position of each marker's top-left corner.
    pub markers: BTreeMap<u32, Point2<f64>>,
}

impl Default for SimScene {
    /// 640x480 camera, 1 px/mm at z = 400, mounted rotated so that robot X
    /// runs along image -y and robot Y along image -x. Markers 0..=3 spread
    /// around the board, marker 4 near the center for axis mapping.
    fn default() -> Self {
        let mut scene = Self {
            width: 640,
            height: 480,
            ppm_ref: 1.0,
            reference_pose: Pose6::new(250.0, 0.0, 400.0, 180.0, 0.0, 0.0),
            axes: Matrix2::new(0.0, -1.0, -1.0, 0.0),
            camera_offset: Vector2::zeros(),
            chessboard: ChessboardSpec::default(),
            board_origin: Point2::origin(),
            marker_size_mm: 30.0,
            markers: BTreeMap::new(),
        };
        scene.board_origin = scene.world_at_reference(Point2::new(120.0, 300.0));
        for (id, u, v) in [
            (0, 60.0, 60.0),
            (1, 520.0, 60.0),
            (2, 500.0, 330.0),
            (3, 380.0, 150.0),
            (4, 300.0, 180.0),
        ] {
            let world = scene.world_at_reference(Point2::new(u, v));
            scene.markers.insert(id, world);
        }
        scene
    }
}

impl SimScene {
    pub fn ppm_at(&self, z: f64) -> f64 {
        self.ppm_ref * self.reference_pose.z / z
    }

    fn center(&self) -> Point2<f64> {
        Point2::new((self.width / 2) as f64, (self.height / 2) as f64)
    }

    fn camera_xy(&self, pose: &Pose6) -> Point2<f64> {
        pose.xy() + self.camera_offset
    }

    pub fn project(&self, world: Point2<f64>, pose: &Pose6) -> Point2<f64> {
        let rel = world - self.camera_xy(pose);
        self.center() + self.axes * rel * self.ppm_at(pose.z)
    }

    /// World point imaged at `px` from the reference pose.
    pub fn world_at_reference(&self, px: Point2<f64>) -> Point2<f64> {
        let pose = self.reference_pose;
        let rel = self.axes.transpose() * (px - self.center()) / self.ppm_at(pose.z);
        self.camera_xy(&pose) + rel
    }

    /// Tool XY that puts marker `id`'s top-left corner on the optical axis.
    pub fn centering_xy(&self, id: u32) -> Option<Point2<f64>> {
        self.markers.get(&id).map(|w| w - self.camera_offset)
    }

    /// World point at image-aligned offset `(du, dv)` mm from `origin`.
    fn along_image(&self, origin: Point2<f64>, du: f64, dv: f64) -> Point2<f64> {
        origin + self.axes.transpose() * Vector2::new(du, dv)
    }

    fn visible(&self, px: &Point2<f64>) -> bool {
        px.x >= 0.0 && px.y >= 0.0 && px.x < self.width as f64 && px.y < self.height as f64
    }

    /// Inner corners row-major from the top-left, or `None` when any is out of view.
    pub fn chessboard_px(&self, pose: &Pose6) -> Option<Vec<Point2<f64>>> {
        let spec = &self.chessboard;
        let sq = spec.square_size_mm;
        let corners: Vec<Point2<f64>> = (0..spec.rows)
            .flat_map(|r| (0..spec.cols).map(move |c| (r, c)))
            .map(|(r, c)| {
                let w = self.along_image(self.board_origin, c as f64 * sq, r as f64 * sq);
                self.project(w, pose)
            })
            .collect();
        corners.iter().all(|p| self.visible(p)).then_some(corners)
    }

    /// Fully visible markers with TL, TR, BR, BL corners.
    pub fn markers_px(&self, pose: &Pose6) -> Vec<MarkerCorners> {
        let s = self.marker_size_mm;
        self.markers
            .iter()
            .filter_map(|(&id, &tl)| {
                let corners = [(0.0, 0.0), (s, 0.0), (s, s), (0.0, s)]
                    .map(|(du, dv)| self.project(self.along_image(tl, du, dv), pose));
                corners
                    .iter()
                    .all(|p| self.visible(p))
                    .then_some(MarkerCorners { id, corners })
            })
            .collect()
    }
}

/// A rendered view: the scene as seen from `pose`.
#[derive(Clone, Debug, PartialEq)]
pub struct SimFrame {
    pub width: u32,
    pub height: u32,
    pub pose: Pose6,
}

impl Frame for SimFrame {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// One `move_to` call as seen by the simulated driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveRecord {
    pub target: Pose6,
    pub blocking: bool,
    pub code: i32,
}

#[derive(Debug)]
struct SimState {
    pose: Pose6,
    gain: f64,
    failing_calls: BTreeSet<usize>,
    frozen_after: Option<usize>,
    moves: Vec<MoveRecord>,
    empty_frames: usize,
    frames_served: usize,
}

/// Shared simulation state; hands out the robot, camera and detector.
#[derive(Clone, Debug)]
pub struct SimRig {
    scene: Arc<SimScene>,
    state: Arc<Mutex<SimState>>,
}

impl Default for SimRig {
    fn default() -> Self {
        Self::new(SimScene::default())
    }
}

impl SimRig {
    pub fn new(scene: SimScene) -> Self {
        let state = SimState {
            pose: scene.reference_pose,
            gain: 1.0,
            failing_calls: BTreeSet::new(),
            frozen_after: None,
            moves: Vec::new(),
            empty_frames: 0,
            frames_served: 0,
        };
        Self {
            scene: Arc::new(scene),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Fraction of each commanded XY displacement actually travelled.
    pub fn with_actuation_gain(self, gain: f64) -> Self {
        self.lock().gain = gain;
        self
    }

    /// Make the given `move_to` calls (0-based, in call order) fail with code `-1`.
    pub fn with_failing_moves(self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.lock().failing_calls.extend(calls);
        self
    }

    /// After `n` calls, moves report success without moving.
    pub fn frozen_after_moves(self, n: usize) -> Self {
        self.lock().frozen_after = Some(n);
        self
    }

    /// Put the robot somewhere other than the reference pose before the run.
    pub fn with_start_pose(self, pose: Pose6) -> Self {
        self.lock().pose = pose;
        self
    }

    /// The camera returns `None` for its first `n` polls.
    pub fn with_leading_empty_frames(self, n: usize) -> Self {
        self.lock().empty_frames = n;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scene(&self) -> &SimScene {
        &self.scene
    }

    pub fn pose(&self) -> Pose6 {
        self.lock().pose
    }

    pub fn moves(&self) -> Vec<MoveRecord> {
        self.lock().moves.clone()
    }

    pub fn frames_served(&self) -> usize {
        self.lock().frames_served
    }

    pub fn robot(&self) -> SimRobot {
        SimRobot { rig: self.clone() }
    }

    pub fn camera(&self) -> SimCamera {
        SimCamera { rig: self.clone() }
    }

    pub fn detector(&self) -> SimDetector {
        SimDetector {
            scene: self.scene.clone(),
        }
    }
}

pub struct SimRobot {
    rig: SimRig,
}

impl RobotDriver for SimRobot {
    fn current_position(&mut self) -> Pose6 {
        self.rig.pose()
    }

    fn move_to(&mut self, target: Pose6, blocking: bool) -> i32 {
        let mut s = self.rig.lock();
        let call = s.moves.len();
        let code = if s.failing_calls.contains(&call) { -1 } else { 0 };
        let frozen = s.frozen_after.is_some_and(|n| call >= n);
        if code == 0 && !frozen {
            let g = s.gain;
            let from = s.pose;
            s.pose = Pose6 {
                x: from.x + g * (target.x - from.x),
                y: from.y + g * (target.y - from.y),
                ..target
            };
        }
        s.moves.push(MoveRecord {
            target,
            blocking,
            code,
        });
        code
    }

    fn calibration_reference_position(&self) -> Pose6 {
        self.rig.scene.reference_pose
    }
}

pub struct SimCamera {
    rig: SimRig,
}

impl FrameSource for SimCamera {
    type Frame = SimFrame;

    fn latest_frame(&mut self) -> Option<SimFrame> {
        let mut s = self.rig.lock();
        if s.empty_frames > 0 {
            s.empty_frames -= 1;
            return None;
        }
        s.frames_served += 1;
        Some(SimFrame {
            width: self.rig.scene.width,
            height: self.rig.scene.height,
            pose: s.pose,
        })
    }
}

/// Exact detections computed from the scene geometry.
pub struct SimDetector {
    scene: Arc<SimScene>,
}

impl PatternDetector for SimDetector {
    type Frame = SimFrame;

    fn find_chessboard(&self, frame: &SimFrame, spec: &ChessboardSpec) -> ChessboardDetection {
        match self.scene.chessboard_px(&frame.pose) {
            Some(corners) => ChessboardDetection::from_corners(corners, spec),
            None => ChessboardDetection::not_found(),
        }
    }

    fn detect_markers(&self, frame: &SimFrame) -> Vec<MarkerCorners> {
        self.scene.markers_px(&frame.pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn reference_view_shows_board_and_all_markers() {
        let scene = SimScene::default();
        let pose = scene.reference_pose;
        let board = scene.chessboard_px(&pose).expect("board visible");
        assert_abs_diff_eq!(board[0].x, 120.0, epsilon = 1e-9);
        assert_abs_diff_eq!(board[0].y, 300.0, epsilon = 1e-9);
        assert_abs_diff_eq!(board[1].x, 145.0, epsilon = 1e-9);

        let markers = scene.markers_px(&pose);
        assert_eq!(markers.iter().map(|m| m.id).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_abs_diff_eq!(markers[3].corners[0].x, 380.0, epsilon = 1e-9);
        assert_abs_diff_eq!(markers[3].corners[2].y, 180.0, epsilon = 1e-9);
    }

    #[test]
    fn centering_pose_puts_marker_on_image_center() {
        let scene = SimScene::default();
        let xy = scene.centering_xy(2).expect("marker 2");
        let pose = Pose6::new(xy.x, xy.y, 300.0, 180.0, 0.0, 0.0);
        let m = scene
            .markers_px(&pose)
            .into_iter()
            .find(|m| m.id == 2)
            .expect("visible");
        assert_abs_diff_eq!(m.corners[0].x, 320.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.corners[0].y, 240.0, epsilon = 1e-9);
        // 30 mm at 4/3 px/mm
        assert_abs_diff_eq!(m.corners[1].x - m.corners[0].x, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn robot_applies_gain_failures_and_freeze() {
        let rig = SimRig::default()
            .with_actuation_gain(0.5)
            .with_failing_moves([1])
            .frozen_after_moves(3);
        let mut robot = rig.robot();
        let start = rig.pose();

        assert_eq!(robot.move_to(start.translated(10.0, 0.0), true), 0);
        assert_abs_diff_eq!(rig.pose().x, start.x + 5.0, epsilon = 1e-12);
        assert_eq!(robot.move_to(start, true), -1);
        assert_abs_diff_eq!(rig.pose().x, start.x + 5.0, epsilon = 1e-12);
        assert_eq!(robot.move_to(start, false), 0);
        assert_eq!(robot.move_to(start.translated(100.0, 0.0), true), 0);
        assert_abs_diff_eq!(rig.pose().x, start.x + 2.5, epsilon = 1e-12);
        assert_eq!(rig.moves().len(), 4);
        assert!(!rig.moves()[2].blocking);
    }

    #[test]
    fn start_pose_overrides_reference() {
        let start = SimScene::default().reference_pose.translated(15.0, -5.0);
        let rig = SimRig::default().with_start_pose(start);
        assert_eq!(rig.pose(), start);
        assert_eq!(rig.robot().calibration_reference_position(), rig.scene().reference_pose);
    }

    #[test]
    fn camera_skips_leading_frames() {
        let rig = SimRig::default().with_leading_empty_frames(2);
        let mut cam = rig.camera();
        assert!(cam.latest_frame().is_none());
        assert!(cam.latest_frame().is_none());
        let frame = cam.latest_frame().expect("frame");
        assert_eq!(frame.image_center(), Point2::new(320.0, 240.0));
        assert_eq!(rig.frames_served(), 1);
    }
}
