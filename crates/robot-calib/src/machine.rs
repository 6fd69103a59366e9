//! The calibration state machine.
//!
//! One handler per state, each returning the next state. Handlers before
//! ALIGN_ROBOT retry by re-entering themselves; from ALIGN_ROBOT on every
//! failure goes to ERROR with a diagnostic. ERROR and the final DONE are
//! sinks.

use crate::adaptive::{average_pose, AdaptiveMovementController};
use crate::axis_mapping::{CoordinateMapper, ImageToRobotMapping};
use crate::capture::{flush, settle, wait_for_frame};
use crate::config::CalibrationConfig;
use crate::context::CalibrationContext;
use crate::error::CalibrationError;
use crate::event::{CalibrationEvent, CallbackId, ErrorReport, Observers};
use crate::homography::{compute_homography, persist_if_accepted, HomographyResult};
use crate::interfaces::{Frame, FrameSource, PatternDetector, RobotDriver};
use crate::state::{CalibrationState, StateKind};
use crate::timing::{StateTimings, TimingReport};
use crate::vision::CalibrationVision;
use log::{debug, error, info, warn};
use nalgebra::{Point2, Vector2};
use robot_calib_core::Pose6;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Result of a completed run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub homography: HomographyResult,
    /// Whether the matrix passed the gate and was written.
    pub persisted: bool,
    pub mapping: Option<ImageToRobotMapping>,
    pub robot_positions: BTreeMap<u32, Pose6>,
    pub camera_points: BTreeMap<u32, Point2<f64>>,
    pub timing: TimingReport,
}

fn missing(what: &str) -> CalibrationError {
    CalibrationError::MissingCalibrationData {
        missing: vec![what.to_string()],
    }
}

type Handled = Result<CalibrationState, CalibrationError>;

pub struct CalibrationStateMachine<S, R, D>
where
    S: FrameSource,
    R: RobotDriver,
    D: PatternDetector<Frame = S::Frame>,
{
    config: CalibrationConfig,
    camera: S,
    robot: R,
    detector: D,
    vision: CalibrationVision,
    context: CalibrationContext,
    controller: AdaptiveMovementController,
    state: CalibrationState,
    finished: bool,
    timings: StateTimings,
    observers: Observers<S::Frame>,
}

impl<S, R, D> CalibrationStateMachine<S, R, D>
where
    S: FrameSource,
    R: RobotDriver,
    D: PatternDetector<Frame = S::Frame>,
{
    pub fn new(config: CalibrationConfig, camera: S, robot: R, detector: D) -> Self {
        let context = CalibrationContext::new(&config);
        let vision = CalibrationVision::new(context.required_ids.iter().copied());
        let controller =
            AdaptiveMovementController::new(config.adaptive.clone(), config.adaptive_target_mm());
        Self {
            config,
            camera,
            robot,
            detector,
            vision,
            context,
            controller,
            state: CalibrationState::Initializing,
            finished: false,
            timings: StateTimings::default(),
            observers: Observers::default(),
        }
    }

    /// Register a callback for calibration events
    pub fn register_callback<C>(&mut self, callback: C) -> CallbackId
    where
        C: Fn(&CalibrationEvent<S::Frame>) + Send + Sync + 'static,
    {
        self.observers.register(callback)
    }

    /// Deregister a callback
    pub fn deregister_callback(&mut self, id: CallbackId) -> bool {
        self.observers.deregister(id)
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn context(&self) -> &CalibrationContext {
        &self.context
    }

    pub fn vision(&self) -> &CalibrationVision {
        &self.vision
    }

    pub fn timings(&self) -> &StateTimings {
        &self.timings
    }

    pub fn robot(&self) -> &R {
        &self.robot
    }

    /// ERROR, or DONE after the last marker.
    pub fn is_terminal(&self) -> bool {
        match self.state {
            CalibrationState::Error(_) => true,
            CalibrationState::Done => self.finished,
            _ => false,
        }
    }

    /// Structured diagnostic for `err` at the current position in the run.
    pub fn error_report(&self, err: &CalibrationError) -> ErrorReport {
        ErrorReport {
            status: "error".to_string(),
            message: err.to_string(),
            current_marker: self.context.current_marker,
            total_markers: self.context.total_markers(),
            successful_markers: self.context.successful_markers(),
            iteration_count: self.context.iteration_count,
            max_iterations: self.config.max_iterations,
        }
    }

    /// Run the handler of the current state once and return the new state.
    ///
    /// A terminal machine is left untouched.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(state = %self.state.kind()))
    )]
    pub fn step(&mut self) -> StateKind {
        if self.is_terminal() {
            return self.state.kind();
        }
        if self.timings.current().is_none() {
            self.timings.enter(self.state.kind());
        }

        let handled = match self.state.kind() {
            StateKind::Initializing => self.handle_initializing(),
            StateKind::AxisMapping => self.handle_axis_mapping(),
            StateKind::LookingForChessboard => self.handle_looking_for_chessboard(),
            StateKind::ChessboardFound => self.handle_chessboard_found(),
            StateKind::LookingForArucoMarkers => self.handle_looking_for_aruco_markers(),
            StateKind::AllArucoFound => self.handle_all_aruco_found(),
            StateKind::ComputeOffsets => self.handle_compute_offsets(),
            StateKind::AlignRobot => self.handle_align_robot(),
            StateKind::IterateAlignment => self.handle_iterate_alignment(),
            StateKind::Done => self.handle_done(),
            StateKind::Error => return StateKind::Error,
        };
        let next = handled.unwrap_or_else(CalibrationState::Error);
        self.transition(next);
        self.state.kind()
    }

    /// Step until terminal, then fit and persist the homography.
    ///
    /// The timing report is logged whether the run succeeds or not.
    pub fn run(&mut self) -> Result<CalibrationOutcome, CalibrationError> {
        while !self.is_terminal() {
            self.step();
        }
        self.timings.exit();
        let timing = self.timings.report();
        timing.log();

        if let CalibrationState::Error(e) = &self.state {
            return Err(e.clone());
        }
        self.finish(timing).inspect_err(|e| {
            self.transition(CalibrationState::Error(e.clone()));
            self.timings.exit();
        })
    }

    fn finish(&self, timing: TimingReport) -> Result<CalibrationOutcome, CalibrationError> {
        let ctx = &self.context;
        let homography = compute_homography(
            &ctx.required_ids,
            &ctx.camera_points,
            &ctx.robot_positions,
            &self.config.homography,
        )?;
        for p in &homography.points {
            debug!(
                "marker {}: camera ({:.2}, {:.2}) -> ({:.3}, {:.3}), robot ({:.3}, {:.3}), error {:.4} mm",
                p.marker_id,
                p.camera_point.x,
                p.camera_point.y,
                p.transformed_point.x,
                p.transformed_point.y,
                p.robot_point.x,
                p.robot_point.y,
                p.error_mm
            );
        }
        info!(
            "homography: mean reprojection error {:.4} mm, max {:.4} mm",
            homography.mean_error_mm,
            homography.max_error_mm()
        );

        let persisted = persist_if_accepted(
            &homography,
            self.config.homography.max_mean_error_mm,
            &self.config.output,
        )?;
        self.observers.emit(&CalibrationEvent::Completed {
            mean_error_mm: homography.mean_error_mm,
            persisted,
        });

        Ok(CalibrationOutcome {
            homography,
            persisted,
            mapping: self.context.mapping,
            robot_positions: self.context.robot_positions.clone(),
            camera_points: self.context.camera_points.clone(),
            timing,
        })
    }

    fn transition(&mut self, next: CalibrationState) {
        let from = self.state.kind();
        let to = next.kind();
        self.timings.exit();

        if let CalibrationState::Error(err) = &next {
            let report = self.error_report(err);
            error!("CALIBRATION FAILED: {}", report.message);
            error!(
                "calibration context: marker index {}/{}, iteration {}/{}, markers calibrated {}",
                report.current_marker,
                report.total_markers,
                report.iteration_count,
                report.max_iterations,
                report.successful_markers
            );
            self.observers.emit(&CalibrationEvent::Stopped { report });
        }
        if from != to {
            info!("{from} -> {to}");
            self.observers
                .emit(&CalibrationEvent::StateChanged { from, to });
        }

        self.state = next;
        self.timings.enter(to);
    }

    fn current_marker_id(&self) -> Result<u32, CalibrationError> {
        self.context
            .current_marker_id()
            .ok_or_else(|| missing("current marker"))
    }

    fn mapping(&self) -> Result<ImageToRobotMapping, CalibrationError> {
        self.context.mapping.ok_or_else(|| missing("axis mapping"))
    }

    fn handle_initializing(&mut self) -> Handled {
        self.config.validate()?;
        self.context = CalibrationContext::new(&self.config);
        self.vision.reset();
        self.controller.reset();

        info!(
            "starting calibration: markers {:?}, z target {:.1} mm, threshold {} mm",
            self.context.required_ids, self.config.z_target, self.config.alignment_threshold_mm
        );
        self.observers.emit(&CalibrationEvent::Started {
            total_markers: self.context.total_markers(),
        });

        // Mapping, board scale and marker pixels are all measured from here.
        let reference = self.robot.calibration_reference_position();
        info!("moving to calibration reference position {reference}");
        let code = self.robot.move_to(reference, true);
        if code != 0 {
            return Err(CalibrationError::ReferenceMoveFailed {
                target: reference,
                code,
            });
        }
        settle(self.config.timing.align_settle);
        Ok(CalibrationState::AxisMapping)
    }

    fn handle_axis_mapping(&mut self) -> Handled {
        let mapper =
            CoordinateMapper::new(&self.config.axis_mapping, self.config.timing.frame_poll_interval);
        let report = mapper.discover(&mut self.camera, &mut self.robot, &self.detector)?;

        let ppm_scale = report.z_current / self.config.z_target;
        self.context.mapping = Some(report.mapping);
        self.context.z_current = Some(report.z_current);
        self.context.ppm_scale = Some(ppm_scale);
        info!(
            "z current {:.1} mm, z target {:.1} mm, ppm scale {ppm_scale:.4}",
            report.z_current, self.config.z_target
        );
        self.observers.emit(&CalibrationEvent::AxisMappingDiscovered {
            mapping: report.mapping,
            z_current: report.z_current,
        });
        Ok(CalibrationState::LookingForChessboard)
    }

    fn handle_looking_for_chessboard(&mut self) -> Handled {
        let frame = wait_for_frame(&mut self.camera, self.config.timing.frame_poll_interval);
        self.context.image_center_px = Some(frame.image_center());
        let det =
            self.vision
                .find_chessboard_and_compute_ppm(&self.detector, &frame, &self.config.chessboard);
        Ok(if det.found() {
            CalibrationState::ChessboardFound
        } else {
            CalibrationState::LookingForChessboard
        })
    }

    fn handle_chessboard_found(&mut self) -> Handled {
        let ppm = self.vision.ppm().ok_or_else(|| missing("ppm"))?;
        let bottom_left_px = self
            .vision
            .bottom_left_px()
            .ok_or_else(|| missing("chessboard bottom-left corner"))?;
        info!(
            "chessboard: {ppm:.4} px/mm, bottom-left corner ({:.2}, {:.2})",
            bottom_left_px.x, bottom_left_px.y
        );
        self.observers.emit(&CalibrationEvent::ChessboardFound {
            ppm,
            bottom_left_px,
        });
        Ok(CalibrationState::LookingForArucoMarkers)
    }

    fn handle_looking_for_aruco_markers(&mut self) -> Handled {
        flush(&mut self.camera, self.config.camera_flush_frames);
        let frame = wait_for_frame(&mut self.camera, self.config.timing.frame_poll_interval);
        let search = self.vision.find_required_aruco_markers(&self.detector, &frame);
        if !search.found_all {
            return Ok(CalibrationState::LookingForArucoMarkers);
        }
        self.observers.emit(&CalibrationEvent::MarkersFound {
            top_left_px: self.vision.marker_top_left_px_all().clone(),
        });
        Ok(CalibrationState::AllArucoFound)
    }

    fn handle_all_aruco_found(&mut self) -> Handled {
        if !self.vision.convert_all_to_mm() {
            return Err(missing("ppm"));
        }
        for &id in &self.context.required_ids {
            let px = self
                .vision
                .marker_top_left_px(id)
                .ok_or_else(|| missing("marker pixel position"))?;
            self.context.camera_points.insert(id, px);
        }
        Ok(CalibrationState::ComputeOffsets)
    }

    fn handle_compute_offsets(&mut self) -> Handled {
        let center = self
            .context
            .image_center_px
            .ok_or_else(|| missing("image center"))?;
        let offsets = self
            .vision
            .marker_offsets_from_center(center)
            .ok_or_else(|| missing("marker millimeter positions"))?;
        for (id, o) in &offsets {
            debug!("marker {id}: offset from image center ({:.3}, {:.3}) mm", o.x, o.y);
        }
        self.context.marker_offsets_mm = offsets;
        Ok(CalibrationState::AlignRobot)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    fn handle_align_robot(&mut self) -> Handled {
        let marker_id = self.current_marker_id()?;
        let mapping = self.mapping()?;
        self.context.iteration_count = 0;
        self.controller.reset();

        let offset = self
            .context
            .marker_offsets_mm
            .get(&marker_id)
            .copied()
            .unwrap_or_else(Vector2::zeros);
        let mapped = mapping.map_vector(offset);
        let current = self.robot.current_position();
        let reference = self.robot.calibration_reference_position();
        let target = Pose6 {
            x: reference.x + mapped.x,
            y: reference.y + mapped.y,
            z: self.config.z_target,
            ..current
        };
        info!(
            "marker {marker_id} ({}/{}): coarse move to {target}",
            self.context.current_marker + 1,
            self.context.total_markers()
        );

        if self.robot.move_to(target, true) != 0 {
            let fallback = self.context.last_recorded_pose.unwrap_or(reference);
            warn!("move to {target} failed; returning to {fallback} and retrying");
            let code = self.robot.move_to(fallback, false);
            if code != 0 {
                warn!("return move to {fallback} failed (code {code})");
            }
            let code = self.robot.move_to(target, true);
            if code != 0 {
                return Err(CalibrationError::MotionFailed {
                    marker_id,
                    target,
                    code,
                });
            }
        }
        settle(self.config.timing.align_settle);
        Ok(CalibrationState::IterateAlignment)
    }

    fn handle_iterate_alignment(&mut self) -> Handled {
        let marker_id = self.current_marker_id()?;
        let mapping = self.mapping()?;
        let max_iterations = self.config.max_iterations;
        let threshold_mm = self.config.alignment_threshold_mm;

        self.context.iteration_count += 1;
        let iteration = self.context.iteration_count;
        if iteration > max_iterations {
            return Err(CalibrationError::ConvergenceFailed {
                marker_id,
                max_iterations,
                threshold_mm,
            });
        }

        let frame = wait_for_frame(&mut self.camera, self.config.timing.frame_poll_interval);
        let scan = self
            .vision
            .detect_specific_marker(&self.detector, &frame, marker_id);
        if !scan.found {
            debug!("marker {marker_id} not visible, iteration {iteration}/{max_iterations}");
            self.emit_iteration(marker_id, iteration, None, frame);
            return Ok(CalibrationState::IterateAlignment);
        }
        self.vision
            .update_marker_top_left_corners(marker_id, &scan.markers);
        let top_left = self
            .vision
            .marker_top_left_px(marker_id)
            .ok_or_else(|| missing("marker pixel position"))?;

        let offset_px = top_left - frame.image_center();
        let error_px = offset_px.norm();
        let ppm = self.vision.ppm().ok_or_else(|| missing("ppm"))?
            * self.context.ppm_scale.ok_or_else(|| missing("ppm scale"))?;
        let error_mm = error_px / ppm;
        let offset_mm = offset_px / ppm;
        debug!(
            "marker {marker_id} iteration {iteration}/{max_iterations}: error {error_mm:.4} mm ({error_px:.2} px)"
        );

        self.emit_iteration(marker_id, iteration, Some(error_mm), frame);

        if error_mm <= threshold_mm {
            let timing = &self.config.timing;
            let pose = average_pose(
                &mut self.robot,
                timing.pose_averaging_window,
                timing.pose_sample_interval,
            );
            self.context.record_position(marker_id, pose);
            info!(
                "marker {marker_id} aligned after {iteration} iterations: error {error_mm:.4} mm, pose {pose}"
            );
            self.observers.emit(&CalibrationEvent::MarkerCalibrated {
                marker_id,
                pose,
                iterations: iteration,
            });
            return Ok(CalibrationState::Done);
        }

        let (mx, my) = mapping.map(offset_mm.x, offset_mm.y);
        let current = self.robot.current_position();
        let next = self.controller.next_pose(current, error_mm, (mx, my));
        let code = self.robot.move_to(next, true);
        if code != 0 {
            return Err(CalibrationError::FineMoveFailed {
                marker_id,
                iteration,
                max_iterations,
                code,
            });
        }
        settle(self.config.timing.fast_iteration_wait);
        Ok(CalibrationState::IterateAlignment)
    }

    fn emit_iteration(&self, marker_id: u32, iteration: u32, error_mm: Option<f64>, frame: S::Frame) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.emit(&CalibrationEvent::AlignmentIteration {
            marker_id,
            iteration,
            error_mm,
            frame: Arc::new(frame),
        });
    }

    fn handle_done(&mut self) -> Handled {
        if !self.context.is_last_marker() {
            self.context.current_marker += 1;
            return Ok(CalibrationState::AlignRobot);
        }
        self.finished = true;
        info!(
            "all {} markers aligned; computing homography",
            self.context.total_markers()
        );
        Ok(CalibrationState::Done)
    }
}
