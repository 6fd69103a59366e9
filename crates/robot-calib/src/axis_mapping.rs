//! Image-to-robot axis discovery.
//!
//! Two test moves (+X, then -Y) are made from the current pose while a
//! reference marker is tracked. The image axis that moved most tells which
//! image axis each robot axis corresponds to; the sign of the displacement
//! tells the direction. Camera motion moves the scene the opposite way, so a
//! positive robot move seen as a negative image delta maps with sign `+1`.

use crate::capture::{settle, wait_for_frame_within};
use crate::config::AxisMappingConfig;
use crate::error::CalibrationError;
use crate::interfaces::{FrameSource, PatternDetector, RobotDriver};
use log::{debug, info};
use nalgebra::{Point2, Vector2};
use robot_calib_core::Pose6;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageAxis {
    X,
    Y,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Plus,
    Minus,
}

impl Direction {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Plus => 1.0,
            Direction::Minus => -1.0,
        }
    }
}

/// Which image axis drives one robot axis, and with which sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMapping {
    pub image_axis: ImageAxis,
    pub direction: Direction,
}

impl AxisMapping {
    /// Robot-axis component of the image-frame vector `(dx, dy)`.
    #[inline]
    pub fn apply(&self, dx: f64, dy: f64) -> f64 {
        let v = match self.image_axis {
            ImageAxis::X => dx,
            ImageAxis::Y => dy,
        };
        v * self.direction.sign()
    }
}

impl fmt::Display for AxisMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            Direction::Plus => '+',
            Direction::Minus => '-',
        };
        let axis = match self.image_axis {
            ImageAxis::X => "image x",
            ImageAxis::Y => "image y",
        };
        write!(f, "{sign}{axis}")
    }
}

/// Mapping of image-frame offsets into robot-frame offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageToRobotMapping {
    pub robot_x: AxisMapping,
    pub robot_y: AxisMapping,
}

impl ImageToRobotMapping {
    pub fn map(&self, dx: f64, dy: f64) -> (f64, f64) {
        (self.robot_x.apply(dx, dy), self.robot_y.apply(dx, dy))
    }

    pub fn map_vector(&self, v: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = self.map(v.x, v.y);
        Vector2::new(x, y)
    }
}

/// Classify one test move.
///
/// Ties (`|dx| == |dy|`) resolve to the Y axis; a zero delta resolves to `Minus`.
pub fn compute_axis_mapping(dx: f64, dy: f64, robot_move_mm: f64) -> AxisMapping {
    let (image_axis, delta) = if dx.abs() > dy.abs() {
        (ImageAxis::X, dx)
    } else {
        (ImageAxis::Y, dy)
    };
    let direction = if robot_move_mm * delta < 0.0 {
        Direction::Plus
    } else {
        Direction::Minus
    };
    AxisMapping {
        image_axis,
        direction,
    }
}

/// One test move with the marker positions seen around it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisProbe {
    /// Commanded robot displacement `(dx, dy)`, mm.
    pub robot_move_mm: [f64; 2],
    pub before_px: Point2<f64>,
    pub after_px: Point2<f64>,
    pub mapping: AxisMapping,
}

impl AxisProbe {
    pub fn image_delta(&self) -> Vector2<f64> {
        self.after_px - self.before_px
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisMappingReport {
    pub mapping: ImageToRobotMapping,
    pub x_probe: AxisProbe,
    pub y_probe: AxisProbe,
    /// Robot Z during the probes; PPM measured later refers to this height.
    pub z_current: f64,
}

/// Runs the two test moves against live hardware.
pub struct CoordinateMapper<'a> {
    config: &'a AxisMappingConfig,
    poll: Duration,
}

impl<'a> CoordinateMapper<'a> {
    pub fn new(config: &'a AxisMappingConfig, poll: Duration) -> Self {
        Self { config, poll }
    }

    /// Probe +X then -Y and return the robot to its starting pose after each.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(marker_id = self.config.marker_id))
    )]
    pub fn discover<S, R, D>(
        &self,
        camera: &mut S,
        robot: &mut R,
        detector: &D,
    ) -> Result<AxisMappingReport, CalibrationError>
    where
        S: FrameSource,
        R: RobotDriver,
        D: PatternDetector<Frame = S::Frame>,
    {
        let start = robot.current_position();
        let step = self.config.move_mm;

        let x_probe = self.probe(camera, robot, detector, start, [step, 0.0])?;
        let y_probe = self.probe(camera, robot, detector, start, [0.0, -step])?;

        let mapping = ImageToRobotMapping {
            robot_x: x_probe.mapping,
            robot_y: y_probe.mapping,
        };
        info!(
            "axis mapping with marker {}: robot x <- {}, robot y <- {}",
            self.config.marker_id, mapping.robot_x, mapping.robot_y
        );

        Ok(AxisMappingReport {
            mapping,
            x_probe,
            y_probe,
            z_current: start.z,
        })
    }

    fn probe<S, R, D>(
        &self,
        camera: &mut S,
        robot: &mut R,
        detector: &D,
        start: Pose6,
        robot_move_mm: [f64; 2],
    ) -> Result<AxisProbe, CalibrationError>
    where
        S: FrameSource,
        R: RobotDriver,
        D: PatternDetector<Frame = S::Frame>,
    {
        let before_px = self.locate(camera, detector)?;

        let [mx, my] = robot_move_mm;
        self.move_checked(robot, start.translated(mx, my))?;
        settle(self.config.delay);
        let after_px = self.locate(camera, detector)?;
        self.move_checked(robot, start)?;

        let delta = after_px - before_px;
        let commanded = if mx != 0.0 { mx } else { my };
        let mapping = compute_axis_mapping(delta.x, delta.y, commanded);
        debug!(
            "probe ({mx:+.1}, {my:+.1}) mm: marker ({:.2}, {:.2}) -> ({:.2}, {:.2}), delta ({:.2}, {:.2}) -> {mapping}",
            before_px.x, before_px.y, after_px.x, after_px.y, delta.x, delta.y
        );

        Ok(AxisProbe {
            robot_move_mm,
            before_px,
            after_px,
            mapping,
        })
    }

    fn move_checked<R: RobotDriver>(&self, robot: &mut R, target: Pose6) -> Result<(), CalibrationError> {
        match robot.move_to(target, true) {
            0 => Ok(()),
            code => Err(CalibrationError::MappingMoveFailed {
                marker_id: self.config.marker_id,
                target,
                code,
            }),
        }
    }

    /// Top-left corner of the reference marker in the first frame that shows it.
    ///
    /// Only received frames count towards `max_attempts`; waiting longer than
    /// `frame_timeout` for any single frame is fatal.
    fn locate<S, D>(&self, camera: &mut S, detector: &D) -> Result<Point2<f64>, CalibrationError>
    where
        S: FrameSource,
        D: PatternDetector<Frame = S::Frame>,
    {
        let id = self.config.marker_id;
        for _ in 0..self.config.max_attempts {
            let timeout = self.config.frame_timeout;
            let frame = wait_for_frame_within(camera, self.poll, timeout).ok_or(
                CalibrationError::MappingFrameTimeout {
                    marker_id: id,
                    timeout_s: timeout.as_secs_f64(),
                },
            )?;
            if let Some(m) = detector.detect_markers(&frame).iter().find(|m| m.id == id) {
                return Ok(m.top_left());
            }
        }
        Err(CalibrationError::AxisMappingFailed {
            marker_id: id,
            attempts: self.config.max_attempts,
        })
    }
}
