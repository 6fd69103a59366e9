//! Closed-loop camera-to-robot calibration.
//!
//! An eye-in-hand camera looks down at a chessboard surrounded by ArUco
//! markers. The run discovers how image axes map to robot axes, measures
//! the board scale, then servoes the robot over each marker in turn until
//! the marker's top-left corner sits on the image center. The recorded robot
//! poses and the marker pixels seen from the reference pose yield a
//! pixel-to-robot homography, which is persisted when its mean error passes
//! the acceptance gate.
//!
//! ## Quickstart
//!
//! ```no_run
//! use robot_calib::sim::SimRig;
//! use robot_calib::{CalibrationConfig, CalibrationStateMachine, TimingConfig};
//!
//! # fn main() -> Result<(), robot_calib::CalibrationError> {
//! let rig = SimRig::default();
//! let config = CalibrationConfig {
//!     required_ids: vec![0, 1, 2, 3],
//!     timing: TimingConfig::instant(),
//!     ..CalibrationConfig::default()
//! };
//! let mut machine =
//!     CalibrationStateMachine::new(config, rig.camera(), rig.robot(), rig.detector());
//! let outcome = machine.run()?;
//! println!("mean error {:.4} mm", outcome.homography.mean_error_mm);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - [`interfaces`]: the camera, robot and detector seams.
//! - [`machine`]: the state machine driving a run.
//! - [`axis_mapping`], [`adaptive`], [`vision`]: the pieces each state uses.
//! - [`homography`]: fit, acceptance gate and persistence.
//! - [`sim`]: a simulated rig for tests and dry runs.
//! - `detect` (feature `image`): detection on `image::GrayImage` frames.

pub use robot_calib_aruco as aruco;
pub use robot_calib_chessboard as chessboard;
pub use robot_calib_core as core;

pub mod adaptive;
pub mod axis_mapping;
pub mod capture;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod homography;
pub mod interfaces;
pub mod machine;
pub mod sim;
pub mod state;
pub mod timing;
pub mod vision;

#[cfg(feature = "image")]
pub mod detect;

pub use adaptive::AdaptiveMovementController;
pub use axis_mapping::{compute_axis_mapping, CoordinateMapper, ImageToRobotMapping};
pub use config::{
    AdaptiveMovementConfig, AxisMappingConfig, CalibrationConfig, ChessboardSpec,
    HomographyConfig, OutputConfig, TimingConfig,
};
pub use context::CalibrationContext;
pub use error::CalibrationError;
pub use event::{CalibrationCallback, CalibrationEvent, CallbackId, ErrorReport};
pub use interfaces::{
    ChessboardDetection, Frame, FrameSource, MarkerCorners, PatternDetector, RobotDriver,
};
pub use machine::{CalibrationOutcome, CalibrationStateMachine};
pub use robot_calib_core::Pose6;
pub use state::{CalibrationState, StateKind};
pub use timing::{StateTimings, TimingReport};
pub use vision::CalibrationVision;
