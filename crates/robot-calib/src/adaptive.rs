//! Step-size law of the fine alignment loop.

use crate::capture::settle;
use crate::config::AdaptiveMovementConfig;
use crate::interfaces::RobotDriver;
use log::trace;
use robot_calib_core::Pose6;
use std::time::{Duration, Instant};

/// Floor of the quadratic slow-down near the target.
const NEAR_TARGET_FLOOR: f64 = 0.05;

/// Computes bounded XY corrections from the current error.
///
/// The step grows with the error through `tanh`, shrinks quadratically once
/// the error is within twice the target, and is damped further when the
/// error changed sharply since the previous call.
#[derive(Clone, Debug)]
pub struct AdaptiveMovementController {
    config: AdaptiveMovementConfig,
    target_error_mm: f64,
    previous_error_mm: Option<f64>,
}

impl AdaptiveMovementController {
    pub fn new(config: AdaptiveMovementConfig, target_error_mm: f64) -> Self {
        Self {
            config,
            target_error_mm,
            previous_error_mm: None,
        }
    }

    /// Forget the previous error; called when a new marker is approached.
    pub fn reset(&mut self) {
        self.previous_error_mm = None;
    }

    pub fn previous_error_mm(&self) -> Option<f64> {
        self.previous_error_mm
    }

    /// Largest per-axis move allowed for `error_mm`. Records `error_mm` as the previous error.
    pub fn max_step(&mut self, error_mm: f64) -> f64 {
        let c = &self.config;
        let target = self.target_error_mm;

        let norm = (error_mm / c.max_error_ref).min(1.0);
        let mut step =
            c.min_step_mm + (c.responsiveness * norm).tanh() * (c.max_step_mm - c.min_step_mm);

        if error_mm < 2.0 * target {
            let r = error_mm / (2.0 * target);
            step *= (r * r).max(NEAR_TARGET_FLOOR);
        }
        if let Some(prev) = self.previous_error_mm {
            step *= 1.0 / (1.0 + c.derivative_scaling * (error_mm - prev).abs());
        }
        self.previous_error_mm = Some(error_mm);

        if error_mm < 0.5 * target {
            step = c.min_step_mm;
        }
        step
    }

    /// Next pose: `current` shifted by the robot-frame offset, clamped per axis.
    ///
    /// Z and orientation are kept from `current`.
    pub fn next_pose(&mut self, current: Pose6, error_mm: f64, offset_mm: (f64, f64)) -> Pose6 {
        let step = self.max_step(error_mm);
        let dx = offset_mm.0.clamp(-step, step);
        let dy = offset_mm.1.clamp(-step, step);
        trace!("adaptive step: error {error_mm:.4} mm, limit {step:.4} mm, move ({dx:.4}, {dy:.4})");
        current.translated(dx, dy)
    }
}

/// Mean pose over `window`, sampled every `interval`.
///
/// At least one sample is always taken; a zero interval takes exactly one.
pub fn average_pose<R: RobotDriver + ?Sized>(
    robot: &mut R,
    window: Duration,
    interval: Duration,
) -> Pose6 {
    let first = robot.current_position();
    if interval.is_zero() || window.is_zero() {
        return first;
    }

    let mut samples = vec![first];
    let started = Instant::now();
    while started.elapsed() < window {
        settle(interval);
        samples.push(robot.current_position());
    }
    Pose6::mean(&samples).unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller() -> AdaptiveMovementController {
        AdaptiveMovementController::new(AdaptiveMovementConfig::default(), 0.25)
    }

    #[test]
    fn large_error_approaches_max_step() {
        let mut c = controller();
        let step = c.max_step(500.0);
        let expected = 0.1 + 2.0f64.tanh() * 24.9;
        assert_relative_eq!(step, expected, epsilon = 1e-12);
        assert!(step < 25.0);
    }

    #[test]
    fn step_grows_with_error() {
        let small = controller().max_step(2.0);
        let mid = controller().max_step(20.0);
        let large = controller().max_step(80.0);
        assert!(small < mid && mid < large);
    }

    #[test]
    fn near_target_slows_quadratically_with_floor() {
        let mut c = controller();
        let base = 0.1 + (2.0 * 0.4 / 100.0f64).tanh() * 24.9;
        // 0.4 / 0.5 = 0.8 -> factor 0.64
        assert_relative_eq!(c.max_step(0.4), base * 0.64, epsilon = 1e-12);
    }

    #[test]
    fn derivative_term_damps_sharp_changes() {
        let mut c = controller();
        let first = c.max_step(10.0);
        let second = c.max_step(10.0);
        assert_relative_eq!(first, second, epsilon = 1e-12);

        let mut c = controller();
        c.max_step(30.0);
        let damped = c.max_step(10.0);
        assert_relative_eq!(damped, first / 11.0, epsilon = 1e-12);

        c.reset();
        assert!(c.previous_error_mm().is_none());
        assert_relative_eq!(c.max_step(10.0), first, epsilon = 1e-12);
    }

    #[test]
    fn tiny_error_uses_min_step() {
        let mut c = controller();
        assert_eq!(c.max_step(0.1), 0.1);
    }

    #[test]
    fn next_pose_clamps_each_axis_and_keeps_z() {
        let mut c = controller();
        let current = Pose6::new(100.0, 50.0, 300.0, 180.0, 0.0, 90.0);
        let next = c.next_pose(current, 500.0, (40.0, -1.0));
        let limit = 0.1 + 2.0f64.tanh() * 24.9;
        assert_relative_eq!(next.x, 100.0 + limit, epsilon = 1e-12);
        assert_relative_eq!(next.y, 49.0, epsilon = 1e-12);
        assert_eq!((next.z, next.rx, next.ry, next.rz), (300.0, 180.0, 0.0, 90.0));
    }

    struct Wobbly {
        calls: usize,
    }

    impl RobotDriver for Wobbly {
        fn current_position(&mut self) -> Pose6 {
            self.calls += 1;
            let x = if self.calls % 2 == 0 { 1.0 } else { -1.0 };
            Pose6::new(x, 5.0, 300.0, 0.0, 0.0, 0.0)
        }

        fn move_to(&mut self, _: Pose6, _: bool) -> i32 {
            0
        }

        fn calibration_reference_position(&self) -> Pose6 {
            Pose6::default()
        }
    }

    #[test]
    fn zero_interval_takes_a_single_sample() {
        let mut robot = Wobbly { calls: 0 };
        let p = average_pose(&mut robot, Duration::from_secs(1), Duration::ZERO);
        assert_eq!(robot.calls, 1);
        assert_eq!(p.x, -1.0);
    }

    #[test]
    fn averaging_window_collects_several_samples() {
        let mut robot = Wobbly { calls: 0 };
        let p = average_pose(&mut robot, Duration::from_millis(30), Duration::from_millis(5));
        assert!(robot.calls >= 2);
        assert!(p.x.abs() <= 1.0);
        assert_relative_eq!(p.y, 5.0, epsilon = 1e-12);
    }
}
