//! Progress events and the callback registry.

use crate::axis_mapping::ImageToRobotMapping;
use crate::state::StateKind;
use nalgebra::Point2;
use robot_calib_core::Pose6;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Structured diagnostic published when a run stops in ERROR.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Always `"error"`.
    pub status: String,
    pub message: String,
    /// Index into the sorted required ids.
    pub current_marker: usize,
    pub total_markers: usize,
    pub successful_markers: usize,
    pub iteration_count: u32,
    pub max_iterations: u32,
}

/// Events emitted by the calibration machine, in emission order.
#[derive(Debug, Clone)]
pub enum CalibrationEvent<F> {
    Started {
        total_markers: usize,
    },
    StateChanged {
        from: StateKind,
        to: StateKind,
    },
    AxisMappingDiscovered {
        mapping: ImageToRobotMapping,
        z_current: f64,
    },
    ChessboardFound {
        ppm: f64,
        bottom_left_px: Point2<f64>,
    },
    MarkersFound {
        top_left_px: BTreeMap<u32, Point2<f64>>,
    },
    /// Fired for every frame inspected by the fine loop.
    /// The frame is shared; clone the `Arc` to keep it.
    AlignmentIteration {
        marker_id: u32,
        iteration: u32,
        /// `None` when the marker was not in the frame.
        error_mm: Option<f64>,
        frame: Arc<F>,
    },
    MarkerCalibrated {
        marker_id: u32,
        pose: Pose6,
        iterations: u32,
    },
    Stopped {
        report: ErrorReport,
    },
    Completed {
        mean_error_mm: f64,
        persisted: bool,
    },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

pub type CalibrationCallback<F> = Arc<dyn Fn(&CalibrationEvent<F>) + Send + Sync>;

/// Registered callbacks, notified in registration order.
pub struct Observers<F> {
    callbacks: BTreeMap<CallbackId, CalibrationCallback<F>>,
    next_id: CallbackId,
}

impl<F> Default for Observers<F> {
    fn default() -> Self {
        Self {
            callbacks: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<F> Observers<F> {
    pub fn register<C>(&mut self, callback: C) -> CallbackId
    where
        C: Fn(&CalibrationEvent<F>) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.insert(id, Arc::new(callback));
        id
    }

    pub fn deregister(&mut self, id: CallbackId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn emit(&self, event: &CalibrationEvent<F>) {
        for callback in self.callbacks.values() {
            callback(event);
        }
    }
}
