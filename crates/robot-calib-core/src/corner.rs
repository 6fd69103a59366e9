use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// A saddle-point corner candidate as produced by a ChESS-style detector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    /// Sub-pixel position in image coordinates.
    pub position: Point2<f32>,
    /// Direction of the light-square diagonal in radians, defined modulo π.
    pub orientation: f32,
    /// Detector response; larger is stronger.
    pub strength: f32,
}

impl Corner {
    pub fn new(x: f32, y: f32, orientation: f32, strength: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            orientation,
            strength,
        }
    }
}
