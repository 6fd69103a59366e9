use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cartesian robot pose: position in millimeters, orientation in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose6 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl Pose6 {
    pub const fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Self {
            x,
            y,
            z,
            rx,
            ry,
            rz,
        }
    }

    pub fn from_array(v: [f64; 6]) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }

    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.rx, self.ry, self.rz]
    }

    /// Planar position used as the robot side of a homography correspondence.
    #[inline]
    pub fn xy(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    /// Same pose translated in the XY plane.
    #[inline]
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    /// Component-wise mean of a set of poses. `None` for an empty slice.
    pub fn mean(poses: &[Pose6]) -> Option<Self> {
        if poses.is_empty() {
            return None;
        }
        let mut acc = [0.0f64; 6];
        for p in poses {
            for (a, v) in acc.iter_mut().zip(p.to_array()) {
                *a += v;
            }
        }
        let n = poses.len() as f64;
        Some(Self::from_array(acc.map(|a| a / n)))
    }
}

impl fmt::Display for Pose6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.3}, {:.3}, {:.3}, {:.3}, {:.3}, {:.3}]",
            self.x, self.y, self.z, self.rx, self.ry, self.rz
        )
    }
}
