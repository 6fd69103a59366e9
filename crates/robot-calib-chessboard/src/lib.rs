//! Chessboard detection on top of ChESS corners.
//!
//! Pipeline:
//! 1. Filter corners by strength.
//! 2. Build a 4-connected neighbour graph (KD-tree KNN, orientation and
//!    edge-direction checks).
//! 3. BFS each connected component into integer lattice coordinates.
//! 4. Accept the first component that fills exactly `cols x rows` cells and
//!    emit its corners row-major from the top-left.
//!
//! [`metrics`] turns the ordered grid into the quantities the calibration
//! needs: pixels per millimeter, the bottom-left reference corner and the
//! grid center.

mod detector;
mod geom;
mod gridgraph;
pub mod metrics;
mod params;

pub use detector::{ChessboardDetector, ChessboardGrid};
pub use gridgraph::{GridGraph, NeighborDirection, NodeNeighbor};
pub use metrics::{bottom_left_corner, chessboard_center, pixels_per_mm, ChessboardMetrics};
pub use params::{ChessboardParams, GridGraphParams};
