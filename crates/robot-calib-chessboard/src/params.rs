use serde::{Deserialize, Serialize};

/// Neighbour search parameters for the corner graph.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 200.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Parameters for assembling a chessboard from raw corners.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// Minimal corner strength to consider.
    pub min_strength: f32,
    /// Neighbour graph settings.
    pub graph: GridGraphParams,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            min_strength: 0.0,
            graph: GridGraphParams::default(),
        }
    }
}
