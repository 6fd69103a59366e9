use crate::gridgraph::GridGraph;
use crate::params::ChessboardParams;
use log::debug;
use nalgebra::Point2;
use robot_calib_core::Corner;
use std::collections::HashMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A complete inner-corner grid, row-major.
///
/// Row 0 is the top row in the image and column 0 the leftmost column, so
/// `corners[r * cols + c]` is the corner at row `r`, column `c`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChessboardGrid {
    pub cols: usize,
    pub rows: usize,
    pub corners: Vec<Point2<f64>>,
}

/// Chessboard detector working on a cloud of ChESS corners.
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Find a complete `cols x rows` inner-corner grid among `corners`.
    ///
    /// Components are tried largest first; the first one whose BFS lattice is
    /// exactly `cols x rows` with every cell filled once wins.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, corners), fields(n = corners.len()))
    )]
    pub fn detect(&self, corners: &[Corner], cols: usize, rows: usize) -> Option<ChessboardGrid> {
        let strong: Vec<Corner> = corners
            .iter()
            .copied()
            .filter(|c| c.strength >= self.params.min_strength)
            .collect();

        let needed = cols * rows;
        if needed == 0 || strong.len() < needed {
            debug!(
                "chessboard: {} corners after strength filter, need {needed}",
                strong.len()
            );
            return None;
        }

        let graph = GridGraph::new(&strong, &self.params.graph);
        for component in graph.connected_components() {
            if component.len() < needed {
                break;
            }
            let coords = graph.assign_grid_coordinates(&component);
            if let Some(grid) = lattice_to_grid(&strong, &coords, cols, rows) {
                return Some(grid);
            }
        }

        debug!("chessboard: no component forms a complete {cols}x{rows} grid");
        None
    }
}

fn lattice_to_grid(
    corners: &[Corner],
    coords: &[(usize, i32, i32)],
    cols: usize,
    rows: usize,
) -> Option<ChessboardGrid> {
    let min_i = coords.iter().map(|c| c.1).min()?;
    let min_j = coords.iter().map(|c| c.2).min()?;
    let width = (coords.iter().map(|c| c.1).max()? - min_i + 1) as usize;
    let height = (coords.iter().map(|c| c.2).max()? - min_j + 1) as usize;

    if (width, height) != (cols, rows) {
        if (width, height) == (rows, cols) {
            debug!("chessboard: grid found with swapped dimensions {width}x{height}");
        }
        return None;
    }

    let mut cells: HashMap<(usize, usize), usize> = HashMap::with_capacity(coords.len());
    for &(node, i, j) in coords {
        let key = ((i - min_i) as usize, (j - min_j) as usize);
        if cells.insert(key, node).is_some() {
            // Two corners claimed the same lattice cell.
            return None;
        }
    }
    if cells.len() != cols * rows {
        return None;
    }

    let mut out = Vec::with_capacity(cols * rows);
    for r in 0..rows {
        for c in 0..cols {
            let p = corners[*cells.get(&(c, r))?].position;
            out.push(Point2::new(p.x as f64, p.y as f64));
        }
    }

    Some(ChessboardGrid {
        cols,
        rows,
        corners: out,
    })
}
