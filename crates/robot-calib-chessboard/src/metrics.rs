//! Scalar measurements derived from an ordered inner-corner grid.
//!
//! All functions take corners in row-major order (`corners[r * cols + c]`)
//! and return `None` when the slice does not hold exactly `cols * rows`
//! points.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Reference measurements of a detected chessboard.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChessboardMetrics {
    /// Pixels per millimeter on the board plane.
    pub ppm: f64,
    /// First corner of the last row.
    pub bottom_left: Point2<f64>,
    /// Grid center, see [`chessboard_center`].
    pub center: Point2<f64>,
}

impl ChessboardMetrics {
    pub fn compute(
        corners: &[Point2<f64>],
        cols: usize,
        rows: usize,
        square_size_mm: f64,
    ) -> Option<Self> {
        Some(Self {
            ppm: pixels_per_mm(corners, cols, rows, square_size_mm)?,
            bottom_left: bottom_left_corner(corners, cols, rows)?,
            center: chessboard_center(corners, cols, rows)?,
        })
    }
}

fn check_len(corners: &[Point2<f64>], cols: usize, rows: usize) -> Option<()> {
    (cols > 0 && rows > 0 && corners.len() == cols * rows).then_some(())
}

/// Corner at index `(rows - 1) * cols`.
pub fn bottom_left_corner(corners: &[Point2<f64>], cols: usize, rows: usize) -> Option<Point2<f64>> {
    check_len(corners, cols, rows)?;
    Some(corners[(rows - 1) * cols])
}

/// Grid center.
///
/// Even x even grids have no center corner, so the four innermost corners
/// are averaged. Any odd dimension uses the corner at
/// `(rows / 2) * cols + cols / 2`.
pub fn chessboard_center(corners: &[Point2<f64>], cols: usize, rows: usize) -> Option<Point2<f64>> {
    check_len(corners, cols, rows)?;

    if cols % 2 == 0 && rows % 2 == 0 {
        let (r1, r2) = (rows / 2 - 1, rows / 2);
        let (c1, c2) = (cols / 2 - 1, cols / 2);
        let idx = [
            r1 * cols + c1,
            r1 * cols + c2,
            r2 * cols + c1,
            r2 * cols + c2,
        ];
        let (sx, sy) = idx
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &i| (sx + corners[i].x, sy + corners[i].y));
        Some(Point2::new(sx / 4.0, sy / 4.0))
    } else {
        Some(corners[(rows / 2) * cols + cols / 2])
    }
}

/// Mean adjacent-corner distance over both grid axes, divided by the square size.
///
/// Horizontal and vertical distances are pooled into one mean.
pub fn pixels_per_mm(
    corners: &[Point2<f64>],
    cols: usize,
    rows: usize,
    square_size_mm: f64,
) -> Option<f64> {
    check_len(corners, cols, rows)?;
    if square_size_mm <= 0.0 {
        return None;
    }

    let mut sum = 0.0;
    let mut count = 0usize;
    for r in 0..rows {
        for c in 0..cols {
            let p = corners[r * cols + c];
            if c + 1 < cols {
                sum += (corners[r * cols + c + 1] - p).norm();
                count += 1;
            }
            if r + 1 < rows {
                sum += (corners[(r + 1) * cols + c] - p).norm();
                count += 1;
            }
        }
    }

    (count > 0).then(|| sum / count as f64 / square_size_mm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid(cols: usize, rows: usize, spacing: f64) -> Vec<Point2<f64>> {
        (0..rows)
            .flat_map(|r| {
                (0..cols).map(move |c| Point2::new(50.0 + c as f64 * spacing, 20.0 + r as f64 * spacing))
            })
            .collect()
    }

    #[test]
    fn even_grid_center_averages_four_inner_corners() {
        // Perturb the inner corners so the mean is distinguishable from any single corner.
        let (cols, rows) = (6, 4);
        let mut g = grid(cols, rows, 10.0);
        g[cols + 2].x += 1.0;
        g[cols + 3].y += 2.0;
        g[2 * cols + 2].x -= 3.0;
        g[2 * cols + 3].y += 6.0;

        let c = chessboard_center(&g, cols, rows).expect("center");
        let expected_x = (g[cols + 2].x + g[cols + 3].x + g[2 * cols + 2].x + g[2 * cols + 3].x) / 4.0;
        let expected_y = (g[cols + 2].y + g[cols + 3].y + g[2 * cols + 2].y + g[2 * cols + 3].y) / 4.0;
        assert_abs_diff_eq!(c.x, expected_x, epsilon = 1e-12);
        assert_abs_diff_eq!(c.y, expected_y, epsilon = 1e-12);
        assert_abs_diff_eq!(c.x, 74.5, epsilon = 1e-12);
        assert_abs_diff_eq!(c.y, 37.0, epsilon = 1e-12);
    }

    #[test]
    fn odd_dimension_uses_single_center_corner() {
        for (cols, rows) in [(5, 4), (6, 5), (9, 7), (3, 3)] {
            let g = grid(cols, rows, 10.0);
            let c = chessboard_center(&g, cols, rows).expect("center");
            assert_eq!(c, g[(rows / 2) * cols + cols / 2], "{cols}x{rows}");
        }
        // 9x6: rows even, cols odd -> corner at row 3, col 4.
        let g = grid(9, 6, 10.0);
        assert_eq!(chessboard_center(&g, 9, 6), Some(Point2::new(90.0, 50.0)));
    }

    #[test]
    fn bottom_left_is_first_corner_of_last_row() {
        let g = grid(9, 6, 12.0);
        assert_eq!(bottom_left_corner(&g, 9, 6), Some(Point2::new(50.0, 80.0)));
    }

    #[test]
    fn ppm_pools_both_axes() {
        // Stretch x so horizontal and vertical spacings differ.
        let (cols, rows) = (3, 2);
        let g: Vec<_> = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| Point2::new(c as f64 * 20.0, r as f64 * 10.0)))
            .collect();
        // 4 horizontal edges of 20 px, 3 vertical edges of 10 px.
        let expected = (4.0 * 20.0 + 3.0 * 10.0) / 7.0 / 5.0;
        assert_abs_diff_eq!(pixels_per_mm(&g, cols, rows, 5.0).expect("ppm"), expected, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_length_is_rejected() {
        let g = grid(3, 3, 10.0);
        assert!(ChessboardMetrics::compute(&g, 4, 3, 25.0).is_none());
        assert!(pixels_per_mm(&g, 3, 3, 0.0).is_none());
    }
}
