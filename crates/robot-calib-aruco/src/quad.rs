//! Quadrilateral fitting on dark blobs.

use crate::components::Component;
use nalgebra::{Matrix2, Point2, Vector2};

/// Twice the signed area; positive for clockwise order in y-down image coordinates.
pub(crate) fn signed_area2(q: &[Point2<f64>; 4]) -> f64 {
    (0..4)
        .map(|i| {
            let a = q[i];
            let b = q[(i + 1) % 4];
            a.x * b.y - b.x * a.y
        })
        .sum()
}

/// Reorder so the quad winds clockwise on screen.
pub(crate) fn make_clockwise(mut q: [Point2<f64>; 4]) -> [Point2<f64>; 4] {
    if signed_area2(&q) < 0.0 {
        q.swap(1, 3);
    }
    q
}

/// Coarse corners from the extreme pixels of a blob.
///
/// The pixel farthest from the centroid is one corner, the pixel farthest
/// from that one is the opposite corner, and the remaining two are the
/// extremes on either side of the diagonal joining them.
pub(crate) fn extreme_corners(comp: &Component) -> Option<[Point2<f64>; 4]> {
    let (cx, cy) = comp.centroid();
    let center = Point2::new(cx, cy);
    let pts = || {
        comp.pixels
            .iter()
            .map(|&(x, y)| Point2::new(x as f64 + 0.5, y as f64 + 0.5))
    };

    let farthest = |from: Point2<f64>| {
        pts().max_by(|a, b| {
            (a - from)
                .norm_squared()
                .total_cmp(&(b - from).norm_squared())
        })
    };

    let c0 = farthest(center)?;
    let c2 = farthest(c0)?;
    let diag = c2 - c0;
    if diag.norm() < 1.0 {
        return None;
    }

    let side = |p: Point2<f64>| {
        let v = p - c0;
        diag.x * v.y - diag.y * v.x
    };
    let c1 = pts().max_by(|a, b| side(*a).total_cmp(&side(*b)))?;
    let c3 = pts().min_by(|a, b| side(*a).total_cmp(&side(*b)))?;
    if side(c1) <= 0.0 || side(c3) >= 0.0 {
        return None;
    }

    Some(make_clockwise([c0, c1, c2, c3]))
}

/// Line in normal form: `n . p = d`, `|n| = 1`.
#[derive(Clone, Copy, Debug)]
struct Line {
    n: Vector2<f64>,
    d: f64,
}

impl Line {
    /// Total-least-squares fit through a point set.
    fn fit(points: &[Point2<f64>]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let m = points.len() as f64;
        let mean = points
            .iter()
            .fold(Vector2::zeros(), |acc, p| acc + p.coords)
            / m;

        let mut cov = Matrix2::zeros();
        for p in points {
            let v = p.coords - mean;
            cov += v * v.transpose();
        }

        let eig = cov.symmetric_eigen();
        let i_min = if eig.eigenvalues[0] <= eig.eigenvalues[1] {
            0
        } else {
            1
        };
        let n: Vector2<f64> = eig.eigenvectors.column(i_min).into_owned();
        let n = n.try_normalize(1e-12)?;
        Some(Self { n, d: n.dot(&mean) })
    }

    fn intersect(&self, other: &Line) -> Option<Point2<f64>> {
        let a = Matrix2::new(self.n.x, self.n.y, other.n.x, other.n.y);
        let p = a.try_inverse()? * Vector2::new(self.d, other.d);
        Some(Point2::from(p))
    }
}

/// Refine coarse corners by fitting a line to the boundary pixels of each side.
///
/// Boundary pixel centers lie half a pixel inside the true edge, so every
/// fitted line is pushed outward by `0.5` before intersecting.
pub(crate) fn refine_corners(
    coarse: &[Point2<f64>; 4],
    boundary: &[(u32, u32)],
    center: Point2<f64>,
) -> Option<[Point2<f64>; 4]> {
    let pts: Vec<Point2<f64>> = boundary
        .iter()
        .map(|&(x, y)| Point2::new(x as f64 + 0.5, y as f64 + 0.5))
        .collect();

    let mut lines = Vec::with_capacity(4);
    for i in 0..4 {
        let a = coarse[i];
        let b = coarse[(i + 1) % 4];
        let ab = b - a;
        let len = ab.norm();
        if len < 4.0 {
            return None;
        }
        let dir = ab / len;
        let normal = Vector2::new(-dir.y, dir.x);
        let band = (0.05 * len).max(2.0);
        let margin = (0.1 * len).max(2.0);

        let side_pts: Vec<Point2<f64>> = pts
            .iter()
            .copied()
            .filter(|p| {
                let v = p - a;
                let t = v.dot(&dir);
                t > margin && t < len - margin && v.dot(&normal).abs() <= band
            })
            .collect();

        let mut line = Line::fit(&side_pts)?;
        if line.n.dot(&center.coords) > line.d {
            line.n = -line.n;
            line.d = -line.d;
        }
        line.d += 0.5;
        lines.push(line);
    }

    let mut out = [Point2::origin(); 4];
    for i in 0..4 {
        // Corner i joins side (i-1) and side i.
        let prev = &lines[(i + 3) % 4];
        let p = prev.intersect(&lines[i])?;
        if (p - coarse[i]).norm() > 0.25 * (coarse[(i + 1) % 4] - coarse[i]).norm() {
            return None;
        }
        out[i] = p;
    }
    Some(out)
}

/// Ratio of shortest to longest side.
pub(crate) fn side_ratio(q: &[Point2<f64>; 4]) -> f64 {
    let sides = [0, 1, 2, 3].map(|i| (q[(i + 1) % 4] - q[i]).norm());
    let min = sides.iter().copied().fold(f64::INFINITY, f64::min);
    let max = sides.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 {
        0.0
    } else {
        min / max
    }
}
