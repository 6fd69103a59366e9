use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced by homography estimation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    #[error("at least 4 correspondences are required (got {got})")]
    TooFewPoints { got: usize },
    #[error("correspondence count mismatch (camera={camera}, robot={robot})")]
    LengthMismatch { camera: usize, robot: usize },
    #[error("degenerate point configuration")]
    Degenerate,
}

/// Projective map `dst ~ H * src`, normalized so that `h33 = 1`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];
        Point2::new(v[0] / w, v[1] / w)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

impl From<[[f64; 3]; 3]> for Homography {
    fn from(rows: [[f64; 3]; 3]) -> Self {
        Self::from_array(rows)
    }
}

impl From<Homography> for [[f64; 3]; 3] {
    fn from(h: Homography) -> Self {
        h.to_array()
    }
}

/// Solver used to fit the camera-to-robot homography.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HomographyMethod {
    /// Plain least squares over all correspondences.
    #[default]
    LeastSquares,
    /// Consensus over minimal 4-point subsets, refit on the inliers.
    Ransac {
        reproj_threshold: f64,
        max_iterations: usize,
    },
}

/// Fitted homography plus a per-point inlier mask (1 = used by the fit).
#[derive(Clone, Debug, PartialEq)]
pub struct HomographyFit {
    pub homography: Homography,
    pub status: Vec<u8>,
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len() as f64;
    let (sx, sy) = pts
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (sx / n, sy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let t = hartley_normalization(cx, cy, mean_dist);
    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

fn finalize(hn: Matrix3<f64>, t_src: Matrix3<f64>, t_dst: Matrix3<f64>) -> Option<Homography> {
    let h = t_dst.try_inverse()? * hn * t_src;
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return None;
    }
    let h = h / s;
    if h.iter().any(|v| !v.is_finite()) || h.determinant().abs() < 1e-15 {
        return None;
    }
    Some(Homography::new(h))
}

fn check_inputs(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<(), HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            camera: src.len(),
            robot: dst.len(),
        });
    }
    if src.len() < 4 {
        return Err(HomographyError::TooFewPoints { got: src.len() });
    }
    Ok(())
}

/// Least-squares fit of `dst ~ H * src` (normalized DLT, SVD null vector).
pub fn estimate_homography_dlt(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    check_inputs(src, dst)?;

    let (s, ts) = normalize_points(src);
    let (d, td) = normalize_points(dst);

    let n = src.len();
    // Pad to at least 9 rows so the thin SVD always yields a full V^T.
    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);

    for k in 0..n {
        let (x, y) = (s[k].x, s[k].y);
        let (u, v) = (d[k].x, d[k].y);

        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let vt = svd.v_t.ok_or(HomographyError::Degenerate)?;
    // Singular values are not guaranteed to be sorted.
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(HomographyError::Degenerate)?;
    let h = vt.row(min_idx);

    let hn =
        Matrix3::<f64>::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    finalize(hn, ts, td).ok_or(HomographyError::Degenerate)
}

/// Compute H such that `dst ~ H * src` from exactly 4 correspondences.
///
/// Corner order must be consistent between `src` and `dst`.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let (x, y) = (src_n[k].x, src_n[k].y);
        let (u, v) = (dst_n[k].x, dst_n[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;

    let hn = Matrix3::<f64>::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    finalize(hn, t_src, t_dst)
}

/// Euclidean distance between `H * src[i]` and `dst[i]` for every pair.
pub fn reprojection_errors(h: &Homography, src: &[Point2<f64>], dst: &[Point2<f64>]) -> Vec<f64> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| (h.apply(*s) - d).norm())
        .collect()
}

/// Advance `idx` to the next lexicographic 4-combination of `0..n`.
fn next_combination(idx: &mut [usize; 4], n: usize) -> bool {
    let k = idx.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if idx[i] < n - k + i {
            idx[i] += 1;
            for j in i + 1..k {
                idx[j] = idx[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

fn fit_ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    threshold: f64,
    max_iterations: usize,
) -> Result<HomographyFit, HomographyError> {
    let n = src.len();
    let mut idx = [0usize, 1, 2, 3];
    let mut best: Option<(Vec<u8>, usize, f64)> = None;

    for _ in 0..max_iterations.max(1) {
        let s = idx.map(|i| src[i]);
        let d = idx.map(|i| dst[i]);
        if let Some(h) = homography_from_4pt(&s, &d) {
            let errs = reprojection_errors(&h, src, dst);
            let mask: Vec<u8> = errs.iter().map(|&e| u8::from(e <= threshold)).collect();
            let count = mask.iter().filter(|&&m| m == 1).count();
            let residual: f64 = errs.iter().filter(|&&e| e <= threshold).sum();
            let better = match &best {
                None => true,
                Some((_, bc, br)) => count > *bc || (count == *bc && residual < *br),
            };
            if better {
                best = Some((mask, count, residual));
            }
        }
        if !next_combination(&mut idx, n) {
            break;
        }
    }

    let (mask, count, _) = best.ok_or(HomographyError::Degenerate)?;
    if count < 4 {
        return Err(HomographyError::Degenerate);
    }

    let (inl_src, inl_dst): (Vec<_>, Vec<_>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|(_, m)| **m == 1)
        .map(|((s, d), _)| (*s, *d))
        .unzip();
    let homography = estimate_homography_dlt(&inl_src, &inl_dst)?;

    Ok(HomographyFit {
        homography,
        status: mask,
    })
}

/// Fit `dst ~ H * src` with the requested solver.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(src, dst), fields(n = src.len())))]
pub fn estimate_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    method: HomographyMethod,
) -> Result<HomographyFit, HomographyError> {
    check_inputs(src, dst)?;
    match method {
        HomographyMethod::LeastSquares => Ok(HomographyFit {
            homography: estimate_homography_dlt(src, dst)?,
            status: vec![1; src.len()],
        }),
        HomographyMethod::Ransac {
            reproj_threshold,
            max_iterations,
        } => fit_ransac(src, dst, reproj_threshold, max_iterations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        let dx = (a.x - b.x).abs();
        let dy = (a.y - b.y).abs();
        assert!(
            dx < tol && dy < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    fn ground_truth() -> Homography {
        Homography::new(Matrix3::new(
            0.4, 0.02, -120.0, //
            -0.01, -0.38, 460.0, //
            0.00001, 0.00002, 1.0,
        ))
    }

    fn grid_points() -> Vec<Point2<f64>> {
        (0..3)
            .flat_map(|y| {
                (0..4).map(move |x| Point2::new(100.0 + x as f64 * 300.0, 80.0 + y as f64 * 250.0))
            })
            .collect()
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = ground_truth();
        let inv = h.inverse().expect("invertible");
        for p in [Point2::new(0.0, 0.0), Point2::new(640.0, 360.0)] {
            assert_close(inv.apply(h.apply(p)), p, 1e-6);
        }
    }

    #[test]
    fn four_point_specialization_recovers_h() {
        let gt = ground_truth();
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1280.0, 0.0),
            Point2::new(1280.0, 720.0),
            Point2::new(0.0, 720.0),
        ];
        let dst = src.map(|p| gt.apply(p));
        let h = homography_from_4pt(&src, &dst).expect("recoverable");
        for p in [Point2::new(10.0, 20.0), Point2::new(900.0, 500.0)] {
            assert_close(h.apply(p), gt.apply(p), 1e-6);
        }
    }

    #[test]
    fn least_squares_matches_exact_data() {
        let gt = ground_truth();
        let src = grid_points();
        let dst: Vec<_> = src.iter().map(|&p| gt.apply(p)).collect();

        let fit = estimate_homography(&src, &dst, HomographyMethod::LeastSquares).expect("fit");
        assert!(fit.status.iter().all(|&s| s == 1));
        for e in reprojection_errors(&fit.homography, &src, &dst) {
            assert!(e < 1e-6, "residual {e}");
        }
    }

    #[test]
    fn exactly_four_points_interpolate() {
        let gt = ground_truth();
        let src = vec![
            Point2::new(100.0, 80.0),
            Point2::new(1000.0, 80.0),
            Point2::new(400.0, 600.0),
            Point2::new(50.0, 500.0),
        ];
        let dst: Vec<_> = src.iter().map(|&p| gt.apply(p)).collect();
        let h = estimate_homography_dlt(&src, &dst).expect("fit");
        for (s, d) in src.iter().zip(&dst) {
            assert_close(h.apply(*s), *d, 1e-6);
        }
    }

    #[test]
    fn ransac_flags_outlier() {
        let gt = ground_truth();
        let src = grid_points();
        let mut dst: Vec<_> = src.iter().map(|&p| gt.apply(p)).collect();
        dst[5].x += 40.0;

        let fit = estimate_homography(
            &src,
            &dst,
            HomographyMethod::Ransac {
                reproj_threshold: 0.5,
                max_iterations: 500,
            },
        )
        .expect("fit");
        assert_eq!(fit.status[5], 0);
        assert_eq!(fit.status.iter().filter(|&&s| s == 1).count(), src.len() - 1);
        assert_close(fit.homography.apply(src[5]), gt.apply(src[5]), 1e-6);
    }

    #[test]
    fn rejects_bad_inputs() {
        let p = vec![Point2::new(0.0, 0.0); 3];
        assert_eq!(
            estimate_homography_dlt(&p, &p),
            Err(HomographyError::TooFewPoints { got: 3 })
        );
        let q = vec![Point2::new(0.0, 0.0); 4];
        assert_eq!(
            estimate_homography(&q, &p, HomographyMethod::LeastSquares),
            Err(HomographyError::LengthMismatch { camera: 4, robot: 3 })
        );
    }

    #[test]
    fn serializes_as_row_major_rows() {
        let h = ground_truth();
        let json = serde_json::to_string(&h).expect("serialize");
        assert!(json.starts_with("[[0.4,0.02,-120.0]"));
        let back: Homography = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, h);
    }
}
