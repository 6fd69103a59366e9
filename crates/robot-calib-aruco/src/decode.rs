//! Bit sampling inside a fitted quad.

use crate::threshold::otsu_threshold_from_samples;
use nalgebra::Point2;
use robot_calib_core::{homography_from_4pt, GrayImageView, Homography};

/// Raw bits read from one quad.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Observation {
    /// Inner bits, row-major, black=1, with row 0 along `quad[0] -> quad[1]`.
    pub code: u64,
    /// Fraction of border cells read as black.
    pub border_score: f32,
}

/// Samples a `(bits + 2) x (bits + 2)` cell grid through a homography.
pub(crate) struct QuadDecoder {
    bits: usize,
    cells: usize,
    points: Vec<Point2<f64>>,
    threshold_points: Vec<Point2<f64>>,
    scratch: Vec<u8>,
    scratch_thr: Vec<u8>,
}

impl QuadDecoder {
    pub fn new(bits: usize) -> Option<Self> {
        if bits == 0 || bits * bits > 64 {
            return None;
        }
        let cells = bits + 2;

        let points = (0..cells)
            .flat_map(|cy| (0..cells).map(move |cx| Point2::new(cx as f64 + 0.5, cy as f64 + 0.5)))
            .collect();

        // A half-cell ring outside the marker supplies the white class even
        // when the payload is mostly black.
        const SUBDIV: usize = 3;
        let span = cells as f64 + 1.0;
        let n = (cells + 1) * SUBDIV;
        let step = span / n as f64;
        let threshold_points = (0..n)
            .flat_map(|ty| {
                (0..n).map(move |tx| {
                    Point2::new(
                        -0.5 + (tx as f64 + 0.5) * step,
                        -0.5 + (ty as f64 + 0.5) * step,
                    )
                })
            })
            .collect();

        Some(Self {
            bits,
            cells,
            points,
            threshold_points,
            scratch: Vec::new(),
            scratch_thr: Vec::new(),
        })
    }

    fn grid_to_image(&self, quad: &[Point2<f64>; 4]) -> Option<Homography> {
        let s = self.cells as f64;
        let grid = [
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ];
        homography_from_4pt(&grid, quad)
    }

    /// Read the grid; `None` when a cell falls outside the image.
    pub fn decode(&mut self, img: &GrayImageView<'_>, quad: &[Point2<f64>; 4]) -> Option<Observation> {
        let h = self.grid_to_image(quad)?;

        self.scratch.clear();
        for p in &self.points {
            let q = h.apply(*p);
            self.scratch.push(sample_mean_3x3(img, q.x, q.y)?);
        }

        self.scratch_thr.clear();
        for p in &self.threshold_points {
            let q = h.apply(*p);
            if let Some(v) = sample_mean_3x3(img, q.x, q.y) {
                self.scratch_thr.push(v);
            }
        }

        Some(classify(&self.scratch, &self.scratch_thr, self.cells, self.bits))
    }
}

fn classify(samples: &[u8], thr_samples: &[u8], cells: usize, bits: usize) -> Observation {
    let thr = if thr_samples.is_empty() {
        otsu_threshold_from_samples(samples)
    } else {
        otsu_threshold_from_samples(thr_samples)
    };

    let mut border_ok = 0u32;
    let mut border_total = 0u32;
    let mut code = 0u64;

    for cy in 0..cells {
        for cx in 0..cells {
            let is_black = samples[cy * cells + cx] <= thr;
            if cx == 0 || cy == 0 || cx + 1 == cells || cy + 1 == cells {
                border_total += 1;
                border_ok += is_black as u32;
            } else if is_black {
                code |= 1u64 << ((cy - 1) * bits + (cx - 1));
            }
        }
    }

    Observation {
        code,
        border_score: border_ok as f32 / border_total.max(1) as f32,
    }
}

fn sample_mean_3x3(img: &GrayImageView<'_>, x: f64, y: f64) -> Option<u8> {
    let ix = x.floor() as i64;
    let iy = y.floor() as i64;
    if ix < 1 || iy < 1 || ix + 1 >= img.width as i64 || iy + 1 >= img.height as i64 {
        return None;
    }

    let (ix, iy) = (ix as usize, iy as usize);
    let mut sum = 0u32;
    for yy in iy - 1..=iy + 1 {
        for xx in ix - 1..=ix + 1 {
            sum += img.data[yy * img.width + xx] as u32;
        }
    }
    Some((sum / 9) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use robot_calib_core::GrayImage;

    #[test]
    fn reads_bits_in_quad_order() {
        // 2x2 payload: only the top-right bit is white.
        let cell = 10i64;
        let mut img = GrayImage::filled(80, 80, 240);
        img.fill_rect(20, 20, 20 + 4 * cell, 20 + 4 * cell, 15);
        img.fill_rect(20 + 2 * cell, 20 + cell, 20 + 3 * cell, 20 + 2 * cell, 240);

        let quad = [
            Point2::new(20.0, 20.0),
            Point2::new(60.0, 20.0),
            Point2::new(60.0, 60.0),
            Point2::new(20.0, 60.0),
        ];
        let mut decoder = QuadDecoder::new(2).expect("decoder");
        let obs = decoder.decode(&img.view(), &quad).expect("inside image");
        assert_eq!(obs.border_score, 1.0);
        assert_eq!(obs.code, 0b1101);

        // Starting from the top-right corner rotates the reading.
        let quad_r = [quad[1], quad[2], quad[3], quad[0]];
        let obs_r = decoder.decode(&img.view(), &quad_r).expect("inside image");
        assert_eq!(obs_r.code, 0b1110);
    }

    #[test]
    fn quad_leaving_image_is_rejected() {
        let img = GrayImage::filled(30, 30, 0);
        let quad = [
            Point2::new(-5.0, -5.0),
            Point2::new(35.0, -5.0),
            Point2::new(35.0, 35.0),
            Point2::new(-5.0, 35.0),
        ];
        let mut decoder = QuadDecoder::new(4).expect("decoder");
        assert!(decoder.decode(&img.view(), &quad).is_none());
    }
}
