//! Thresholding utilities for quad extraction and marker decoding.

use robot_calib_core::GrayImageView;
use serde::{Deserialize, Serialize};

/// How the full frame is binarized before quad extraction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Single global Otsu threshold.
    Otsu,
    /// Pixel is dark when it is `offset` below the mean of a `window x window` box.
    Adaptive { window: usize, offset: u8 },
}

impl Default for ThresholdMode {
    fn default() -> Self {
        ThresholdMode::Adaptive {
            window: 31,
            offset: 7,
        }
    }
}

/// Compute Otsu threshold from a set of sample intensities.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let (min_v, max_v) = samples
        .iter()
        .fold((255u8, 0u8), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    if hist.iter().filter(|&&h| h > 0).count() <= 2 {
        return ((min_v as u16 + max_v as u16) / 2) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += t as f64 * h as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}

/// Binarize a frame: `true` marks a dark (candidate marker) pixel.
pub fn binarize(img: &GrayImageView<'_>, mode: ThresholdMode) -> Vec<bool> {
    match mode {
        ThresholdMode::Otsu => {
            let t = otsu_threshold_from_samples(img.data);
            img.data.iter().map(|&v| v <= t).collect()
        }
        ThresholdMode::Adaptive { window, offset } => adaptive_dark_mask(img, window, offset),
    }
}

fn adaptive_dark_mask(img: &GrayImageView<'_>, window: usize, offset: u8) -> Vec<bool> {
    let (w, h) = (img.width, img.height);
    if w == 0 || h == 0 {
        return Vec::new();
    }

    // Summed-area table with a zero row/column in front.
    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row = 0u64;
        for x in 0..w {
            row += img.data[y * w + x] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row;
        }
    }

    let r = (window.max(3) / 2) as i64;
    let mut out = vec![false; w * h];
    for y in 0..h {
        let y0 = (y as i64 - r).max(0) as usize;
        let y1 = (y as i64 + r + 1).min(h as i64) as usize;
        for x in 0..w {
            let x0 = (x as i64 - r).max(0) as usize;
            let x1 = (x as i64 + r + 1).min(w as i64) as usize;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let area = ((x1 - x0) * (y1 - y0)) as f64;
            let mean = sum as f64 / area;
            out[y * w + x] = (img.data[y * w + x] as f64) < mean - offset as f64;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use robot_calib_core::GrayImage;

    #[test]
    fn otsu_splits_bimodal_samples() {
        let mut s = vec![20u8; 50];
        s.extend(vec![30u8; 50]);
        s.extend(vec![200u8; 60]);
        s.extend(vec![220u8; 40]);
        let t = otsu_threshold_from_samples(&s);
        assert!((30..200).contains(&t), "threshold {t}");
    }

    #[test]
    fn otsu_degenerate_inputs() {
        assert_eq!(otsu_threshold_from_samples(&[]), 127);
        assert_eq!(otsu_threshold_from_samples(&[9, 9, 9]), 9);
        assert_eq!(otsu_threshold_from_samples(&[0, 200, 0]), 100);
    }

    #[test]
    fn adaptive_marks_dark_square_on_white() {
        let mut img = GrayImage::filled(40, 40, 230);
        img.fill_rect(15, 15, 25, 25, 10);
        let mask = binarize(
            &img.view(),
            ThresholdMode::Adaptive {
                window: 15,
                offset: 7,
            },
        );
        assert!(mask[20 * 40 + 16]);
        assert!(!mask[2 * 40 + 2]);
        assert!(!mask[20 * 40 + 30]);
    }
}
