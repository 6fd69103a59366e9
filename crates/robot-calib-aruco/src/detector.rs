use crate::components::{boundary_pixels, label_components};
use crate::decode::QuadDecoder;
use crate::quad::{extreme_corners, refine_corners, side_ratio, signed_area2};
use crate::threshold::{binarize, ThresholdMode};
use crate::{Dictionary, Matcher};
use log::{debug, trace};
use nalgebra::Point2;
use robot_calib_core::GrayImageView;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Parameters of the full-frame marker detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ArucoParams {
    pub threshold: ThresholdMode,
    /// Smallest dark blob, in pixels, considered as a marker candidate.
    pub min_component_area: usize,
    /// Smallest accepted quad side in pixels.
    pub min_side_px: f64,
    /// Reject quads whose shortest/longest side ratio is below this.
    pub min_side_ratio: f64,
    /// Fit a line to each side and intersect them instead of using extreme pixels.
    pub refine_corners: bool,
    /// Fraction of border cells that must read black.
    pub min_border_score: f32,
    /// Accepted bit errors, capped by the dictionary.
    pub max_hamming: u8,
}

impl Default for ArucoParams {
    fn default() -> Self {
        Self {
            threshold: ThresholdMode::default(),
            min_component_area: 64,
            min_side_px: 12.0,
            min_side_ratio: 0.3,
            refine_corners: true,
            min_border_score: 0.85,
            max_hamming: 1,
        }
    }
}

/// One decoded marker in image coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    pub id: u32,
    /// Marker corners in marker order: top-left, top-right, bottom-right, bottom-left.
    pub corners: [Point2<f64>; 4],
    pub rotation: u8,
    pub hamming: u8,
    pub border_score: f32,
}

impl MarkerDetection {
    pub fn top_left(&self) -> Point2<f64> {
        self.corners[0]
    }

    pub fn center(&self) -> Point2<f64> {
        let s = self
            .corners
            .iter()
            .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
        Point2::from(s / 4.0)
    }
}

/// Square-marker detector: threshold, blob, quad, sample, match.
pub struct ArucoDetector {
    pub params: ArucoParams,
    matcher: Matcher,
}

impl ArucoDetector {
    pub fn new(dict: Dictionary, params: ArucoParams) -> Self {
        let matcher = Matcher::new(dict, params.max_hamming);
        Self { params, matcher }
    }

    pub fn dictionary(&self) -> Dictionary {
        self.matcher.dictionary()
    }

    /// Detect all markers of the dictionary; at most one detection per id, sorted by id.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img), fields(w = img.width, h = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>) -> Vec<MarkerDetection> {
        let (w, h) = (img.width, img.height);
        if w == 0 || h == 0 || img.data.len() < w * h {
            return Vec::new();
        }
        let Some(mut decoder) = QuadDecoder::new(self.dictionary().marker_size) else {
            return Vec::new();
        };

        let mask = binarize(img, self.params.threshold);
        let components = label_components(&mask, w, h, self.params.min_component_area);
        trace!("aruco: {} dark components", components.len());

        let mut out = Vec::new();
        for comp in &components {
            if comp.touches_border(w, h) {
                continue;
            }
            let Some(coarse) = extreme_corners(comp) else {
                continue;
            };

            let quad = if self.params.refine_corners {
                let (cx, cy) = comp.centroid();
                let boundary = boundary_pixels(comp, &mask, w, h);
                refine_corners(&coarse, &boundary, Point2::new(cx, cy)).unwrap_or(coarse)
            } else {
                coarse
            };

            if signed_area2(&quad) <= 0.0 || side_ratio(&quad) < self.params.min_side_ratio {
                continue;
            }
            let shortest = (0..4)
                .map(|i| (quad[(i + 1) % 4] - quad[i]).norm())
                .fold(f64::INFINITY, f64::min);
            if shortest < self.params.min_side_px {
                continue;
            }

            let Some(obs) = decoder.decode(img, &quad) else {
                continue;
            };
            if obs.border_score < self.params.min_border_score {
                continue;
            }
            let Some(m) = self.matcher.match_code(obs.code) else {
                continue;
            };

            let r = m.rotation as usize;
            let corners = [0, 1, 2, 3].map(|k| quad[(r + k) % 4]);
            out.push(MarkerDetection {
                id: m.id,
                corners,
                rotation: m.rotation,
                hamming: m.hamming,
                border_score: obs.border_score,
            });
        }

        let out = dedup_by_id_keep_best(out);
        debug!(
            "aruco: {} markers decoded {:?}",
            out.len(),
            out.iter().map(|d| d.id).collect::<Vec<_>>()
        );
        out
    }
}

fn dedup_by_id_keep_best(dets: Vec<MarkerDetection>) -> Vec<MarkerDetection> {
    let mut best: HashMap<u32, MarkerDetection> = HashMap::new();
    for d in dets {
        match best.get(&d.id) {
            Some(cur)
                if (cur.hamming, -cur.border_score) <= (d.hamming, -d.border_score) => {}
            _ => {
                best.insert(d.id, d);
            }
        }
    }
    let mut out: Vec<_> = best.into_values().collect();
    out.sort_by_key(|d| d.id);
    out
}
