//! Image-backed pattern detection: ChESS corners, chessboard grid, ArUco.

use crate::config::ChessboardSpec;
use crate::interfaces::{ChessboardDetection, MarkerCorners, PatternDetector};
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use robot_calib_aruco::builtins::DICT_4X4_50;
use robot_calib_aruco::{ArucoDetector, ArucoParams};
use robot_calib_chessboard::{ChessboardDetector, ChessboardParams};
use robot_calib_core::{Corner, GrayImageView};
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced by the image helpers.
#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("invalid grayscale image buffer length (expected {expected} bytes, got {got})")]
    InvalidGrayBuffer { expected: usize, got: usize },

    #[error("invalid grayscale image dimensions (width={width}, height={height})")]
    InvalidGrayDimensions { width: u32, height: u32 },

    #[error(transparent)]
    Image(#[from] ::image::ImageError),
}

/// Reasonable default settings for the `chess-corners` ChESS detector.
pub fn default_chess_config() -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = 0.2;
    cfg.params.nms_radius = 2;
    cfg
}

/// Borrow an `image::GrayImage` as a core view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner::new(c.x, c.y, c.orientation, c.response)
}

/// ChESS corners adapted to the core corner type.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, cfg), fields(width = img.width(), height = img.height()))
)]
pub fn detect_corners(img: &::image::GrayImage, cfg: &ChessConfig) -> Vec<Corner> {
    find_chess_corners_image(img, cfg)
        .iter()
        .map(adapt_chess_corner)
        .collect()
}

/// Build an `image::GrayImage` from a raw grayscale buffer.
pub fn gray_image_from_slice(
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<::image::GrayImage, DetectError> {
    let w = usize::try_from(width).ok();
    let h = usize::try_from(height).ok();
    let Some(expected) = w.zip(h).and_then(|(w, h)| w.checked_mul(h)) else {
        return Err(DetectError::InvalidGrayDimensions { width, height });
    };
    if pixels.len() != expected {
        return Err(DetectError::InvalidGrayBuffer {
            expected,
            got: pixels.len(),
        });
    }
    ::image::GrayImage::from_raw(width, height, pixels.to_vec())
        .ok_or(DetectError::InvalidGrayDimensions { width, height })
}

/// Decode any supported image file and convert it to 8-bit gray.
pub fn load_gray_image(path: impl AsRef<Path>) -> Result<::image::GrayImage, DetectError> {
    Ok(::image::open(path)?.to_luma8())
}

/// [`PatternDetector`] for `image::GrayImage` frames.
pub struct ImagePatternDetector {
    pub chess: ChessConfig,
    chessboard: ChessboardDetector,
    aruco: ArucoDetector,
}

impl Default for ImagePatternDetector {
    fn default() -> Self {
        Self::new(
            default_chess_config(),
            ChessboardParams::default(),
            ArucoParams::default(),
        )
    }
}

impl ImagePatternDetector {
    pub fn new(chess: ChessConfig, chessboard: ChessboardParams, aruco: ArucoParams) -> Self {
        Self {
            chess,
            chessboard: ChessboardDetector::new(chessboard),
            aruco: ArucoDetector::new(DICT_4X4_50, aruco),
        }
    }
}

impl PatternDetector for ImagePatternDetector {
    type Frame = ::image::GrayImage;

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(cols = spec.cols, rows = spec.rows))
    )]
    fn find_chessboard(&self, frame: &Self::Frame, spec: &ChessboardSpec) -> ChessboardDetection {
        let corners = detect_corners(frame, &self.chess);
        match self.chessboard.detect(&corners, spec.cols, spec.rows) {
            Some(grid) => ChessboardDetection::from_corners(grid.corners, spec),
            None => ChessboardDetection::not_found(),
        }
    }

    fn detect_markers(&self, frame: &Self::Frame) -> Vec<MarkerCorners> {
        self.aruco
            .detect(&gray_view(frame))
            .into_iter()
            .map(|m| MarkerCorners {
                id: m.id,
                corners: m.corners,
            })
            .collect()
    }
}
