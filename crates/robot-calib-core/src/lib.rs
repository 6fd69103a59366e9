//! Core types and utilities for camera-to-robot calibration.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete camera, robot driver or image decoding crate.

mod corner;
mod homography;
mod image;
mod logger;
mod pose;

pub use corner::Corner;
pub use homography::{
    estimate_homography, estimate_homography_dlt, homography_from_4pt, reprojection_errors,
    Homography, HomographyError, HomographyFit, HomographyMethod,
};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView};
pub use pose::Pose6;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_ENV};
