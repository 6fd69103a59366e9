//! ArUco marker dictionaries and full-frame marker detection.
//!
//! The crate covers:
//! - an embedded `DICT_4X4_50` dictionary (compiled into the binary),
//! - matching observed codes against it under all four rotations,
//! - a detector that finds dark square blobs, fits quads to them and reads
//!   the bit grid through a per-quad homography.
//!
//! Detected corners are returned in the marker's own order
//! (top-left, top-right, bottom-right, bottom-left), independent of how the
//! marker is rotated in the image.

pub mod builtins;
mod components;
mod decode;
mod detector;
mod dictionary;
mod matcher;
mod quad;
mod threshold;

pub use detector::{ArucoDetector, ArucoParams, MarkerDetection};
pub use dictionary::Dictionary;
pub use matcher::{rotate_code_u64, Match, Matcher};
pub use threshold::{binarize, ThresholdMode};
