//! Vision Layer
//!
//! Locates card outlines in a frame and turns each one into an upright,
//! cropped card image ready for hashing.

pub mod detection;
pub mod geometry;
pub mod preprocess;
pub mod rectify;

pub use detection::{extract_quadrilaterals, DetectionConfig, QuadDetector};
pub use geometry::{Point, Quadrilateral};
pub use rectify::{rectify, RectifyConfig};
