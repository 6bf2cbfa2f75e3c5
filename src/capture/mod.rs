//! Frame Input Layer
//!
//! Frames arrive from an external video source as raw pixel buffers, either
//! in-process or over the session wire protocol. This layer owns their
//! representation and validation; capturing them is the caller's job.

pub mod frame;

pub use frame::{Frame, ImageData, PixelData, PixelLayout};
