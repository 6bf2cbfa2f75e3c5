//! cardscan - trading card recognition from video frames
//!
//! Finds card outlines in a frame, straightens each one, hashes it with a
//! DCT perceptual hash and looks the hash up in a reference table by
//! Hamming distance. A [`session::SessionHandle`] wraps the pipeline in a
//! background worker for streaming use.

pub mod capture;
pub mod config;
pub mod dataset;
pub mod error;
pub mod matching;
pub mod phash;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod vision;

pub use capture::Frame;
pub use config::AppConfig;
pub use error::{ScanError, ScanResult, SessionError};
pub use matching::{CardIdentity, Matcher, ReferenceTable};
pub use phash::PerceptualHash;
pub use pipeline::{FramePipeline, MatchResult};
pub use session::{SessionEvent, SessionHandle};
