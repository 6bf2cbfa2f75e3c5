//! Message types exchanged between a session handle and its worker

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::capture::{Frame, ImageData};
use crate::error::ErrorInfo;
use crate::pipeline::MatchResult;

/// Messages sent from the handle to the worker
#[derive(Debug)]
pub enum SessionRequest {
    /// Process one frame
    Frame { frame: Frame, submitted_at: Instant },
    /// Stop the worker
    Shutdown,
}

/// Events sent from the worker to the producer
///
/// Serialized as `{"type": "...", "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SessionEvent {
    /// Reference table loaded; the session is ready
    Loaded,
    /// Matches for the most recently submitted frame
    Message(Vec<MatchResult>),
    /// Dataset or frame failure
    Error(ErrorInfo),
}

/// Wire request carrying one frame
#[derive(Debug, Clone, Deserialize)]
pub struct FrameRequest {
    #[serde(rename = "imageData")]
    pub image_data: ImageData,
}
