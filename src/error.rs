//! Error taxonomy for the recognition pipeline and the streaming session

use serde::Serialize;
use thiserror::Error;

/// Errors produced by the recognition pipeline
#[derive(Debug, Error)]
pub enum ScanError {
    /// The reference dataset could not be fetched or parsed
    #[error("failed to load reference dataset: {0}")]
    DatasetLoad(String),

    /// A detected quadrilateral could not be rectified
    #[error("degenerate region: {0}")]
    DegenerateRegion(String),

    /// A submitted frame could not be processed
    #[error("frame processing failed: {0}")]
    FrameProcessing(String),

    /// A hash literal was malformed or had the wrong width
    #[error("invalid perceptual hash: {0}")]
    InvalidHash(String),

    /// Configuration values are out of range
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ScanError {
    /// Stable identifier used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::DatasetLoad(_) => "dataset_load",
            ScanError::DegenerateRegion(_) => "degenerate_region",
            ScanError::FrameProcessing(_) => "frame_processing",
            ScanError::InvalidHash(_) => "invalid_hash",
            ScanError::Config(_) => "config",
        }
    }
}

/// Producer-side protocol violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The reference table is still loading
    #[error("session is not ready")]
    NotReady,
    /// A frame is already being processed
    #[error("a frame is already in flight")]
    Busy,
    /// The worker has stopped
    #[error("session has terminated")]
    Terminated,
}

/// Error payload carried by the `error` session event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    /// Machine-readable error kind
    pub kind: String,
    /// Human-readable description
    pub message: String,
}

impl From<&ScanError> for ErrorInfo {
    fn from(err: &ScanError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
