//! Session lifecycle state shared between the handle and its worker

use serde::Serialize;
use std::time::Duration;

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Reference table is being fetched and parsed
    #[default]
    Loading,
    /// Idle and accepting a frame
    Ready,
    /// A frame is in flight
    Processing,
    /// Worker has stopped; no further frames are accepted
    Terminated,
}

/// Counters kept by the worker
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Reference table size once loaded
    pub reference_entries: usize,
    /// Time spent loading the reference table
    pub load_time_ms: Option<u64>,
    /// Frames that produced a result list
    pub frames_processed: u64,
    /// Frames that produced an error event
    pub frames_failed: u64,
    /// Matches in the most recent result
    pub last_match_count: usize,
    /// Submission-to-result latency of the most recent frame
    pub last_latency_ms: Option<u64>,
    total_latency_ms: u64,
}

impl SessionStats {
    /// Record one completed frame
    pub fn record_frame(&mut self, latency: Duration, matches: Option<usize>) {
        let ms = latency.as_millis() as u64;
        self.last_latency_ms = Some(ms);
        self.total_latency_ms += ms;

        match matches {
            Some(count) => {
                self.frames_processed += 1;
                self.last_match_count = count;
            }
            None => self.frames_failed += 1,
        }
    }

    /// Mean latency over every completed frame
    pub fn average_latency_ms(&self) -> Option<f64> {
        let frames = self.frames_processed + self.frames_failed;
        (frames > 0).then(|| self.total_latency_ms as f64 / frames as f64)
    }
}

/// State behind the session's lock
#[derive(Debug, Clone, Default)]
pub struct SharedSessionState {
    pub state: SessionState,
    pub stats: SessionStats,
    /// Most recent error message, if any
    pub last_error: Option<String>,
}

impl SharedSessionState {
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_latency_average() {
        let mut stats = SessionStats::default();
        assert_eq!(stats.average_latency_ms(), None);

        stats.record_frame(Duration::from_millis(10), Some(2));
        stats.record_frame(Duration::from_millis(30), None);

        assert_eq!(stats.frames_processed, 1);
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.last_match_count, 2);
        assert_eq!(stats.last_latency_ms, Some(30));
        assert_eq!(stats.average_latency_ms(), Some(20.0));
    }

    #[test]
    fn test_error_tracking() {
        let mut shared = SharedSessionState::default();
        assert_eq!(shared.state, SessionState::Loading);

        shared.set_error("boom");
        assert_eq!(shared.last_error.as_deref(), Some("boom"));
        shared.clear_error();
        assert!(shared.last_error.is_none());
    }
}
