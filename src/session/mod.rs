//! Streaming Session
//!
//! Owns a background worker that loads the reference table once and then
//! processes one frame at a time. The producer talks to it through a
//! [`SessionHandle`]: frames go in over a channel, `loaded` / `message` /
//! `error` events come back over another.

pub mod messages;
pub mod state;

pub use messages::{FrameRequest, SessionEvent, SessionRequest};
pub use state::{SessionState, SessionStats, SharedSessionState};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::Frame;
use crate::config::AppConfig;
use crate::dataset::TableSource;
use crate::error::{ErrorInfo, ScanResult, SessionError};
use crate::matching::{MatchConfig, Matcher};
use crate::pipeline::{FramePipeline, PipelineConfig};

/// Producer-side handle to a running session
pub struct SessionHandle {
    id: Uuid,
    shared: Arc<RwLock<SharedSessionState>>,
    to_worker: Sender<SessionRequest>,
    events: Receiver<SessionEvent>,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start a session; the reference table is loaded on the worker thread
    pub fn spawn(config: &AppConfig, source: Box<dyn TableSource>) -> Self {
        let id = Uuid::new_v4();
        let shared = Arc::new(RwLock::new(SharedSessionState::default()));
        let (to_worker, requests) = unbounded();
        let (event_tx, events) = unbounded();

        let worker = Worker {
            id,
            pipeline_config: config.pipeline_config(),
            match_config: config.matching.clone(),
            shared: shared.clone(),
            requests,
            events: event_tx,
        };
        let handle = std::thread::spawn(move || worker.run(source));

        info!(session = %id, "Session started");
        Self {
            id,
            shared,
            to_worker,
            events,
            worker: Some(handle),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.read().state
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.read().stats.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.read().last_error.clone()
    }

    /// Submit a frame; only one frame may be in flight at a time
    pub fn submit(&self, frame: Frame) -> Result<(), SessionError> {
        begin_frame(&self.shared)?;

        let request = SessionRequest::Frame {
            frame,
            submitted_at: Instant::now(),
        };
        if self.to_worker.send(request).is_err() {
            self.shared.write().state = SessionState::Terminated;
            return Err(SessionError::Terminated);
        }
        Ok(())
    }

    /// Next event, blocking; `None` once the worker is gone and drained
    pub fn recv(&self) -> Option<SessionEvent> {
        self.events.recv().ok()
    }

    /// Next event, waiting at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next event if one is already waiting
    pub fn try_recv(&self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Event receiver, for use with `crossbeam_channel::select!`
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.to_worker.send(SessionRequest::Shutdown);
        let was_loading = {
            let mut shared = self.shared.write();
            let loading = shared.state == SessionState::Loading;
            shared.state = SessionState::Terminated;
            loading
        };

        let Some(handle) = self.worker.take() else {
            return;
        };
        if was_loading {
            // The worker sees Terminated once its load returns and exits on its own
            debug!(session = %self.id, "Detaching worker still loading the reference table");
            return;
        }
        if handle.join().is_err() {
            warn!(session = %self.id, "Session worker panicked");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Move `Ready` to `Processing`, or explain why a frame cannot be accepted
fn begin_frame(shared: &RwLock<SharedSessionState>) -> Result<(), SessionError> {
    let mut shared = shared.write();
    match shared.state {
        SessionState::Ready => {
            shared.state = SessionState::Processing;
            Ok(())
        }
        SessionState::Loading => Err(SessionError::NotReady),
        SessionState::Processing => Err(SessionError::Busy),
        SessionState::Terminated => Err(SessionError::Terminated),
    }
}

struct Worker {
    id: Uuid,
    pipeline_config: PipelineConfig,
    match_config: MatchConfig,
    shared: Arc<RwLock<SharedSessionState>>,
    requests: Receiver<SessionRequest>,
    events: Sender<SessionEvent>,
}

impl Worker {
    fn run(self, source: Box<dyn TableSource>) {
        let id = self.id;
        info!(session = %id, "Loading reference table from {}", source.describe());

        let start = Instant::now();
        let pipeline = match self.load(source) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(session = %id, "Failed to load reference table: {}", e);
                {
                    let mut shared = self.shared.write();
                    shared.state = SessionState::Terminated;
                    shared.set_error(e.to_string());
                }
                let _ = self.events.send(SessionEvent::Error(ErrorInfo::from(&e)));
                return;
            }
        };

        let entries = pipeline.matcher().table().len();
        let load_time = start.elapsed();
        info!(session = %id, "Loaded {} reference hashes in {:?}", entries, load_time);
        {
            let mut shared = self.shared.write();
            if shared.state == SessionState::Terminated {
                info!(session = %id, "Session closed while loading");
                return;
            }
            shared.stats.reference_entries = entries;
            shared.stats.load_time_ms = Some(load_time.as_millis() as u64);
            shared.state = SessionState::Ready;
        }
        if self.events.send(SessionEvent::Loaded).is_err() {
            return self.terminate();
        }

        for request in self.requests.iter() {
            match request {
                SessionRequest::Shutdown => break,
                SessionRequest::Frame {
                    frame,
                    submitted_at,
                } => {
                    let event = self.process(&pipeline, &frame, submitted_at);
                    if self.events.send(event).is_err() {
                        debug!(session = %id, "Event receiver dropped");
                        break;
                    }
                }
            }
        }

        self.terminate();
    }

    fn load(&self, source: Box<dyn TableSource>) -> ScanResult<FramePipeline> {
        self.pipeline_config.hashing.validate()?;
        let table = source.load(self.pipeline_config.hashing.bit_len())?;
        let matcher = Matcher::new(Arc::new(table), &self.match_config);
        FramePipeline::new(self.pipeline_config.clone(), Arc::new(matcher))
    }

    /// Run one frame and return to `Ready` before the event goes out
    fn process(&self, pipeline: &FramePipeline, frame: &Frame, submitted_at: Instant) -> SessionEvent {
        let result = pipeline.process_frame(frame);
        let latency = submitted_at.elapsed();

        let mut shared = self.shared.write();
        if shared.state == SessionState::Processing {
            shared.state = SessionState::Ready;
        }

        match result {
            Ok(matches) => {
                shared.stats.record_frame(latency, Some(matches.len()));
                shared.clear_error();
                debug!(
                    session = %self.id,
                    "Frame done: {} matches, round trip {:?}",
                    matches.len(),
                    latency
                );
                SessionEvent::Message(matches)
            }
            Err(e) => {
                shared.stats.record_frame(latency, None);
                shared.set_error(e.to_string());
                warn!(session = %self.id, "Frame failed: {}", e);
                SessionEvent::Error(ErrorInfo::from(&e))
            }
        }
    }

    fn terminate(&self) {
        self.shared.write().state = SessionState::Terminated;
        info!(session = %self.id, "Session terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelLayout;
    use crate::dataset::{DatasetConfig, DatasetLoader, DatasetManager, DatasetSource};
    use crate::matching::{CardIdentity, ReferenceEntry, ReferenceTable};
    use crate::phash::PerceptualHash;

    const WAIT: Duration = Duration::from_secs(30);

    /// Table source that blocks until the test opens the gate
    struct GatedSource {
        gate: Receiver<()>,
        table: ReferenceTable,
    }

    impl TableSource for GatedSource {
        fn describe(&self) -> String {
            "gated".to_string()
        }

        fn load(self: Box<Self>, bits: u32) -> ScanResult<ReferenceTable> {
            let this = *self;
            let _ = this.gate.recv();
            Box::new(this.table).load(bits)
        }
    }

    /// Table source that takes `delay` to load
    struct SlowSource {
        delay: Duration,
        table: ReferenceTable,
    }

    impl TableSource for SlowSource {
        fn describe(&self) -> String {
            "slow".to_string()
        }

        fn load(self: Box<Self>, bits: u32) -> ScanResult<ReferenceTable> {
            let this = *self;
            std::thread::sleep(this.delay);
            Box::new(this.table).load(bits)
        }
    }

    fn small_table() -> ReferenceTable {
        ReferenceTable::from_entries(
            256,
            vec![ReferenceEntry {
                card: CardIdentity::new("a", "A", "s"),
                phash: PerceptualHash::zero(256),
            }],
        )
        .unwrap()
    }

    fn black_frame() -> Frame {
        Frame::new(vec![0; 64 * 48 * 3], 64, 48, PixelLayout::Bgr)
    }

    #[test]
    fn test_lifecycle_loaded_then_message() {
        let session = SessionHandle::spawn(&AppConfig::default(), Box::new(small_table()));

        assert!(matches!(session.recv_timeout(WAIT), Some(SessionEvent::Loaded)));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.stats().reference_entries, 1);

        session.submit(black_frame()).unwrap();
        match session.recv_timeout(WAIT) {
            Some(SessionEvent::Message(results)) => assert!(results.is_empty()),
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(session.state(), SessionState::Ready);
        let stats = session.stats();
        assert_eq!(stats.frames_processed, 1);
        assert!(stats.last_latency_ms.is_some());

        session.shutdown();
    }

    #[test]
    fn test_submit_before_ready_is_rejected() {
        let (open, gate) = unbounded();
        let source = GatedSource {
            gate,
            table: small_table(),
        };
        let session = SessionHandle::spawn(&AppConfig::default(), Box::new(source));

        assert_eq!(session.state(), SessionState::Loading);
        assert_eq!(session.submit(black_frame()), Err(SessionError::NotReady));

        open.send(()).unwrap();
        assert!(matches!(session.recv_timeout(WAIT), Some(SessionEvent::Loaded)));
        assert!(session.submit(black_frame()).is_ok());
    }

    #[test]
    fn test_one_frame_in_flight() {
        let shared = RwLock::new(SharedSessionState {
            state: SessionState::Ready,
            ..Default::default()
        });

        assert_eq!(begin_frame(&shared), Ok(()));
        assert_eq!(shared.read().state, SessionState::Processing);
        assert_eq!(begin_frame(&shared), Err(SessionError::Busy));

        shared.write().state = SessionState::Terminated;
        assert_eq!(begin_frame(&shared), Err(SessionError::Terminated));
    }

    #[test]
    fn test_frame_error_keeps_session_ready() {
        let session = SessionHandle::spawn(&AppConfig::default(), Box::new(small_table()));
        assert!(matches!(session.recv_timeout(WAIT), Some(SessionEvent::Loaded)));

        session
            .submit(Frame::new(vec![0; 3], 10, 10, PixelLayout::Rgba))
            .unwrap();
        match session.recv_timeout(WAIT) {
            Some(SessionEvent::Error(info)) => assert_eq!(info.kind, "frame_processing"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.last_error().is_some());

        session.submit(black_frame()).unwrap();
        assert!(matches!(session.recv_timeout(WAIT), Some(SessionEvent::Message(_))));
        assert_eq!(session.stats().frames_failed, 1);
        assert_eq!(session.stats().frames_processed, 1);
    }

    #[test]
    fn test_dataset_failure_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DatasetConfig {
            offline: true,
            ..Default::default()
        };
        let manager = DatasetManager::with_dir(dir.path().join("datasets"), &config).unwrap();
        let loader = DatasetLoader::new(manager, DatasetSource::Path(dir.path().join("missing.csv")));

        let session = SessionHandle::spawn(&AppConfig::default(), Box::new(loader));
        match session.recv_timeout(WAIT) {
            Some(SessionEvent::Error(info)) => assert_eq!(info.kind, "dataset_load"),
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(session.submit(black_frame()), Err(SessionError::Terminated));
    }

    #[test]
    fn test_shutdown_terminates_worker() {
        let session = SessionHandle::spawn(&AppConfig::default(), Box::new(small_table()));
        assert!(matches!(session.recv_timeout(WAIT), Some(SessionEvent::Loaded)));

        let shared = session.shared.clone();
        session.shutdown();
        assert_eq!(shared.read().state, SessionState::Terminated);
    }

    #[test]
    fn test_drop_during_loading_returns_immediately() {
        let delay = Duration::from_secs(2);
        let source = SlowSource {
            delay,
            table: small_table(),
        };
        let session = SessionHandle::spawn(&AppConfig::default(), Box::new(source));
        let shared = session.shared.clone();

        let start = Instant::now();
        drop(session);
        assert!(start.elapsed() < Duration::from_secs(1), "drop took {:?}", start.elapsed());
        assert_eq!(shared.read().state, SessionState::Terminated);

        // Once the load finishes the worker exits without becoming ready
        std::thread::sleep(delay + Duration::from_millis(500));
        assert_eq!(shared.read().state, SessionState::Terminated);
        assert_eq!(shared.read().stats.reference_entries, 0);
    }
}
