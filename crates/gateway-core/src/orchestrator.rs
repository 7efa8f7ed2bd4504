//! C10 — session lifecycle: `Created -> Active -> Closing -> Closed`.
//!
//! Owns the cancellation signal and the processor task handles; no other
//! component starts or stops a processor (spec.md §4.7, §5).

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use gateway_protocol::{GatewayEvent, SessionConfigAdvertised};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::now_ms;
use crate::emitter::{self, DataChannelSink};
use crate::session::Session;
use std::sync::Arc;

const DEFAULT_STOP_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Created,
    Active,
    Closing,
    Closed,
}

/// Owns one session's lifecycle from first track attachment through the
/// final `stream_closed` summary.
pub struct SessionOrchestrator {
    session: Arc<Session>,
    sink: Arc<dyn DataChannelSink>,
    cancel: CancellationToken,
    advertised: SessionConfigAdvertised,
    state: Mutex<OrchestratorState>,
    attached: Mutex<HashSet<TrackKind>>,
    ended: Mutex<HashSet<TrackKind>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stop_deadline: Duration,
}

impl SessionOrchestrator {
    pub fn new(
        session: Arc<Session>,
        sink: Arc<dyn DataChannelSink>,
        advertised: SessionConfigAdvertised,
    ) -> Self {
        Self {
            session,
            sink,
            cancel: CancellationToken::new(),
            advertised,
            state: Mutex::new(OrchestratorState::Created),
            attached: Mutex::new(HashSet::new()),
            ended: Mutex::new(HashSet::new()),
            handles: Mutex::new(Vec::new()),
            stop_deadline: DEFAULT_STOP_DEADLINE,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called when a track's processor task is spawned: marks the session
    /// Active and registers the track so multi-track close can wait for
    /// every attached track to end (spec.md §9 Open Question 3).
    pub fn attach_track(&self, kind: TrackKind, handle: JoinHandle<()>) {
        self.attached.lock().unwrap_or_else(|e| e.into_inner()).insert(kind);
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == OrchestratorState::Created {
            *state = OrchestratorState::Active;
        }
    }

    /// Sends `session_started` exactly once, and only if the session is not
    /// already Closing/Closed (spec.md §4.8).
    pub async fn on_data_channel_open(&self) -> bool {
        if self.state() != OrchestratorState::Created && self.state() != OrchestratorState::Active {
            return false;
        }
        let event = GatewayEvent::SessionStarted {
            session_id: self.session.session_id().to_string(),
            timestamp_ms: now_ms(),
            config: self.advertised,
        };
        emitter::emit(self.sink.as_ref(), &event).await
    }

    /// A track ended. Closes the session once every attached track has
    /// ended (never on the first track's end — spec.md §9 Open Question 3).
    pub async fn on_track_ended(&self, kind: TrackKind) {
        let all_ended = {
            let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
            let mut ended = self.ended.lock().unwrap_or_else(|e| e.into_inner());
            ended.insert(kind);
            !attached.is_empty() && *ended == *attached
        };
        if all_ended {
            self.begin_closing().await;
        }
    }

    /// The idle watchdog observed inactivity past the configured timeout.
    pub async fn on_idle_timeout(&self) {
        self.begin_closing().await;
    }

    /// `Active -> Closing -> Closed`: stop every processor (bounded by
    /// `stop_deadline`), close the session, emit the summary best-effort,
    /// and mark Closed. Idempotent.
    pub async fn begin_closing(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == OrchestratorState::Closing || *state == OrchestratorState::Closed {
                return;
            }
            *state = OrchestratorState::Closing;
        }

        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if tokio::time::timeout(self.stop_deadline, handle).await.is_err() {
                tracing::warn!("processor task did not stop within the deadline");
            }
        }

        let summary = self.session.close();
        let event = GatewayEvent::StreamClosed {
            session_id: self.session.session_id().to_string(),
            timestamp_ms: now_ms(),
            summary,
        };
        emitter::emit(self.sink.as_ref(), &event).await;

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = OrchestratorState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::fakes::RecordingSink;

    fn advertised() -> SessionConfigAdvertised {
        SessionConfigAdvertised {
            max_resolution: (1280, 720),
            confidence_threshold: 0.5,
            idle_timeout_sec: 30,
            bbox_format: "absolute_px",
        }
    }

    #[tokio::test]
    async fn single_track_end_does_not_close_multi_track_session() {
        let session = Arc::new(Session::new("s".to_string()));
        let sink = Arc::new(RecordingSink::new(true));
        let orchestrator = SessionOrchestrator::new(session, sink.clone(), advertised());

        orchestrator.attach_track(TrackKind::Video, tokio::spawn(async {}));
        orchestrator.attach_track(TrackKind::Audio, tokio::spawn(async {}));

        orchestrator.on_track_ended(TrackKind::Video).await;
        assert_eq!(orchestrator.state(), OrchestratorState::Active);

        orchestrator.on_track_ended(TrackKind::Audio).await;
        assert_eq!(orchestrator.state(), OrchestratorState::Closed);

        let sent = sink.sent();
        assert!(sent.iter().any(|s| s.contains("stream_closed")));
    }

    #[tokio::test]
    async fn begin_closing_is_idempotent() {
        let session = Arc::new(Session::new("s".to_string()));
        let sink = Arc::new(RecordingSink::new(true));
        let orchestrator = SessionOrchestrator::new(session, sink.clone(), advertised());
        orchestrator.attach_track(TrackKind::Video, tokio::spawn(async {}));

        orchestrator.begin_closing().await;
        orchestrator.begin_closing().await;

        let closed_events = sink.sent().iter().filter(|s| s.contains("stream_closed")).count();
        assert_eq!(closed_events, 1);
    }

    #[tokio::test]
    async fn session_started_skipped_once_closing() {
        let session = Arc::new(Session::new("s".to_string()));
        let sink = Arc::new(RecordingSink::new(true));
        let orchestrator = SessionOrchestrator::new(session, sink.clone(), advertised());
        orchestrator.begin_closing().await;

        let sent_before = sink.sent().len();
        let delivered = orchestrator.on_data_channel_open().await;
        assert!(!delivered);
        assert_eq!(sink.sent().len(), sent_before);
    }

    #[tokio::test]
    async fn session_started_delivered_while_active() {
        let session = Arc::new(Session::new("s".to_string()));
        let sink = Arc::new(RecordingSink::new(true));
        let orchestrator = SessionOrchestrator::new(session, sink.clone(), advertised());
        assert!(orchestrator.on_data_channel_open().await);
        assert!(sink.sent()[0].contains("session_started"));
    }
}
