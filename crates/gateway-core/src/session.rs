//! C7 — the aggregate of per-session counters and its close/summary contract.

use std::sync::Mutex;

use gateway_protocol::SessionSummary;

use crate::clock::now_ms;

#[derive(Debug, Default, Clone)]
struct SessionCounters {
    end_time_ms: u64,
    frame_count: u64,
    audio_frame_count: u64,
    audio_seconds: f64,
    total_received: u64,
    dropped_count: u64,
    detection_count: u64,
    last_activity_ms: u64,
    closed: bool,
}

/// One per peer connection. Counters are mutated only through the recorder
/// methods below, each of which takes the internal lock so video and audio
/// processors can update concurrently (spec.md §5 "Cross-task counters").
pub struct Session {
    session_id: String,
    start_time_ms: u64,
    inner: Mutex<SessionCounters>,
}

impl Session {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            start_time_ms: now_ms(),
            inner: Mutex::new(SessionCounters::default()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn start_time_ms(&self) -> u64 {
        self.start_time_ms
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionCounters> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A raw track frame arrived, whether or not it is ultimately processed
    /// or dropped.
    pub fn record_received(&self) {
        let mut counters = self.lock();
        if counters.closed {
            return;
        }
        counters.total_received += 1;
    }

    /// A video frame was fully processed (spec.md §4.4 step 7).
    pub fn record_frame(&self) {
        let mut counters = self.lock();
        if counters.closed {
            return;
        }
        counters.frame_count += 1;
        counters.last_activity_ms = now_ms();
    }

    /// A buffer evicted an item under backpressure.
    pub fn record_dropped(&self) {
        let mut counters = self.lock();
        if counters.closed {
            return;
        }
        counters.dropped_count += 1;
    }

    pub fn record_detection(&self, count: u64) {
        let mut counters = self.lock();
        if counters.closed {
            return;
        }
        counters.detection_count += count;
    }

    /// An audio window was analyzed (spec.md §4.5 step 5).
    pub fn record_audio(&self, frames: u64, seconds: f64) {
        let mut counters = self.lock();
        if counters.closed {
            return;
        }
        counters.audio_frame_count += frames;
        counters.audio_seconds += seconds;
        counters.last_activity_ms = now_ms();
    }

    /// `(now - last_activity_ms) > timeout_ms`, strict — exactly at the
    /// timeout is NOT yet idle (spec.md §8).
    pub fn is_idle(&self, now: u64, timeout_ms: u64) -> bool {
        let counters = self.lock();
        now.saturating_sub(counters.last_activity_ms) > timeout_ms
    }

    /// Close exactly once; a second call is a no-op returning the same
    /// summary (spec.md §4.7, §8).
    pub fn close(&self) -> SessionSummary {
        let mut counters = self.lock();
        if !counters.closed {
            counters.end_time_ms = now_ms().max(self.start_time_ms);
            counters.closed = true;
        }
        self.summary_locked(&counters)
    }

    fn summary_locked(&self, counters: &SessionCounters) -> SessionSummary {
        let duration_sec = (counters.end_time_ms.saturating_sub(self.start_time_ms)) as f64 / 1000.0;
        SessionSummary {
            session_id: self.session_id.clone(),
            total_frames_received: counters.total_received,
            total_frames_processed: counters.frame_count,
            total_frames_dropped: counters.dropped_count,
            total_detections: counters.detection_count,
            duration_sec,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    pub(crate) fn frame_count(&self) -> u64 {
        self.lock().frame_count
    }

    #[cfg(test)]
    pub(crate) fn detection_count(&self) -> u64 {
        self.lock().detection_count
    }
}
