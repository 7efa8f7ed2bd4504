//! Ephemeral values flowing producer -> buffer -> processor (spec.md §3).

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Video,
    Audio,
}

/// A single time-slice of a track, not retained after processing.
#[derive(Debug, Clone)]
pub struct FrameItem {
    pub arrival_time_ms: u64,
    pub raw_payload: Bytes,
    pub kind: FrameKind,
}

impl FrameItem {
    pub fn video(arrival_time_ms: u64, raw_payload: Bytes) -> Self {
        Self {
            arrival_time_ms,
            raw_payload,
            kind: FrameKind::Video,
        }
    }

    pub fn audio(arrival_time_ms: u64, raw_payload: Bytes) -> Self {
        Self {
            arrival_time_ms,
            raw_payload,
            kind: FrameKind::Audio,
        }
    }
}
