//! Wire shapes for the `detections` WebRTC data channel.
//!
//! Every server-to-client message is UTF-8 JSON, internally tagged on
//! `event_type`. `GatewayEvent` is the single authoritative representation —
//! there is no separate internal/serialized split (see SPEC_FULL.md §8.4).

use serde::{Deserialize, Serialize};

/// A single wound hypothesis. `bbox` is always absolute pixel coordinates
/// in this deployment (SPEC_FULL.md §8.2); `type_confidence` falls back to
/// `confidence` when a backend reports only one score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub id: u32,
    /// Mirror of `id`, kept for clients written against the legacy field name.
    pub wound_id: u32,
    pub cls: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub type_confidence: f32,
}

impl Detection {
    pub fn new(id: u32, cls: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self::with_type_confidence(id, cls, bbox, confidence, confidence)
    }

    pub fn with_type_confidence(
        id: u32,
        cls: impl Into<String>,
        bbox: BoundingBox,
        confidence: f32,
        type_confidence: f32,
    ) -> Self {
        Self {
            id,
            wound_id: id,
            cls: cls.into(),
            bbox,
            confidence,
            type_confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidImageFormat,
    FrameTooLarge,
    InferenceFailed,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_warning: Option<String>,
    pub processing_time_ms: u64,
    pub frames_dropped_since_last: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioAnalysis {
    pub risk_score: f32,
    pub mfcc_mean: f32,
    pub energy: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SessionConfigAdvertised {
    pub max_resolution: (u32, u32),
    pub confidence_threshold: f32,
    pub idle_timeout_sec: u64,
    /// Always `"absolute_px"` in this deployment; see SPEC_FULL.md §8.2.
    pub bbox_format: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub total_frames_received: u64,
    pub total_frames_processed: u64,
    pub total_frames_dropped: u64,
    pub total_detections: u64,
    pub duration_sec: f64,
}

/// Every message the gateway sends over the `detections` data channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GatewayEvent {
    SessionStarted {
        session_id: String,
        timestamp_ms: u64,
        config: SessionConfigAdvertised,
    },
    DetectionEvent {
        session_id: String,
        timestamp_ms: u64,
        frame_index: u64,
        has_wounds: bool,
        wounds: Vec<Detection>,
        metadata: DetectionMetadata,
    },
    AudioEvent {
        session_id: String,
        timestamp_ms: u64,
        analysis: AudioAnalysis,
        audio_seconds: f64,
        frames: u64,
        window_seconds: f64,
    },
    Error {
        session_id: String,
        timestamp_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame_index: Option<u64>,
        error_code: ErrorCode,
        error_message: String,
        severity: Severity,
    },
    StreamClosed {
        session_id: String,
        timestamp_ms: u64,
        summary: SessionSummary,
    },
    /// Answer to a client `{"type":"ping"}` text message (SPEC_FULL.md §3, C6).
    Pong {
        timestamp_ms: u64,
    },
}

impl GatewayEvent {
    /// `has_wounds` must always agree with `wounds.is_empty()` — enforced at
    /// construction so a caller cannot build an inconsistent event.
    pub fn detection(
        session_id: impl Into<String>,
        timestamp_ms: u64,
        frame_index: u64,
        wounds: Vec<Detection>,
        metadata: DetectionMetadata,
    ) -> Self {
        GatewayEvent::DetectionEvent {
            session_id: session_id.into(),
            timestamp_ms,
            frame_index,
            has_wounds: !wounds.is_empty(),
            wounds,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_event_roundtrips() {
        let event = GatewayEvent::detection(
            "sess-1",
            1_000,
            0,
            vec![Detection::new(0, "cut", BoundingBox::new(1.0, 2.0, 3.0, 4.0), 0.9)],
            DetectionMetadata {
                quality_warning: None,
                processing_time_ms: 12,
                frames_dropped_since_last: 0,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event_type":"detection_event""#));
        let back: GatewayEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn detection_has_wounds_matches_wounds_emptiness() {
        let empty = GatewayEvent::detection(
            "s",
            0,
            0,
            vec![],
            DetectionMetadata {
                quality_warning: None,
                processing_time_ms: 0,
                frames_dropped_since_last: 0,
            },
        );
        match empty {
            GatewayEvent::DetectionEvent {
                has_wounds, wounds, ..
            } => {
                assert!(!has_wounds);
                assert!(wounds.is_empty());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn error_event_uses_screaming_snake_case_codes() {
        let event = GatewayEvent::Error {
            session_id: "s".into(),
            timestamp_ms: 0,
            frame_index: Some(3),
            error_code: ErrorCode::InvalidImageFormat,
            error_message: "bad frame".into(),
            severity: Severity::Warning,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""error_code":"INVALID_IMAGE_FORMAT""#));
        assert!(json.contains(r#""severity":"warning""#));
    }

    #[test]
    fn session_started_advertises_bbox_format() {
        let event = GatewayEvent::SessionStarted {
            session_id: "s".into(),
            timestamp_ms: 0,
            config: SessionConfigAdvertised {
                max_resolution: (1280, 720),
                confidence_threshold: 0.5,
                idle_timeout_sec: 30,
                bbox_format: "absolute_px",
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""bbox_format":"absolute_px""#));
    }
}
