//! C6 — serialize and deliver an event over the data channel, gated on
//! channel readiness. Never blocks the pipeline beyond the channel's own
//! non-blocking send (spec.md §4.6).

use async_trait::async_trait;
use gateway_protocol::GatewayEvent;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("data channel send failed: {0}")]
    Send(String),
}

/// Abstraction over the WebRTC data channel so the pipeline is testable
/// without a real peer connection.
#[async_trait]
pub trait DataChannelSink: Send + Sync {
    fn is_open(&self) -> bool;
    async fn send_text(&self, text: String) -> Result<(), SinkError>;
}

/// Serialize `event`, check readiness, deliver or drop. Returns whether the
/// event was actually sent.
pub async fn emit(sink: &dyn DataChannelSink, event: &GatewayEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize event for emission");
            return false;
        }
    };

    if !sink.is_open() {
        tracing::debug!(event = ?event, "data channel not open, dropping event");
        return false;
    }

    match sink.send_text(json).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "event send failed");
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::RecordingSink;
    use super::*;
    use gateway_protocol::{DetectionMetadata, GatewayEvent};

    fn sample_event() -> GatewayEvent {
        GatewayEvent::detection(
            "sess",
            0,
            0,
            vec![],
            DetectionMetadata {
                quality_warning: None,
                processing_time_ms: 1,
                frames_dropped_since_last: 0,
            },
        )
    }

    #[tokio::test]
    async fn open_channel_delivers_event() {
        let sink = RecordingSink::new(true);
        assert!(emit(&sink, &sample_event()).await);
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn closed_channel_drops_event_silently() {
        let sink = RecordingSink::new(false);
        assert!(!emit(&sink, &sample_event()).await);
        assert!(sink.sent().is_empty());
    }
}
