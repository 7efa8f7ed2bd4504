//! C8 — consumes video frames, runs preprocess + inference, emits detections.

use std::sync::Arc;
use std::time::Instant;

use gateway_protocol::{DetectionMetadata, ErrorCode, GatewayEvent, Severity};
use tokio_util::sync::CancellationToken;

use crate::buffer::FrameBuffer;
use crate::clock::now_ms;
use crate::emitter::{self, DataChannelSink};
use crate::inference::InferenceRouter;
use crate::items::FrameItem;
use crate::preprocess::{self, DecodeError};
use crate::session::Session;

#[derive(Debug, Clone, Copy)]
pub struct VideoProcessorConfig {
    pub max_frame_width: u32,
    pub max_frame_height: u32,
    pub max_frame_size_bytes: u64,
    pub blur_warning_threshold: f64,
}

/// Single consumer task per video track. Runs until cancelled; every
/// per-frame failure is isolated and surfaced as an `ErrorEvent` (spec.md
/// §4.4, §7).
pub struct VideoProcessor {
    session: Arc<Session>,
    buffer: Arc<FrameBuffer<FrameItem>>,
    router: Arc<InferenceRouter>,
    sink: Arc<dyn DataChannelSink>,
    config: VideoProcessorConfig,
    frame_index: u64,
    drops_since_last_emit: u64,
}

impl VideoProcessor {
    pub fn new(
        session: Arc<Session>,
        buffer: Arc<FrameBuffer<FrameItem>>,
        router: Arc<InferenceRouter>,
        sink: Arc<dyn DataChannelSink>,
        config: VideoProcessorConfig,
    ) -> Self {
        Self {
            session,
            buffer,
            router,
            sink,
            config,
            frame_index: 0,
            drops_since_last_emit: 0,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let Some(item) = self.buffer.get(&cancel).await else {
                break;
            };
            self.process_one(item).await;
        }
    }

    async fn process_one(&mut self, item: FrameItem) {
        let started = Instant::now();

        if let Err(e) = preprocess::check_frame_size(
            &item.raw_payload,
            self.config.max_frame_size_bytes,
        ) {
            self.emit_decode_error(e).await;
            return;
        }

        let decoded = match preprocess::decode(&item.raw_payload) {
            Ok(img) => img,
            Err(e) => {
                self.emit_decode_error(e).await;
                return;
            }
        };

        let resized = preprocess::resize_to_ceiling(
            decoded,
            self.config.max_frame_width,
            self.config.max_frame_height,
        );
        let assessed =
            preprocess::apply_blur_assessment(resized, self.config.blur_warning_threshold);

        let wounds = self.router.infer(&assessed).await;

        let dropped = self.buffer.stats().dropped;
        let frames_dropped_since_last = dropped.saturating_sub(self.drops_since_last_emit);
        self.drops_since_last_emit = dropped;

        let detection_count = wounds.len() as u64;
        if detection_count > 0 {
            self.session.record_detection(detection_count);
        }
        self.session.record_frame();

        let event = GatewayEvent::detection(
            self.session.session_id(),
            now_ms(),
            self.frame_index,
            wounds,
            DetectionMetadata {
                quality_warning: assessed.quality_warning.clone(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                frames_dropped_since_last,
            },
        );
        self.frame_index += 1;

        emitter::emit(self.sink.as_ref(), &event).await;
    }

    async fn emit_decode_error(&self, err: DecodeError) {
        let code = match err {
            DecodeError::TooLarge { .. } => ErrorCode::FrameTooLarge,
            DecodeError::InvalidFormat(_) => ErrorCode::InvalidImageFormat,
        };
        let event = GatewayEvent::Error {
            session_id: self.session.session_id().to_string(),
            timestamp_ms: now_ms(),
            frame_index: Some(self.frame_index),
            error_code: code,
            error_message: err.to_string(),
            severity: Severity::Warning,
        };
        emitter::emit(self.sink.as_ref(), &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::fakes::RecordingSink;
    use crate::inference::InferenceBackend;
    use async_trait::async_trait;
    use gateway_protocol::{BoundingBox, Detection};
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn encode_jpeg(w: u32, h: u32) -> Vec<u8> {
        let buf: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 10]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(buf)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
            .unwrap();
        out
    }

    struct OneDetection;

    #[async_trait]
    impl InferenceBackend for OneDetection {
        async fn infer(
            &self,
            _img: &preprocess::DecodedImage,
        ) -> Result<Vec<Detection>, crate::inference::InferenceError> {
            Ok(vec![Detection::new(
                0,
                "cut",
                BoundingBox::new(120.5, 200.3, 45.0, 60.0),
                0.92,
            )])
        }
    }

    fn config() -> VideoProcessorConfig {
        VideoProcessorConfig {
            max_frame_width: 1280,
            max_frame_height: 720,
            max_frame_size_bytes: 10 * 1024 * 1024,
            blur_warning_threshold: 100.0,
        }
    }

    #[tokio::test]
    async fn s1_single_clean_frame_emits_detection() {
        let session = Arc::new(Session::new("sess-1".to_string()));
        let buffer = Arc::new(FrameBuffer::frame_buffer());
        let router = Arc::new(InferenceRouter::new(
            Some(Arc::new(OneDetection)),
            None,
            0.5,
        ));
        let sink = Arc::new(RecordingSink::new(true));
        let processor = VideoProcessor::new(
            session.clone(),
            buffer.clone(),
            router,
            sink.clone(),
            config(),
        );

        let jpeg = encode_jpeg(640, 480);
        buffer.put(FrameItem::video(0, bytes::Bytes::from(jpeg)));

        let cancel = CancellationToken::new();
        let cancel_inner = cancel.clone();
        let handle = tokio::spawn(processor.run(cancel_inner));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        let event: GatewayEvent = serde_json::from_str(&sent[0]).unwrap();
        match event {
            GatewayEvent::DetectionEvent {
                frame_index,
                has_wounds,
                wounds,
                metadata,
                ..
            } => {
                assert_eq!(frame_index, 0);
                assert!(has_wounds);
                assert_eq!(wounds[0].cls, "cut");
                assert_eq!(metadata.frames_dropped_since_last, 0);
            }
            _ => panic!("expected DetectionEvent"),
        }
    }

    #[tokio::test]
    async fn s5_corrupt_frame_emits_error_and_preserves_frame_count() {
        let session = Arc::new(Session::new("sess-5".to_string()));
        let buffer = Arc::new(FrameBuffer::frame_buffer());
        let router = Arc::new(InferenceRouter::new(None, None, 0.5));
        let sink = Arc::new(RecordingSink::new(true));
        let mut processor =
            VideoProcessor::new(session.clone(), buffer.clone(), router, sink.clone(), config());

        processor
            .process_one(FrameItem::video(0, bytes::Bytes::from_static(b"not an image")))
            .await;

        assert_eq!(session.frame_count(), 0);
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        let event: GatewayEvent = serde_json::from_str(&sent[0]).unwrap();
        match event {
            GatewayEvent::Error {
                error_code,
                severity,
                ..
            } => {
                assert_eq!(error_code, ErrorCode::InvalidImageFormat);
                assert_eq!(severity, Severity::Warning);
            }
            _ => panic!("expected Error event"),
        }
    }
}
