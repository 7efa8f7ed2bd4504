//! C9 — accumulates audio into windows, scores them, emits `AudioEvent`s.

use std::sync::Arc;

use gateway_protocol::GatewayEvent;
use tokio_util::sync::CancellationToken;

use crate::acoustic::{AcousticAnalyzer, AudioChunk};
use crate::buffer::AudioBuffer;
use crate::clock::now_ms;
use crate::emitter::{self, DataChannelSink};
use crate::items::FrameItem;
use crate::session::Session;

#[derive(Debug, Clone, Copy)]
pub struct AudioProcessorConfig {
    pub window_seconds: f64,
    pub batch_size: usize,
    pub sample_rate: u32,
    pub channels: u32,
}

pub struct AudioProcessor {
    session: Arc<Session>,
    buffer: Arc<AudioBuffer<FrameItem>>,
    analyzer: Arc<AcousticAnalyzer>,
    sink: Arc<dyn DataChannelSink>,
    config: AudioProcessorConfig,
    window: Vec<AudioChunk>,
}

impl AudioProcessor {
    pub fn new(
        session: Arc<Session>,
        buffer: Arc<AudioBuffer<FrameItem>>,
        analyzer: Arc<AcousticAnalyzer>,
        sink: Arc<dyn DataChannelSink>,
        config: AudioProcessorConfig,
    ) -> Self {
        Self {
            session,
            buffer,
            analyzer,
            sink,
            config,
            window: Vec::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let Some(item) = self.buffer.get(&cancel).await else {
                break;
            };
            self.window.push(decode_pcm(item));
            if self.window.len() >= self.config.batch_size {
                self.flush().await;
            }
        }
        // Drain a partial window once on track end (spec.md §4.5 "On track end").
        if !self.window.is_empty() {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        let chunks = std::mem::take(&mut self.window);
        let frames = chunks.len() as u64;
        let total_samples: usize = chunks.iter().map(|c| c.samples.len()).sum();
        let sample_rate = self.config.sample_rate;
        let analyzer = self.analyzer.clone();
        // Acoustic analysis is CPU-bound; offload it so it doesn't stall the
        // consumer loop (spec.md §4.5 step 1, §5 "worker pool").
        let analysis = match tokio::task::spawn_blocking(move || analyzer.analyze(&chunks, sample_rate))
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::error!(error = %e, "acoustic analysis task panicked");
                return;
            }
        };
        let seconds = crate::acoustic::audio_seconds(
            total_samples,
            self.config.sample_rate,
            self.config.channels,
        );

        self.session.record_audio(frames, seconds);

        let event = GatewayEvent::AudioEvent {
            session_id: self.session.session_id().to_string(),
            timestamp_ms: now_ms(),
            analysis,
            audio_seconds: seconds,
            frames,
            window_seconds: self.config.window_seconds,
        };
        emitter::emit(self.sink.as_ref(), &event).await;
    }
}

/// Placeholder PCM decode: the real path runs the opaque payload through a
/// track-specific audio decoder (spec.md §1 Out of scope — decoders are
/// owned by the WebRTC stack). Here the payload is already raw PCM16LE.
fn decode_pcm(item: FrameItem) -> AudioChunk {
    let samples = item
        .raw_payload
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    AudioChunk {
        arrival_time_ms: item.arrival_time_ms,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acoustic::AcousticFeatureExtractor;
    use crate::emitter::fakes::RecordingSink;

    struct FixedExtractor;
    impl AcousticFeatureExtractor for FixedExtractor {
        fn extract(&self, _pcm: &[i16], _sample_rate: u32) -> (f32, f32) {
            (10.0, 0.05)
        }
    }

    fn pcm_item(n_samples: usize) -> FrameItem {
        let mut bytes = Vec::with_capacity(n_samples * 2);
        for _ in 0..n_samples {
            bytes.extend_from_slice(&0i16.to_le_bytes());
        }
        FrameItem::audio(0, bytes::Bytes::from(bytes))
    }

    #[tokio::test]
    async fn s6_audio_window_emits_expected_event() {
        let session = Arc::new(Session::new("sess-6".to_string()));
        let buffer = Arc::new(AudioBuffer::audio_buffer());
        let analyzer = Arc::new(AcousticAnalyzer::new(Arc::new(FixedExtractor), None));
        let sink = Arc::new(RecordingSink::new(true));
        let config = AudioProcessorConfig {
            window_seconds: 1.0,
            batch_size: 10,
            sample_rate: 48_000,
            channels: 1,
        };
        let processor = AudioProcessor::new(session.clone(), buffer.clone(), analyzer, sink.clone(), config);

        // 10 items of 100ms each at 48kHz mono = 4800 samples per item.
        for _ in 0..10 {
            buffer.put(pcm_item(4_800));
        }

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
            GatewayEvent::AudioEvent {
                analysis,
                audio_seconds,
                frames,
                window_seconds,
                ..
            } => {
                assert!((analysis.risk_score - 0.5).abs() < 1e-6);
                assert!((audio_seconds - 1.0).abs() < 1e-6);
                assert_eq!(frames, 10);
                assert_eq!(window_seconds, 1.0);
            }
            _ => panic!("expected AudioEvent"),
        }
    }

    #[tokio::test]
    async fn partial_window_flushes_on_track_end() {
        let session = Arc::new(Session::new("sess-7".to_string()));
        let buffer = Arc::new(AudioBuffer::audio_buffer());
        let analyzer = Arc::new(AcousticAnalyzer::new(Arc::new(FixedExtractor), None));
        let sink = Arc::new(RecordingSink::new(true));
        let config = AudioProcessorConfig {
            window_seconds: 1.0,
            batch_size: 10,
            sample_rate: 48_000,
            channels: 1,
        };
        let processor = AudioProcessor::new(session.clone(), buffer.clone(), analyzer, sink.clone(), config);

        for _ in 0..3 {
            buffer.put(pcm_item(4_800));
        }

        let cancel = CancellationToken::new();
        let cancel_inner = cancel.clone();
        let handle = tokio::spawn(processor.run(cancel_inner));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.sent().len(), 1);
    }
}
