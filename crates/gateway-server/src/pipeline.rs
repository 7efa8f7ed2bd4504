//! Wires a peer connection's tracks and data channel to a
//! `gateway_core::SessionOrchestrator` (C10), the one place allowed to
//! start/stop processors (spec.md §4 "Control flow: C10 owns lifecycle").

use std::sync::Arc;

use gateway_core::{
    AcousticAnalyzer, AudioBuffer, AudioProcessor, AudioProcessorConfig, FrameBuffer, FrameItem,
    InferenceRouter, Session, SessionOrchestrator, TrackKind, VideoProcessor, VideoProcessorConfig,
};
use gateway_protocol::{GatewayConfig, GatewayEvent, SessionConfigAdvertised};
use webrtc::data_channel::RTCDataChannel;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::webrtc_peer::{self, RtcDataChannelSink};

/// Everything a session needs to run its pipeline, built once per peer
/// connection and shared by the `on_track`/`on_data_channel` callbacks.
pub struct SessionPipeline {
    pub session: Arc<Session>,
    pub orchestrator: Arc<SessionOrchestrator>,
    video_buffer: Arc<FrameBuffer<FrameItem>>,
    audio_buffer: Arc<AudioBuffer<FrameItem>>,
    router: Arc<InferenceRouter>,
    sink: Arc<RtcDataChannelSink>,
    video_config: VideoProcessorConfig,
    audio_config: AudioProcessorConfig,
}

impl SessionPipeline {
    pub fn new(session_id: String, config: &GatewayConfig, router: Arc<InferenceRouter>) -> Self {
        let session = Arc::new(Session::new(session_id));
        let sink = Arc::new(RtcDataChannelSink::new());
        let advertised = SessionConfigAdvertised {
            max_resolution: (config.video.max_frame_width, config.video.max_frame_height),
            confidence_threshold: config.inference.confidence_threshold,
            idle_timeout_sec: config.session.idle_timeout_sec,
            bbox_format: "absolute_px",
        };
        let orchestrator = Arc::new(SessionOrchestrator::new(
            session.clone(),
            sink.clone(),
            advertised,
        ));

        Self {
            session,
            orchestrator,
            video_buffer: Arc::new(FrameBuffer::frame_buffer()),
            audio_buffer: Arc::new(AudioBuffer::audio_buffer()),
            router,
            sink,
            video_config: VideoProcessorConfig {
                max_frame_width: config.video.max_frame_width,
                max_frame_height: config.video.max_frame_height,
                max_frame_size_bytes: config.video.max_frame_size_bytes,
                blur_warning_threshold: config.video.blur_warning_threshold,
            },
            audio_config: AudioProcessorConfig {
                window_seconds: config.audio.window_seconds,
                batch_size: config.audio.batch_size,
                sample_rate: config.audio.sample_rate,
                channels: 1,
            },
        }
    }

    /// Attaches the remote track: spawns its buffer-draining track pump and
    /// its processor, and registers the track with the orchestrator so a
    /// multi-track session only closes once every track has ended.
    pub fn on_track(self: Arc<Self>, track: Arc<webrtc::track::track_remote::TrackRemote>) {
        let cancel = self.orchestrator.cancellation_token();
        let kind = track.kind();

        match kind {
            RTPCodecType::Video => {
                // `track_done` is distinct from the session-wide `cancel`: it fires
                // the moment this track's pump stops, whether because the track
                // ended naturally or because `cancel` itself fired. Without it the
                // processor would block on `buffer.get()` forever after a track end
                // that isn't also a session-wide shutdown.
                let track_done = tokio_util::sync::CancellationToken::new();
                let track_done_for_pump = track_done.clone();
                let pump = tokio::spawn({
                    let video_buffer = self.video_buffer.clone();
                    let session = self.session.clone();
                    async move {
                        webrtc_peer::pump_track(track, video_buffer, session, cancel).await;
                        track_done_for_pump.cancel();
                    }
                });
                let processor = VideoProcessor::new(
                    self.session.clone(),
                    self.video_buffer.clone(),
                    self.router.clone(),
                    self.sink.clone(),
                    self.video_config,
                );
                let this = self.clone();
                let handle = tokio::spawn(async move {
                    processor.run(track_done).await;
                    let _ = pump.await;
                    this.orchestrator.on_track_ended(TrackKind::Video).await;
                });
                self.orchestrator.attach_track(TrackKind::Video, handle);
            }
            RTPCodecType::Audio => {
                let track_done = tokio_util::sync::CancellationToken::new();
                let track_done_for_pump = track_done.clone();
                let pump = tokio::spawn({
                    let audio_buffer = self.audio_buffer.clone();
                    let session = self.session.clone();
                    async move {
                        webrtc_peer::pump_track(track, audio_buffer, session, cancel).await;
                        track_done_for_pump.cancel();
                    }
                });
                let analyzer = Arc::new(AcousticAnalyzer::default());
                let processor = AudioProcessor::new(
                    self.session.clone(),
                    self.audio_buffer.clone(),
                    analyzer,
                    self.sink.clone(),
                    self.audio_config,
                );
                let this = self.clone();
                let handle = tokio::spawn(async move {
                    processor.run(track_done).await;
                    let _ = pump.await;
                    this.orchestrator.on_track_ended(TrackKind::Audio).await;
                });
                self.orchestrator.attach_track(TrackKind::Audio, handle);
            }
            RTPCodecType::Unspecified => {
                tracing::warn!("ignoring track of unspecified kind");
            }
        }
    }

    /// Attaches the `detections` data channel: binds the sink, sends
    /// `session_started` (unless the session is already Closing/Closed —
    /// spec.md §4.8), and answers `ping` with `pong`.
    pub async fn register_data_channel(self: Arc<Self>, dc: Arc<RTCDataChannel>) {
        if dc.label() != "detections" {
            return;
        }
        self.sink.attach(dc.clone()).await;

        let this = self.clone();
        tokio::spawn(async move {
            this.orchestrator.on_data_channel_open().await;
        });

        let this = self.clone();
        dc.on_message(Box::new(move |msg| {
            let this = this.clone();
            Box::pin(async move {
                if let Ok(text) = std::str::from_utf8(&msg.data)
                    && let Ok(value) = serde_json::from_str::<serde_json::Value>(text)
                    && value.get("type").and_then(|t| t.as_str()) == Some("ping")
                {
                    let pong = GatewayEvent::Pong {
                        timestamp_ms: gateway_core::now_ms(),
                    };
                    gateway_core::emitter::emit(this.sink.as_ref(), &pong).await;
                }
            })
        }));
    }
}
