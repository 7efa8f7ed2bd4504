//! Peer-connection construction and the inbound track / data-channel wiring
//! that binds a browser's WebRTC session to a `gateway_core` pipeline.
//!
//! This is the answering (track-consuming) side of the connection rather
//! than the offering (track-producing) side.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use gateway_core::{DataChannelSink, FrameItem, SinkError};
use tokio::sync::Mutex as AsyncMutex;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Wraps an `RTCDataChannel` so `gateway-core` can emit events without
/// depending on the `webrtc` crate directly.
pub struct RtcDataChannelSink {
    channel: AsyncMutex<Option<Arc<RTCDataChannel>>>,
}

impl RtcDataChannelSink {
    pub fn new() -> Self {
        Self {
            channel: AsyncMutex::new(None),
        }
    }

    pub async fn attach(&self, channel: Arc<RTCDataChannel>) {
        *self.channel.lock().await = Some(channel);
    }
}

impl Default for RtcDataChannelSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataChannelSink for RtcDataChannelSink {
    fn is_open(&self) -> bool {
        self.channel
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|dc| dc.ready_state()))
            .map(|state| state == webrtc::data_channel::data_channel_state::RTCDataChannelState::Open)
            .unwrap_or(false)
    }

    async fn send_text(&self, text: String) -> Result<(), SinkError> {
        let guard = self.channel.lock().await;
        match guard.as_ref() {
            Some(dc) => dc
                .send_text(text)
                .await
                .map(|_| ())
                .map_err(|e| SinkError::Send(e.to_string())),
            None => Err(SinkError::Send("data channel not attached".to_string())),
        }
    }
}

/// Builds the shared `webrtc::api::API` used to construct every peer
/// connection in the process. Default codec set is sufficient here since
/// this side only consumes tracks (it never encodes).
pub fn build_api() -> Result<webrtc::api::API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("failed to register default codecs")?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .context("failed to register default interceptors")?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Creates a fresh peer connection. `on_terminal` fires once when the
/// connection reaches a state it cannot recover from, so the caller can
/// evict its session bookkeeping without polling.
pub async fn new_peer_connection(
    api: &webrtc::api::API,
    on_terminal: impl Fn() + Send + Sync + 'static,
) -> Result<Arc<RTCPeerConnection>> {
    let config = RTCConfiguration::default();
    let pc = Arc::new(
        api.new_peer_connection(config)
            .await
            .context("failed to create peer connection")?,
    );

    let on_terminal = Arc::new(on_terminal);
    pc.on_peer_connection_state_change(Box::new(move |state| {
        match state {
            RTCPeerConnectionState::Failed
            | RTCPeerConnectionState::Disconnected
            | RTCPeerConnectionState::Closed => {
                tracing::warn!(?state, "peer connection left the active state");
                on_terminal();
            }
            _ => tracing::debug!(?state, "peer connection state changed"),
        }
        Box::pin(async {})
    }));

    Ok(pc)
}

/// Processes an SDP offer against a freshly created peer connection and
/// returns the answer SDP (spec.md §6 `POST /offer`).
pub async fn handle_offer(pc: &RTCPeerConnection, sdp: String) -> Result<String> {
    let offer = RTCSessionDescription::offer(sdp).context("invalid SDP offer")?;
    pc.set_remote_description(offer)
        .await
        .context("failed to set remote description")?;

    let answer = pc
        .create_answer(None)
        .await
        .context("failed to create SDP answer")?;
    pc.set_local_description(answer.clone())
        .await
        .context("failed to set local description")?;

    Ok(answer.sdp)
}

/// Reads RTP packets off a remote track and forwards each payload as a
/// `FrameItem` until the track ends or `cancel` fires.
///
/// Full codec depacketization/decode is owned by the browser and the
/// `webrtc` crate's media pipeline (spec.md §1 Out of scope); this adapter
/// treats each inbound sample's payload as the opaque frame handle that
/// `gateway-core::preprocess::decode` expects.
pub async fn pump_track(
    track: Arc<TrackRemote>,
    buffer: Arc<gateway_core::FrameBuffer<FrameItem>>,
    session: Arc<gateway_core::Session>,
    cancel: tokio_util::sync::CancellationToken,
) {
    let kind = track.kind();
    loop {
        tokio::select! {
            packet = track.read_rtp() => {
                match packet {
                    Ok((packet, _)) => {
                        session.record_received();
                        let payload = Bytes::copy_from_slice(&packet.payload);
                        let item = match kind {
                            RTPCodecType::Audio => FrameItem::audio(gateway_core::now_ms(), payload),
                            _ => FrameItem::video(gateway_core::now_ms(), payload),
                        };
                        if buffer.put(item) {
                            session.record_dropped();
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "track ended");
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}
