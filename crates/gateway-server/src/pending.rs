//! A peer connection that has completed signaling but has not yet had a
//! track attached (GLOSSARY: PendingPeer, SPEC_FULL.md §8 Open Question 1).
//!
//! The `gateway_core::Session`/`SessionOrchestrator` pair is built lazily on
//! the first `on_track` call so `start_time_ms` reflects when media actually
//! starts flowing, not when the SDP exchange completed.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::{InferenceRouter, SessionRegistry};
use gateway_protocol::GatewayConfig;
use tokio::sync::{Mutex as AsyncMutex, OnceCell, RwLock};
use webrtc::data_channel::RTCDataChannel;

use crate::pipeline::SessionPipeline;

/// Caps concurrent peer connections at the SDP-offer boundary, before a
/// `gateway_core::Session` even exists for them (spec.md §6 `POST /offer`
/// "503 when the process is above its concurrent-session cap"). Separate
/// from `gateway_core::SessionRegistry`, which only tracks peers that have
/// gone on to attach a track.
pub struct PendingPeerRegistry {
    peers: RwLock<HashMap<String, Arc<PendingPeer>>>,
    max_concurrent: usize,
}

impl PendingPeerRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_concurrent,
        }
    }

    pub async fn try_insert(&self, id: String, peer: Arc<PendingPeer>) -> Result<(), ()> {
        let mut peers = self.peers.write().await;
        if peers.len() >= self.max_concurrent {
            return Err(());
        }
        peers.insert(id, peer);
        Ok(())
    }

    /// Removes and closes the pending peer, if it is still registered. Safe
    /// to call more than once for the same `id` (e.g. once from the peer
    /// connection's terminal-state callback and once from the offer error
    /// path) since `SessionOrchestrator::begin_closing` is itself idempotent.
    pub async fn evict(&self, id: &str) {
        let peer = self.peers.write().await.remove(id);
        if let Some(peer) = peer {
            peer.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }
}

pub struct PendingPeer {
    pub id: String,
    config: GatewayConfig,
    router: Arc<InferenceRouter>,
    registry: Arc<SessionRegistry>,
    pipeline: OnceCell<Arc<SessionPipeline>>,
    pending_data_channel: AsyncMutex<Option<Arc<RTCDataChannel>>>,
}

impl PendingPeer {
    pub fn new(
        id: String,
        config: GatewayConfig,
        router: Arc<InferenceRouter>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            id,
            config,
            router,
            registry,
            pipeline: OnceCell::new(),
            pending_data_channel: AsyncMutex::new(None),
        }
    }

    async fn close(&self) {
        if let Some(pipeline) = self.pipeline.get() {
            pipeline.orchestrator.begin_closing().await;
            self.registry.remove(&self.id).await;
        }
    }

    /// Returns the session pipeline, building it (and registering the new
    /// session with the process-wide registry) on first call.
    pub async fn ensure_pipeline(&self) -> Arc<SessionPipeline> {
        let (pipeline, just_created) = {
            let mut created = false;
            let pipeline = self
                .pipeline
                .get_or_init(|| async {
                    created = true;
                    Arc::new(SessionPipeline::new(
                        self.id.clone(),
                        &self.config,
                        self.router.clone(),
                    ))
                })
                .await
                .clone();
            (pipeline, created)
        };

        if just_created {
            let _ = self
                .registry
                .insert(pipeline.session.clone(), pipeline.orchestrator.clone())
                .await;

            if let Some(dc) = self.pending_data_channel.lock().await.take() {
                pipeline.clone().register_data_channel(dc).await;
            }
        }

        pipeline
    }

    /// Stores the data channel if no track has arrived yet, or registers it
    /// against the already-built pipeline.
    pub async fn on_data_channel(&self, dc: Arc<RTCDataChannel>) {
        if dc.label() != "detections" {
            return;
        }
        if let Some(pipeline) = self.pipeline.get() {
            pipeline.clone().register_data_channel(dc).await;
        } else {
            *self.pending_data_channel.lock().await = Some(dc);
        }
    }
}
