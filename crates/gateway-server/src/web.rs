//! HTTP surface: signaling (C12) plus the supplemented `/health`/`/ready`
//! probes (SPEC_FULL.md §4 "ambient concerns the distillation left implicit").

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use gateway_core::{InferenceRouter, LocalModelLoader, RemoteHttpBackend, SessionRegistry};
use gateway_protocol::{AnswerResponse, ErrorCode, GatewayConfig, OfferRequest};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::pending::{PendingPeer, PendingPeerRegistry};
use crate::webrtc_peer;

pub struct AppState {
    pub config: GatewayConfig,
    pub api: webrtc::api::API,
    pub registry: Arc<SessionRegistry>,
    pub pending: Arc<PendingPeerRegistry>,
    pub router: Arc<InferenceRouter>,
    offer_counter: AtomicUsize,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let api = webrtc_peer::build_api()?;
        let max_concurrent = config.session.max_concurrent_sessions as usize;
        let router = Arc::new(build_inference_router(&config));
        Ok(Self {
            registry: Arc::new(SessionRegistry::new(max_concurrent)),
            pending: Arc::new(PendingPeerRegistry::new(max_concurrent)),
            router,
            api,
            offer_counter: AtomicUsize::new(0),
            config,
        })
    }

    fn next_id(&self) -> String {
        let seq = self.offer_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", gateway_core::new_session_id(), seq)
    }
}

/// Wires the remote HTTP backend and/or the local model backend per
/// `inference.*` config, exactly as `InferenceRouter::new`'s primary/fallback
/// contract expects (spec.md §4.3). The local model itself is an external
/// collaborator not shipped with this crate (spec.md §1 Out of scope); the
/// loader below surfaces that clearly instead of pretending to load one.
fn build_inference_router(config: &GatewayConfig) -> InferenceRouter {
    let remote = if config.inference.remote_url.is_empty() {
        None
    } else {
        let client = reqwest::Client::new();
        Some(Arc::new(RemoteHttpBackend::new(
            client,
            config.inference.remote_url.clone(),
            config.inference.remote_key.clone(),
            Duration::from_secs(config.inference.remote_timeout_secs),
        )) as Arc<dyn gateway_core::InferenceBackend>)
    };

    let local = if config.inference.local_enabled {
        let weights_path = config.inference.local_weights_path.clone();
        let loader: LocalModelLoader = Arc::new(move || {
            Err(format!(
                "no local model implementation is linked in (weights_path: {:?})",
                weights_path
            ))
        });
        Some(Arc::new(gateway_core::LocalModelBackend::new(loader))
            as Arc<dyn gateway_core::InferenceBackend>)
    } else {
        None
    };

    InferenceRouter::new(remote, local, config.inference.confidence_threshold)
}

/// SDP offers are small text documents; this bound is generous headroom,
/// not a tuning knob tied to `video.max_frame_size_bytes` (frames never
/// travel over this HTTP surface).
const MAX_OFFER_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/offer", post(handle_offer))
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .layer(RequestBodyLimitLayer::new(MAX_OFFER_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    StatusCode::OK
}

/// 200 while the process can still accept a session, 503 once
/// `max_concurrent_sessions` pending or active peers are outstanding
/// (spec.md §6 `POST /offer` 503 contract, extended to the readiness probe).
async fn handle_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let outstanding = state.pending.len().await;
    if outstanding < state.config.session.max_concurrent_sessions as usize {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

fn error_body(code: ErrorCode, message: impl Into<String>) -> Json<serde_json::Value> {
    Json(json!({ "error_code": code, "message": message.into() }))
}

/// `POST /offer` (spec.md §6, C12): accepts a browser SDP offer, answers it,
/// and wires the resulting peer connection's tracks/data-channel into a
/// fresh `gateway_core` pipeline. Rejects with 400 on a malformed/non-offer
/// body and 503 once the process is at its concurrent-session ceiling.
async fn handle_offer(
    State(state): State<Arc<AppState>>,
    Json(offer): Json<OfferRequest>,
) -> impl IntoResponse {
    if offer.kind != "offer" {
        return (
            StatusCode::BAD_REQUEST,
            error_body(
                ErrorCode::InvalidImageFormat,
                format!("expected SDP type 'offer', got '{}'", offer.kind),
            ),
        )
            .into_response();
    }

    let id = state.next_id();

    let pc = match webrtc_peer::new_peer_connection(&state.api, {
        let pending = state.pending.clone();
        let id = id.clone();
        move || {
            let pending = pending.clone();
            let id = id.clone();
            tokio::spawn(async move { pending.evict(&id).await });
        }
    })
    .await
    {
        Ok(pc) => pc,
        Err(e) => {
            tracing::error!(error = %e, "failed to create peer connection");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body(ErrorCode::InternalError, e.to_string()),
            )
                .into_response();
        }
    };

    let peer = Arc::new(PendingPeer::new(
        id.clone(),
        state.config.clone(),
        state.router.clone(),
        state.registry.clone(),
    ));

    if state
        .pending
        .try_insert(id.clone(), peer.clone())
        .await
        .is_err()
    {
        let _ = pc.close().await;
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            error_body(
                ErrorCode::InternalError,
                "maximum concurrent sessions reached",
            ),
        )
            .into_response();
    }

    let on_track_peer = peer.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let peer = on_track_peer.clone();
        Box::pin(async move {
            let pipeline = peer.ensure_pipeline().await;
            pipeline.on_track(track);
        })
    }));

    let on_dc_peer = peer.clone();
    pc.on_data_channel(Box::new(move |dc| {
        let peer = on_dc_peer.clone();
        Box::pin(async move {
            peer.on_data_channel(dc).await;
        })
    }));

    match webrtc_peer::handle_offer(&pc, offer.sdp).await {
        Ok(answer_sdp) => Json(AnswerResponse::new(answer_sdp)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "rejecting malformed offer");
            state.pending.evict(&id).await;
            let _ = pc.close().await;
            (
                StatusCode::BAD_REQUEST,
                error_body(ErrorCode::InvalidImageFormat, e.to_string()),
            )
                .into_response()
        }
    }
}
