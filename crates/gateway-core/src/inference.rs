//! C3 — inference dispatch with primary/fallback routing.
//!
//! The router is purely a function of `(image, configuration)`; it holds no
//! session state (spec.md §4.3 "Determinism"). Primary and fallback are
//! modeled as a strategy list behind `InferenceBackend`, as suggested by
//! spec.md §9.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_protocol::{BoundingBox, Detection};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::preprocess::DecodedImage;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("network error contacting remote backend: {0}")]
    Network(String),
    #[error("remote backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote backend returned non-2xx status {0}")]
    Status(u16),
    #[error("could not parse remote backend response: {0}")]
    Parse(String),
    #[error("local model failed to load: {0}")]
    LocalLoad(String),
    #[error("local model raised during inference: {0}")]
    LocalInfer(String),
}

/// A source of detections for a decoded frame. Implemented by the remote
/// HTTP backend and the local fallback model; both are swappable strategies
/// with an identical contract.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(&self, img: &DecodedImage) -> Result<Vec<Detection>, InferenceError>;
}

/// Raw shape returned by the remote wound-detection service, before
/// normalization into the single authoritative `Detection` type
/// (spec.md §9 / SPEC_FULL.md §8.4).
#[derive(Debug, Deserialize)]
struct RemotePrediction {
    cls: String,
    bbox: (f32, f32, f32, f32),
    confidence: f32,
    #[serde(default)]
    type_confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    predictions: Vec<RemotePrediction>,
}

/// Calls a remote HTTP wound-detection service with the decoded frame
/// encoded as JPEG.
pub struct RemoteHttpBackend {
    client: reqwest::Client,
    url: String,
    key: String,
    timeout: Duration,
}

impl RemoteHttpBackend {
    pub fn new(client: reqwest::Client, url: String, key: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            key,
            timeout,
        }
    }
}

#[async_trait]
impl InferenceBackend for RemoteHttpBackend {
    async fn infer(&self, img: &DecodedImage) -> Result<Vec<Detection>, InferenceError> {
        let jpeg = encode_jpeg(img).map_err(InferenceError::Network)?;

        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .query(&[("confidence", "0")])
            .header("content-type", "image/jpeg");
        if !self.key.is_empty() {
            request = request.bearer_auth(&self.key);
        }

        let response = request
            .body(jpeg)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.timeout)
                } else {
                    InferenceError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(InferenceError::Status(response.status().as_u16()));
        }

        let parsed: RemoteResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Parse(e.to_string()))?;

        Ok(parsed
            .predictions
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let type_confidence = p.type_confidence.unwrap_or(p.confidence);
                Detection::with_type_confidence(
                    i as u32,
                    p.cls,
                    BoundingBox::new(p.bbox.0, p.bbox.1, p.bbox.2, p.bbox.3),
                    p.confidence,
                    type_confidence,
                )
            })
            .collect())
    }
}

fn encode_jpeg(img: &DecodedImage) -> Result<Vec<u8>, String> {
    let buf: image::ImageBuffer<image::Rgb<u8>, Vec<u8>> =
        image::ImageBuffer::from_raw(img.width, img.height, img.pixels.clone())
            .ok_or_else(|| "pixel buffer does not match width*height*3".to_string())?;
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(buf)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .map_err(|e| e.to_string())?;
    Ok(out)
}

/// Produces detections from a locally-loaded model. The model itself is an
/// external collaborator (spec.md §1 Out of scope); this type owns only the
/// lazy, single-flight loading protocol and the dispatch to a blocking
/// worker (spec.md §9 "Lazy ML-model initialization").
pub trait LocalModel: Send + Sync {
    fn infer(&self, img: &DecodedImage) -> Result<Vec<Detection>, String>;
}

pub type LocalModelLoader = Arc<dyn Fn() -> Result<Arc<dyn LocalModel>, String> + Send + Sync>;

pub struct LocalModelBackend {
    handle: OnceCell<Arc<dyn LocalModel>>,
    loader: LocalModelLoader,
}

impl LocalModelBackend {
    pub fn new(loader: LocalModelLoader) -> Self {
        Self {
            handle: OnceCell::new(),
            loader,
        }
    }

    async fn model(&self) -> Result<Arc<dyn LocalModel>, InferenceError> {
        self.handle
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| e.to_string())?
            })
            .await
            .cloned()
            .map_err(InferenceError::LocalLoad)
    }
}

#[async_trait]
impl InferenceBackend for LocalModelBackend {
    async fn infer(&self, img: &DecodedImage) -> Result<Vec<Detection>, InferenceError> {
        let model = self.model().await?;
        let img = img.clone();
        tokio::task::spawn_blocking(move || model.infer(&img))
            .await
            .map_err(|e| InferenceError::LocalInfer(e.to_string()))?
            .map_err(InferenceError::LocalInfer)
    }
}

/// Composes the remote and local backends per spec.md §4.3: remote first,
/// local fallback on any remote failure, empty list if neither applies.
pub struct InferenceRouter {
    remote: Option<Arc<dyn InferenceBackend>>,
    local: Option<Arc<dyn InferenceBackend>>,
    confidence_threshold: f32,
}

impl InferenceRouter {
    pub fn new(
        remote: Option<Arc<dyn InferenceBackend>>,
        local: Option<Arc<dyn InferenceBackend>>,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            remote,
            local,
            confidence_threshold,
        }
    }

    pub async fn infer(&self, img: &DecodedImage) -> Vec<Detection> {
        let outcome = match &self.remote {
            Some(remote) => match remote.infer(img).await {
                Ok(detections) => Some(detections),
                Err(e) => {
                    tracing::warn!(error = %e, "remote inference failed");
                    None
                }
            },
            None => None,
        };

        let detections = match outcome {
            Some(detections) => detections,
            None => match &self.local {
                Some(local) => match local.infer(img).await {
                    Ok(detections) => detections,
                    Err(e) => {
                        tracing::warn!(error = %e, "local inference failed");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            },
        };

        self.filter(detections)
    }

    fn filter(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| d.confidence >= self.confidence_threshold)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBackend(Result<Vec<Detection>, InferenceError>);

    #[async_trait]
    impl InferenceBackend for FixedBackend {
        async fn infer(&self, _img: &DecodedImage) -> Result<Vec<Detection>, InferenceError> {
            match &self.0 {
                Ok(detections) => Ok(detections.clone()),
                Err(_) => Err(InferenceError::Network("boom".into())),
            }
        }
    }

    fn det(confidence: f32) -> Detection {
        Detection::new(0, "cut", BoundingBox::new(0.0, 0.0, 1.0, 1.0), confidence)
    }

    fn blank_image() -> DecodedImage {
        DecodedImage {
            width: 4,
            height: 4,
            pixels: vec![0u8; 48],
            blur_score: 0.0,
            quality_warning: None,
        }
    }

    #[tokio::test]
    async fn remote_success_is_used_directly() {
        let remote = Arc::new(FixedBackend(Ok(vec![det(0.9)])));
        let router = InferenceRouter::new(Some(remote), None, 0.5);
        let result = router.infer(&blank_image()).await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_local() {
        let remote = Arc::new(FixedBackend(Err(InferenceError::Status(500))));
        let local = Arc::new(FixedBackend(Ok(vec![det(0.8)])));
        let router = InferenceRouter::new(Some(remote), Some(local), 0.5);
        let result = router.infer(&blank_image()).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].confidence, 0.8);
    }

    #[tokio::test]
    async fn remote_failure_without_fallback_is_empty() {
        let remote = Arc::new(FixedBackend(Err(InferenceError::Status(500))));
        let router = InferenceRouter::new(Some(remote), None, 0.5);
        let result = router.infer(&blank_image()).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn no_remote_configured_skips_directly_to_local() {
        let local = Arc::new(FixedBackend(Ok(vec![det(0.6)])));
        let router = InferenceRouter::new(None, Some(local), 0.5);
        let result = router.infer(&blank_image()).await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn below_threshold_detections_are_discarded() {
        let remote = Arc::new(FixedBackend(Ok(vec![det(0.4), det(0.5), det(0.9)])));
        let router = InferenceRouter::new(Some(remote), None, 0.5);
        let result = router.infer(&blank_image()).await;
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|d| d.confidence >= 0.5));
    }

    struct CountingModel(AtomicUsize);

    impl LocalModel for CountingModel {
        fn infer(&self, _img: &DecodedImage) -> Result<Vec<Detection>, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![det(0.7)])
        }
    }

    #[tokio::test]
    async fn local_model_loads_once_across_many_calls() {
        let load_count = Arc::new(AtomicUsize::new(0));
        let load_count2 = load_count.clone();
        let loader: LocalModelLoader = Arc::new(move || {
            load_count2.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingModel(AtomicUsize::new(0))) as Arc<dyn LocalModel>)
        });
        let backend = Arc::new(LocalModelBackend::new(loader));
        let router = InferenceRouter::new(None, Some(backend), 0.5);

        for _ in 0..5 {
            router.infer(&blank_image()).await;
        }
        assert_eq!(load_count.load(Ordering::SeqCst), 1);
    }
}
