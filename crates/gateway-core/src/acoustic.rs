//! C5 — acoustic window accumulation and risk scoring.
//!
//! The actual spectral feature extractor and emotion classifier are external
//! collaborators (spec.md §1 Non-goals), modeled as pluggable traits with a
//! small in-crate default so the pipeline is testable without either.

use std::sync::Arc;

use gateway_protocol::AudioAnalysis;

/// One packet of decoded PCM audio arriving from the track.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub arrival_time_ms: u64,
    /// Mono PCM16 samples.
    pub samples: Vec<i16>,
}

/// Computes MFCC-mean and RMS-energy features from a window of PCM audio.
pub trait AcousticFeatureExtractor: Send + Sync {
    /// Returns `(mfcc_mean, energy)`.
    fn extract(&self, pcm: &[i16], sample_rate: u32) -> (f32, f32);
}

/// Classifies speaker emotion from a window of PCM audio.
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, pcm: &[i16], sample_rate: u32) -> Option<String>;
}

/// Built-in default extractor: RMS energy, and a zero-crossing-rate-based
/// proxy for a spectral-centroid-like "mfcc_mean". Good enough as a
/// deterministic default; real deployments inject a proper feature
/// extractor behind the same trait.
pub struct DefaultFeatureExtractor;

impl AcousticFeatureExtractor for DefaultFeatureExtractor {
    fn extract(&self, pcm: &[i16], _sample_rate: u32) -> (f32, f32) {
        if pcm.is_empty() {
            return (0.0, 0.0);
        }
        let energy = rms_energy(pcm);
        let mfcc_mean = zero_crossing_rate(pcm) * 100.0;
        (mfcc_mean, energy)
    }
}

fn rms_energy(pcm: &[i16]) -> f32 {
    let sum_sq: f64 = pcm.iter().map(|&s| (s as f64 / i16::MAX as f64).powi(2)).sum();
    ((sum_sq / pcm.len() as f64).sqrt()) as f32
}

fn zero_crossing_rate(pcm: &[i16]) -> f32 {
    if pcm.len() < 2 {
        return 0.0;
    }
    let crossings = pcm
        .windows(2)
        .filter(|w| (w[0] >= 0) != (w[1] >= 0))
        .count();
    crossings as f32 / (pcm.len() - 1) as f32
}

/// Combines a feature extractor and an optional emotion classifier into the
/// risk-scoring step of spec.md §4.5.
pub struct AcousticAnalyzer {
    extractor: Arc<dyn AcousticFeatureExtractor>,
    emotion: Option<Arc<dyn EmotionClassifier>>,
}

impl AcousticAnalyzer {
    pub fn new(
        extractor: Arc<dyn AcousticFeatureExtractor>,
        emotion: Option<Arc<dyn EmotionClassifier>>,
    ) -> Self {
        Self { extractor, emotion }
    }

    /// `risk_score = mfcc_mean * energy` — a documented heuristic, not a
    /// calibrated clinical score (spec.md §4.5 step 2).
    pub fn analyze(&self, chunks: &[AudioChunk], sample_rate: u32) -> AudioAnalysis {
        let pcm: Vec<i16> = chunks.iter().flat_map(|c| c.samples.iter().copied()).collect();
        let (mfcc_mean, energy) = self.extractor.extract(&pcm, sample_rate);
        let emotion = self
            .emotion
            .as_ref()
            .and_then(|e| e.classify(&pcm, sample_rate));
        AudioAnalysis {
            risk_score: mfcc_mean * energy,
            mfcc_mean,
            energy,
            emotion,
        }
    }
}

impl Default for AcousticAnalyzer {
    fn default() -> Self {
        Self::new(Arc::new(DefaultFeatureExtractor), None)
    }
}

/// `audio_seconds = total_samples / (sample_rate * channels)` (spec.md §4.5 step 4).
pub fn audio_seconds(total_samples: usize, sample_rate: u32, channels: u32) -> f64 {
    total_samples as f64 / (sample_rate as f64 * channels as f64)
}
