//! C4 — decode, resize and quality-score inbound video frames.

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, imageops::FilterType};

/// A decoded, (possibly) resized frame ready for inference.
///
/// Invariant: after `resize_to_ceiling`, `width <= 1280 && height <= 720`
/// for the default configuration (spec.md §3).
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Row-major, 3 channels (RGB), 8-bit unsigned.
    pub pixels: Vec<u8>,
    pub blur_score: f64,
    pub quality_warning: Option<String>,
}

impl DecodedImage {
    fn from_buffer(buf: ImageBuffer<Rgb<u8>, Vec<u8>>) -> Self {
        let (width, height) = buf.dimensions();
        Self {
            width,
            height,
            pixels: buf.into_raw(),
            blur_score: 0.0,
            quality_warning: None,
        }
    }

    fn to_buffer(&self) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
        ImageBuffer::from_raw(self.width, self.height, self.pixels.clone())
            .expect("DecodedImage pixel buffer length must match width*height*3")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame payload of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("could not decode frame payload: {0}")]
    InvalidFormat(String),
}

/// Reject oversized payloads before attempting the (comparatively expensive)
/// decode, per spec.md §6 `MAX_FRAME_SIZE_BYTES` / `FRAME_TOO_LARGE`.
pub fn check_frame_size(raw: &[u8], max_bytes: u64) -> Result<(), DecodeError> {
    let size = raw.len() as u64;
    if size > max_bytes {
        Err(DecodeError::TooLarge {
            size,
            limit: max_bytes,
        })
    } else {
        Ok(())
    }
}

/// Decode an opaque inbound frame payload to a pixel matrix.
pub fn decode(raw: &[u8]) -> Result<DecodedImage, DecodeError> {
    let dynamic =
        image::load_from_memory(raw).map_err(|e| DecodeError::InvalidFormat(e.to_string()))?;
    Ok(DecodedImage::from_buffer(dynamic.to_rgb8()))
}

/// Scale proportionally so both dimensions fit within `(max_w, max_h)`;
/// a no-op if the image is already within bounds (spec.md §4.2).
pub fn resize_to_ceiling(img: DecodedImage, max_w: u32, max_h: u32) -> DecodedImage {
    if img.width <= max_w && img.height <= max_h {
        return img;
    }
    let buf = img.to_buffer();
    let resized = DynamicImage::ImageRgb8(buf).resize(max_w, max_h, FilterType::Triangle);
    DecodedImage::from_buffer(resized.to_rgb8())
}

/// Variance of the Laplacian over luminance — higher is sharper
/// (spec.md §4.2 / GLOSSARY).
pub fn compute_blur_score(img: &DecodedImage) -> f64 {
    if img.width < 3 || img.height < 3 {
        return 0.0;
    }
    let w = img.width as usize;
    let h = img.height as usize;
    let luma: Vec<f64> = img
        .pixels
        .chunks_exact(3)
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .collect();

    let at = |x: usize, y: usize| luma[y * w + x];
    let mut values = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = -4.0 * at(x, y) + at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1);
            values.push(lap);
        }
    }
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Apply the blur score and, if below `threshold`, set `quality_warning`.
/// Strict inequality per spec.md §8 ("NOT flagged as blurry" at the threshold).
pub fn apply_blur_assessment(mut img: DecodedImage, threshold: f64) -> DecodedImage {
    let score = compute_blur_score(&img);
    img.blur_score = score;
    img.quality_warning = if score < threshold {
        Some(format!("blurry:score={score:.2}"))
    } else {
        None
    };
    img
}
