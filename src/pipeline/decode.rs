//! Byte-level boundary of the pipeline: decode uploads into a canonical
//! RGB [`PixelBuffer`], encode results back to PNG, and the small pixel
//! helpers (grayscale, Otsu binarization, analysis downscale) the
//! detectors share.

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageOutputFormat, Luma};
use tracing::debug;

use super::types::PixelBuffer;
use super::PipelineError;

/// Default maximum upload size before rejecting.
/// Prevents OOM on corrupt/adversarial files.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Default maximum decoded pixel count (roughly an A3 page at 600 DPI).
pub const DEFAULT_MAX_PIXELS: u64 = 80_000_000;

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Upload bounds checked before and right after decoding.
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub max_bytes: usize,
    pub max_pixels: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

/// Validate image bytes before decoding.
/// Returns early error for clearly invalid input; saves decode time.
pub fn validate_image_bytes(bytes: &[u8], max_bytes: usize) -> Result<(), PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::InvalidImage("empty upload".into()));
    }
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(PipelineError::InvalidImage(
            "image data too small to be valid".into(),
        ));
    }
    if bytes.len() > max_bytes {
        return Err(PipelineError::ImageTooLarge(format!(
            "{} bytes exceeds the {} MB upload limit",
            bytes.len(),
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Decode uploaded bytes into a 3-channel buffer, orientation as stored.
///
/// Gray, gray+alpha, RGBA and 16-bit sources all collapse to RGB8 here;
/// alpha is dropped, not composited.
pub fn decode(bytes: &[u8], limits: &DecodeLimits) -> Result<PixelBuffer, PipelineError> {
    validate_image_bytes(bytes, limits.max_bytes)?;

    let img = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::InvalidImage(format!("failed to decode image: {e}")))?;
    let (width, height) = img.dimensions();

    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidImage(format!(
            "zero-area image ({width}x{height})"
        )));
    }
    let pixels = u64::from(width) * u64::from(height);
    if pixels > limits.max_pixels {
        return Err(PipelineError::ImageTooLarge(format!(
            "{width}x{height} exceeds {} pixels",
            limits.max_pixels
        )));
    }

    let source_channels = img.color().channel_count();
    let rgb = img.to_rgb8();

    debug!(
        size = format!("{width}x{height}"),
        source_channels,
        bytes = bytes.len(),
        "Image decoded"
    );

    Ok(PixelBuffer::new(rgb))
}

/// Encode a buffer as PNG bytes (lossless).
pub fn encode_png(buffer: &PixelBuffer) -> Result<Vec<u8>, PipelineError> {
    let dynamic = DynamicImage::ImageRgb8(buffer.as_rgb().clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Convert RGB image to grayscale using ITU-R BT.601 luminance.
pub fn rgb_to_gray(rgb: &image::RgbImage) -> GrayImage {
    let (w, h) = (rgb.width(), rgb.height());
    let mut gray = GrayImage::new(w, h);
    for (x, y, p) in rgb.enumerate_pixels() {
        let luma = (0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32) as u8;
        gray.put_pixel(x, y, Luma([luma]));
    }
    gray
}

/// Otsu's global threshold: the level maximizing between-class variance.
pub fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 127;
    }
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0f64;
    let mut best_level = 0u8;
    let mut best_variance = -1.0f64;

    for (level, &count) in histogram.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += level as f64 * count as f64;

        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let diff = mean_bg - mean_fg;
        let variance = weight_bg as f64 * weight_fg as f64 * diff * diff;

        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }

    best_level
}

/// Black text on white background using Otsu's threshold.
pub fn binarize_otsu(img: &GrayImage) -> GrayImage {
    let threshold = otsu_threshold(img);
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > threshold { 255 } else { 0 };
    }
    out
}

/// Shrink an analysis image so its longest edge is at most `max_dim`.
/// Uses `Cow` to avoid cloning when no downscale is needed.
pub fn downscale_for_analysis(img: &GrayImage, max_dim: u32) -> Cow<'_, GrayImage> {
    let (w, h) = (img.width(), img.height());
    let largest = w.max(h);

    if max_dim == 0 || largest <= max_dim {
        return Cow::Borrowed(img);
    }

    let scale = max_dim as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    debug!(
        from = format!("{w}x{h}"),
        to = format!("{new_w}x{new_h}"),
        "Downscaling image for analysis"
    );

    Cow::Owned(image::imageops::resize(img, new_w, new_h, FilterType::Triangle))
}
