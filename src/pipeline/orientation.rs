//! Quarter-turn orientation detection from the engine's OSD signal.
//!
//! The detector answers with [`Orientation`]: either a confident angle or
//! `Undetermined`. It never guesses 0° on failure; the caller decides what
//! an undetermined page means (normally the confidence-ranked fallback).

use std::sync::Arc;

use image::imageops;
use tracing::{debug, warn};

use super::decode::binarize_otsu;
use super::types::{Orientation, OsdReport, PixelBuffer, RecognitionEngine, RotationAngle};
use super::PipelineError;

/// Default minimum OSD orientation confidence for a detection to count.
pub const DEFAULT_MIN_OSD_CONFIDENCE: f32 = 2.0;

/// Detects the clockwise quarter-turn that makes a page upright.
///
/// Reusable seam: the orchestrator only depends on this trait, so other
/// strategies (e.g. a classifier model) can slot in.
pub trait OrientationDetector: Send + Sync {
    fn detect(&self, image: &PixelBuffer) -> Result<Orientation, PipelineError>;
}

// ── OsdOrientationDetector ────────────────────────────────

/// Binarizes the page and asks the engine's OSD mode for a rotation.
pub struct OsdOrientationDetector {
    engine: Arc<dyn RecognitionEngine>,
    min_confidence: f32,
}

impl OsdOrientationDetector {
    pub fn new(engine: Arc<dyn RecognitionEngine>) -> Self {
        Self {
            engine,
            min_confidence: DEFAULT_MIN_OSD_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

impl OrientationDetector for OsdOrientationDetector {
    fn detect(&self, image: &PixelBuffer) -> Result<Orientation, PipelineError> {
        if image.is_degenerate() {
            return Err(PipelineError::InvalidImage(format!(
                "cannot detect orientation of a {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let binary = binarize_otsu(&image.to_gray());
        match self.engine.detect_orientation(&binary) {
            Ok(report) => Ok(classify_osd(&report, self.min_confidence)),
            Err(e) => {
                warn!(engine = self.engine.name(), error = %e, "Orientation detection failed");
                Ok(Orientation::Undetermined)
            }
        }
    }
}

/// Turn a raw OSD report into an [`Orientation`].
///
/// A missing rotation, one that is not a quarter-turn, or a confidence
/// under `min_confidence` (missing counts as 0) all yield `Undetermined`.
pub fn classify_osd(report: &OsdReport, min_confidence: f32) -> Orientation {
    let Some(rotate) = report.rotate else {
        debug!("OSD report carries no rotation");
        return Orientation::Undetermined;
    };
    let Some(angle) = RotationAngle::from_degrees(rotate) else {
        debug!(rotate, "OSD rotation is not a quarter-turn");
        return Orientation::Undetermined;
    };

    let confidence = report.orientation_confidence.unwrap_or(0.0);
    if !confidence.is_finite() || confidence < min_confidence {
        debug!(
            rotate,
            confidence,
            min_confidence,
            "OSD confidence below threshold"
        );
        return Orientation::Undetermined;
    }

    Orientation::Detected { angle, confidence }
}

/// Lossless quarter-turn: pixels are transposed, never resampled.
pub fn apply_rotation(image: &PixelBuffer, angle: RotationAngle) -> PixelBuffer {
    let rgb = image.as_rgb();
    match angle {
        RotationAngle::Deg0 => image.clone(),
        RotationAngle::Deg90 => PixelBuffer::new(imageops::rotate90(rgb)),
        RotationAngle::Deg180 => PixelBuffer::new(imageops::rotate180(rgb)),
        RotationAngle::Deg270 => PixelBuffer::new(imageops::rotate270(rgb)),
    }
}

/// Owned variant of [`apply_rotation`] that skips the copy for 0°.
pub fn into_rotated(image: PixelBuffer, angle: RotationAngle) -> PixelBuffer {
    match angle {
        RotationAngle::Deg0 => image,
        other => apply_rotation(&image, other),
    }
}
