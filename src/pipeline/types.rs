use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use super::decode::rgb_to_gray;
use super::{PipelineError, RecognitionError};

// ═══════════════════════════════════════════════════════════
// Pixel data
// ═══════════════════════════════════════════════════════════

/// Canonical decoded image: row-major RGB8, alpha already dropped.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    image: RgbImage,
}

impl PixelBuffer {
    /// Channel count every buffer carries after decode.
    pub const CHANNELS: u8 = 3;

    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Zero-area buffers cannot be analysed or recognized.
    pub fn is_degenerate(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Single-intensity view (BT.601 luma).
    pub fn to_gray(&self) -> GrayImage {
        rgb_to_gray(&self.image)
    }
}

// ═══════════════════════════════════════════════════════════
// Orientation
// ═══════════════════════════════════════════════════════════

/// Clockwise quarter-turn that makes the page upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum RotationAngle {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl RotationAngle {
    /// Fallback evaluation order. Earlier entries win score ties.
    pub const ALL: [RotationAngle; 4] = [
        RotationAngle::Deg0,
        RotationAngle::Deg90,
        RotationAngle::Deg180,
        RotationAngle::Deg270,
    ];

    pub fn degrees(self) -> u16 {
        match self {
            RotationAngle::Deg0 => 0,
            RotationAngle::Deg90 => 90,
            RotationAngle::Deg180 => 180,
            RotationAngle::Deg270 => 270,
        }
    }

    /// Accepts any multiple of 90 (negative included), normalized mod 360.
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(RotationAngle::Deg0),
            90 => Some(RotationAngle::Deg90),
            180 => Some(RotationAngle::Deg180),
            270 => Some(RotationAngle::Deg270),
            _ => None,
        }
    }

    /// Apply `self`, then `other`.
    pub fn compose(self, other: RotationAngle) -> RotationAngle {
        let sum = i64::from(self.degrees()) + i64::from(other.degrees());
        RotationAngle::from_degrees(sum).unwrap_or(RotationAngle::Deg0)
    }

    /// The turn that undoes `self`.
    pub fn inverse(self) -> RotationAngle {
        RotationAngle::from_degrees(-i64::from(self.degrees())).unwrap_or(RotationAngle::Deg0)
    }
}

impl From<RotationAngle> for u16 {
    fn from(angle: RotationAngle) -> Self {
        angle.degrees()
    }
}

impl TryFrom<u16> for RotationAngle {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 | 90 | 180 | 270 => RotationAngle::from_degrees(i64::from(value))
                .ok_or_else(|| format!("invalid rotation angle {value}")),
            _ => Err(format!("rotation must be 0, 90, 180 or 270, got {value}")),
        }
    }
}

/// Outcome of orientation detection. `Undetermined` is a valid result,
/// never an implicit 0°.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Orientation {
    Detected { angle: RotationAngle, confidence: f32 },
    Undetermined,
}

/// Raw orientation-and-script report from an engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsdReport {
    /// Clockwise degrees the engine says to rotate by.
    pub rotate: Option<i64>,
    pub orientation_confidence: Option<f32>,
    pub script: Option<String>,
    pub script_confidence: Option<f32>,
}

/// One of the four axis-aligned renditions evaluated by the fallback.
#[derive(Debug, Clone)]
pub struct RotationCandidate {
    pub buffer: PixelBuffer,
    pub angle: RotationAngle,
}

/// Where the applied orientation came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrientationSource {
    /// Engine OSD signal above the confidence floor.
    Detected { confidence: f32 },
    /// Best of four recognition passes.
    Fallback { score: f32 },
    /// Nothing usable; the page was left as uploaded.
    Unresolved,
    /// Caller disabled orientation correction.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrientationOutcome {
    pub angle: RotationAngle,
    pub source: OrientationSource,
}

// ═══════════════════════════════════════════════════════════
// Skew
// ═══════════════════════════════════════════════════════════

/// Small-angle tilt derived from near-horizontal line angles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkewEstimate {
    /// Median line angle, degrees, positive = clockwise on screen.
    pub angle_degrees: f32,
    pub evidence_count: usize,
}

impl SkewEstimate {
    pub fn none() -> Self {
        Self {
            angle_degrees: 0.0,
            evidence_count: 0,
        }
    }

    /// Zero evidence means no correction is defined.
    pub fn is_defined(&self) -> bool {
        self.evidence_count > 0
    }
}

// ═══════════════════════════════════════════════════════════
// Recognition output
// ═══════════════════════════════════════════════════════════

/// Pixel box for a token or structural unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Union of all boxes; `None` for an empty iterator.
    pub fn enclosing<'a>(boxes: impl IntoIterator<Item = &'a BoundingBox>) -> Option<BoundingBox> {
        boxes.into_iter().fold(None, |acc, b| match acc {
            None => Some(*b),
            Some(a) => Some(a.union(b)),
        })
    }
}

/// A single recognized word with its engine-assigned grouping keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// 0..=100; engines' "unknown" is stored as 0.
    pub confidence: u8,
    pub block_index: u32,
    pub paragraph_index: u32,
    pub line_index: u32,
}

impl OcrToken {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            x: self.left,
            y: self.top,
            width: self.width,
            height: self.height,
        }
    }

    /// Grouping key, compared block first.
    pub fn layout_key(&self) -> (u32, u32, u32) {
        (self.block_index, self.paragraph_index, self.line_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    pub index: u32,
    pub words: Vec<OcrToken>,
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paragraph {
    pub index: u32,
    pub lines: Vec<Line>,
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub index: u32,
    pub paragraphs: Vec<Paragraph>,
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Nested layout rebuilt from flat tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentTree {
    pub blocks: Vec<Block>,
}

/// A table reconstructed from the page, rendered as HTML.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRegion {
    pub html: String,
    pub bbox: BoundingBox,
    pub rows: usize,
    pub columns: usize,
}

// ═══════════════════════════════════════════════════════════
// Pipeline boundary
// ═══════════════════════════════════════════════════════════

/// Whether to run orientation correction at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationMode {
    #[default]
    Auto,
    Skip,
}

/// Caller-selected features for one `process` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Emit the block/paragraph/line tree.
    pub structured: bool,
    pub detect_tables: bool,
    pub skew_correct: bool,
    pub orientation: OrientationMode,
}

/// A best-effort substitution made during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// OSD gave no confident answer; the fallback decided instead.
    OrientationUndetermined,
    /// Every fallback candidate failed recognition; page left as uploaded.
    AllCandidatesFailed,
    /// Final recognition pass failed; text is empty.
    RecognitionUnavailable,
    /// Table detection was requested but failed or is not configured.
    TablesUnavailable,
}

/// Everything `process` hands back to the transport layer.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub corrected_png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub recognized_text: String,
    pub document: Option<DocumentTree>,
    pub tables: Option<Vec<TableRegion>>,
    pub orientation: OrientationOutcome,
    pub skew: Option<SkewEstimate>,
    /// Mean of known token confidences, 0..=100.
    pub confidence: f32,
    pub degradations: Vec<Degradation>,
}

impl ProcessOutput {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// One page of a PDF run, numbered from 1.
#[derive(Debug, Clone)]
pub struct PdfPageOutput {
    pub page_number: usize,
    pub output: ProcessOutput,
}

/// Every page of a PDF, in order, plus the joined text.
#[derive(Debug, Clone)]
pub struct PdfOutput {
    pub total_pages: usize,
    pub pages: Vec<PdfPageOutput>,
    /// `--- Page N ---` headed sections separated by blank lines.
    pub full_text: String,
}

impl PdfOutput {
    pub fn is_degraded(&self) -> bool {
        self.pages.iter().any(|p| p.output.is_degraded())
    }
}

/// Result of the rotation-only variant.
#[derive(Debug, Clone)]
pub struct RotateOutput {
    pub corrected_png: Vec<u8>,
    pub orientation: OrientationOutcome,
    pub degradations: Vec<Degradation>,
}

// ═══════════════════════════════════════════════════════════
// Engine seams
// ═══════════════════════════════════════════════════════════

/// Recognition engine abstraction (allows mocking for tests).
///
/// Shared process-wide behind an `Arc`; implementations must tolerate
/// concurrent calls.
pub trait RecognitionEngine: Send + Sync {
    /// Short identifier for logs and health output.
    fn name(&self) -> &str;

    /// Word-level tokens. May be empty; order is not meaningful beyond
    /// the grouping keys.
    fn recognize(&self, image: &PixelBuffer) -> Result<Vec<OcrToken>, RecognitionError>;

    /// Orientation-and-script detection on a single-intensity image.
    fn detect_orientation(&self, image: &GrayImage) -> Result<OsdReport, RecognitionError>;
}

/// Optional table capability.
pub trait TableDetector: Send + Sync {
    fn detect_tables(
        &self,
        image: &PixelBuffer,
        tokens: &[OcrToken],
    ) -> Result<Vec<TableRegion>, RecognitionError>;
}

/// PDF page rasterizer (allows mocking for tests).
pub trait PdfPageRenderer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, PipelineError>;

    /// Render one page (0-based) at `dpi`, honouring the page's own rotation.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<PixelBuffer, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_angle_normalizes_multiples() {
        assert_eq!(RotationAngle::from_degrees(450), Some(RotationAngle::Deg90));
        assert_eq!(RotationAngle::from_degrees(-90), Some(RotationAngle::Deg270));
        assert_eq!(RotationAngle::from_degrees(45), None);
    }

    #[test]
    fn rotation_angle_inverse_composes_to_zero() {
        for angle in RotationAngle::ALL {
            assert_eq!(angle.compose(angle.inverse()), RotationAngle::Deg0);
        }
        assert_eq!(RotationAngle::Deg90.inverse(), RotationAngle::Deg270);
    }

    #[test]
    fn rotation_angle_serializes_as_number() {
        let json = serde_json::to_string(&RotationAngle::Deg180).unwrap();
        assert_eq!(json, "180");
        let parsed: RotationAngle = serde_json::from_str("270").unwrap();
        assert_eq!(parsed, RotationAngle::Deg270);
        assert!(serde_json::from_str::<RotationAngle>("45").is_err());
    }

    #[test]
    fn bounding_box_union_spans_both() {
        let a = BoundingBox { x: 10, y: 20, width: 30, height: 10 };
        let b = BoundingBox { x: 50, y: 5, width: 10, height: 10 };
        let u = a.union(&b);
        assert_eq!(u, BoundingBox { x: 10, y: 5, width: 50, height: 25 });
    }

    #[test]
    fn enclosing_empty_is_none() {
        assert!(BoundingBox::enclosing(std::iter::empty()).is_none());
    }

    #[test]
    fn degenerate_buffer_detected() {
        let empty = PixelBuffer::new(RgbImage::new(0, 10));
        assert!(empty.is_degenerate());
        let ok = PixelBuffer::new(RgbImage::new(1, 1));
        assert!(!ok.is_degenerate());
    }

    #[test]
    fn orientation_source_serializes_tagged() {
        let json = serde_json::to_value(OrientationSource::Fallback { score: 88.5 }).unwrap();
        assert_eq!(json["kind"], "fallback");
        assert_eq!(json["score"], 88.5);
    }

    #[test]
    fn process_options_default_all_off() {
        let opts: ProcessOptions = serde_json::from_str("{}").unwrap();
        assert!(!opts.structured && !opts.detect_tables && !opts.skew_correct);
        assert_eq!(opts.orientation, OrientationMode::Auto);
    }
}
