//! End-to-end run: decode → orient → deskew → recognize → structure →
//! respond.
//!
//! Each stage is its own type and consumes the previous one by value, so
//! stages cannot be skipped or reordered. Orientation always runs before
//! skew correction.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::confidence::aggregate_confidence;
use super::decode::{decode, encode_png, DecodeLimits, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MAX_PIXELS};
use super::fallback::FallbackSelector;
use super::pdf::{validate_pdf_bytes, DEFAULT_MAX_PDF_PAGES, DEFAULT_PDF_DPI};
use super::orientation::{
    into_rotated, OrientationDetector, OsdOrientationDetector, DEFAULT_MIN_OSD_CONFIDENCE,
};
use super::skew::{deskew, SkewConfig};
use super::structure::build_document_tree;
use super::tables::TableConfig;
use super::types::{
    Degradation, DocumentTree, OcrToken, Orientation, OrientationMode, OrientationOutcome,
    OrientationSource, PdfOutput, PdfPageOutput, PdfPageRenderer, PixelBuffer, ProcessOptions,
    ProcessOutput, RecognitionEngine, RotateOutput, RotationAngle, SkewEstimate, TableDetector,
    TableRegion,
};
use super::PipelineError;

/// Tunables for a [`Pipeline`]. Built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_image_bytes: usize,
    pub max_pixels: u64,
    pub min_osd_confidence: f32,
    /// Evaluate fallback candidates on scoped threads.
    pub parallel_fallback: bool,
    pub skew: SkewConfig,
    pub tables: TableConfig,
    /// Render resolution for PDF pages.
    pub pdf_dpi: u32,
    /// Documents with more pages are refused outright.
    pub max_pdf_pages: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_pixels: DEFAULT_MAX_PIXELS,
            min_osd_confidence: DEFAULT_MIN_OSD_CONFIDENCE,
            parallel_fallback: true,
            skew: SkewConfig::default(),
            tables: TableConfig::default(),
            pdf_dpi: DEFAULT_PDF_DPI,
            max_pdf_pages: DEFAULT_MAX_PDF_PAGES,
        }
    }
}

impl PipelineConfig {
    fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_bytes: self.max_image_bytes,
            max_pixels: self.max_pixels,
        }
    }
}

/// The orientation-correction and structure-reconstruction pipeline.
///
/// Holds only shared, read-only state; one instance serves every request.
pub struct Pipeline {
    engine: Arc<dyn RecognitionEngine>,
    detector: Box<dyn OrientationDetector>,
    fallback: FallbackSelector,
    tables: Option<Arc<dyn TableDetector>>,
    pdf: Option<Arc<dyn PdfPageRenderer>>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn RecognitionEngine>, config: PipelineConfig) -> Self {
        let detector = OsdOrientationDetector::new(engine.clone())
            .with_min_confidence(config.min_osd_confidence);
        let fallback = FallbackSelector::new(engine.clone()).with_parallel(config.parallel_fallback);
        Self {
            engine,
            detector: Box::new(detector),
            fallback,
            tables: None,
            pdf: None,
            config,
        }
    }

    /// Enable table detection.
    pub fn with_table_detector(mut self, detector: Arc<dyn TableDetector>) -> Self {
        self.tables = Some(detector);
        self
    }

    /// Replace the OSD-based orientation strategy.
    pub fn with_orientation_detector(mut self, detector: Box<dyn OrientationDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Enable the PDF entry points.
    pub fn with_pdf_renderer(mut self, renderer: Arc<dyn PdfPageRenderer>) -> Self {
        self.pdf = Some(renderer);
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tables_enabled(&self) -> bool {
        self.tables.is_some()
    }

    pub fn pdf_enabled(&self) -> bool {
        self.pdf.is_some()
    }

    /// Full run over one uploaded image.
    pub fn process(&self, bytes: &[u8], options: ProcessOptions) -> Result<ProcessOutput, PipelineError> {
        self.run(Decoded::from_bytes(bytes, &self.config)?, options)
    }

    fn run(&self, decoded: Decoded, options: ProcessOptions) -> Result<ProcessOutput, PipelineError> {
        let started = Instant::now();

        let output = decoded
            .orient(self, options.orientation)?
            .correct_skew(self, options.skew_correct)
            .recognize(self)
            .structure(self, options.detect_tables)
            .respond(options.structured)?;

        info!(
            angle = output.orientation.angle.degrees(),
            skew = output.skew.map(|s| s.angle_degrees),
            confidence = output.confidence,
            degradations = output.degradations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );
        Ok(output)
    }

    /// Orientation correction only: decode → orient → encode.
    pub fn rotate_only(&self, bytes: &[u8]) -> Result<RotateOutput, PipelineError> {
        let oriented = Decoded::from_bytes(bytes, &self.config)?.orient(self, OrientationMode::Auto)?;
        let corrected_png = encode_png(&oriented.image)?;

        info!(
            angle = oriented.orientation.angle.degrees(),
            degradations = oriented.degradations.len(),
            "Rotation run complete"
        );
        Ok(RotateOutput {
            corrected_png,
            orientation: oriented.orientation,
            degradations: oriented.degradations,
        })
    }

    /// Page count of an uploaded PDF, after the size and page-limit checks.
    pub fn pdf_page_count(&self, bytes: &[u8]) -> Result<usize, PipelineError> {
        let renderer = self.pdf_renderer()?;
        validate_pdf_bytes(bytes, self.config.max_image_bytes)?;

        let total = renderer.page_count(bytes)?;
        if total == 0 {
            return Err(PipelineError::InvalidPdf("document has no pages".into()));
        }
        if total > self.config.max_pdf_pages {
            return Err(PipelineError::ImageTooLarge(format!(
                "{total} pages exceeds the {} page limit",
                self.config.max_pdf_pages
            )));
        }
        Ok(total)
    }

    /// Full run over one page (1-based) of a PDF.
    pub fn process_pdf_page(
        &self,
        bytes: &[u8],
        page_number: usize,
        options: ProcessOptions,
    ) -> Result<ProcessOutput, PipelineError> {
        let total = self.pdf_page_count(bytes)?;
        if page_number == 0 || page_number > total {
            return Err(PipelineError::PageOutOfRange {
                page: page_number,
                total,
            });
        }
        self.process_rendered_page(bytes, page_number, options)
    }

    /// Every page in order. A page that fails to render aborts the run.
    pub fn process_pdf(&self, bytes: &[u8], options: ProcessOptions) -> Result<PdfOutput, PipelineError> {
        let started = Instant::now();
        let total = self.pdf_page_count(bytes)?;

        let mut pages = Vec::with_capacity(total);
        for page_number in 1..=total {
            let output = self.process_rendered_page(bytes, page_number, options)?;
            pages.push(PdfPageOutput { page_number, output });
        }
        let full_text = join_page_text(&pages);

        info!(
            pages = total,
            degraded_pages = pages.iter().filter(|p| p.output.is_degraded()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "PDF run complete"
        );
        Ok(PdfOutput {
            total_pages: total,
            pages,
            full_text,
        })
    }

    fn process_rendered_page(
        &self,
        bytes: &[u8],
        page_number: usize,
        options: ProcessOptions,
    ) -> Result<ProcessOutput, PipelineError> {
        let renderer = self.pdf_renderer()?;
        let page = renderer.render_page(bytes, page_number - 1, self.config.pdf_dpi)?;
        self.run(Decoded::from_buffer(page, &self.config)?, options)
    }

    fn pdf_renderer(&self) -> Result<&Arc<dyn PdfPageRenderer>, PipelineError> {
        self.pdf
            .as_ref()
            .ok_or_else(|| PipelineError::PdfUnavailable("no PDF renderer is configured".into()))
    }
}

/// `--- Page N ---` header over each page's trimmed text, pages separated
/// by a blank line.
fn join_page_text(pages: &[PdfPageOutput]) -> String {
    pages
        .iter()
        .map(|p| format!("--- Page {} ---\n{}", p.page_number, p.output.recognized_text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ═══════════════════════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════════════════════

struct Decoded {
    image: PixelBuffer,
}

struct Oriented {
    image: PixelBuffer,
    orientation: OrientationOutcome,
    /// Tokens already recognized on `image` by the fallback.
    tokens: Option<Vec<OcrToken>>,
    degradations: Vec<Degradation>,
}

struct SkewCorrected {
    image: PixelBuffer,
    orientation: OrientationOutcome,
    skew: Option<SkewEstimate>,
    tokens: Option<Vec<OcrToken>>,
    degradations: Vec<Degradation>,
}

struct Recognized {
    image: PixelBuffer,
    orientation: OrientationOutcome,
    skew: Option<SkewEstimate>,
    tokens: Vec<OcrToken>,
    degradations: Vec<Degradation>,
}

struct Structured {
    image: PixelBuffer,
    orientation: OrientationOutcome,
    skew: Option<SkewEstimate>,
    tokens: Vec<OcrToken>,
    document: DocumentTree,
    tables: Option<Vec<TableRegion>>,
    degradations: Vec<Degradation>,
}

impl Decoded {
    fn from_bytes(bytes: &[u8], config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            image: decode(bytes, &config.decode_limits())?,
        })
    }

    /// Rendered pages skip decoding but not the size checks.
    fn from_buffer(image: PixelBuffer, config: &PipelineConfig) -> Result<Self, PipelineError> {
        if image.is_degenerate() {
            return Err(PipelineError::InvalidPdf(format!(
                "page rendered to {}x{}",
                image.width(),
                image.height()
            )));
        }
        let pixels = u64::from(image.width()) * u64::from(image.height());
        if pixels > config.max_pixels {
            return Err(PipelineError::ImageTooLarge(format!(
                "{}x{} exceeds {} pixels",
                image.width(),
                image.height(),
                config.max_pixels
            )));
        }
        Ok(Self { image })
    }

    fn orient(self, pipeline: &Pipeline, mode: OrientationMode) -> Result<Oriented, PipelineError> {
        let mut degradations = Vec::new();

        if mode == OrientationMode::Skip {
            return Ok(Oriented {
                image: self.image,
                orientation: OrientationOutcome {
                    angle: RotationAngle::Deg0,
                    source: OrientationSource::Skipped,
                },
                tokens: None,
                degradations,
            });
        }

        match pipeline.detector.detect(&self.image)? {
            Orientation::Detected { angle, confidence } => {
                info!(angle = angle.degrees(), confidence, "Orientation detected");
                Ok(Oriented {
                    image: into_rotated(self.image, angle),
                    orientation: OrientationOutcome {
                        angle,
                        source: OrientationSource::Detected { confidence },
                    },
                    tokens: None,
                    degradations,
                })
            }
            Orientation::Undetermined => {
                degradations.push(Degradation::OrientationUndetermined);
                let selection = pipeline.fallback.select(&self.image);

                let source = if selection.all_failed {
                    degradations.push(Degradation::AllCandidatesFailed);
                    OrientationSource::Unresolved
                } else {
                    OrientationSource::Fallback {
                        score: selection.score,
                    }
                };

                Ok(Oriented {
                    image: selection.buffer,
                    orientation: OrientationOutcome {
                        angle: selection.angle,
                        source,
                    },
                    tokens: selection.tokens,
                    degradations,
                })
            }
        }
    }
}

impl Oriented {
    fn correct_skew(self, pipeline: &Pipeline, enabled: bool) -> SkewCorrected {
        if !enabled {
            return SkewCorrected {
                image: self.image,
                orientation: self.orientation,
                skew: None,
                tokens: self.tokens,
                degradations: self.degradations,
            };
        }

        let (image, estimate) = deskew(self.image, &pipeline.config.skew);
        // Fallback tokens describe the pre-rotation pixels.
        let tokens = if pipeline.config.skew.corrects(&estimate) {
            None
        } else {
            self.tokens
        };

        SkewCorrected {
            image,
            orientation: self.orientation,
            skew: Some(estimate),
            tokens,
            degradations: self.degradations,
        }
    }
}

impl SkewCorrected {
    fn recognize(self, pipeline: &Pipeline) -> Recognized {
        let mut degradations = self.degradations;

        let tokens = match self.tokens {
            Some(tokens) => tokens,
            None => match pipeline.engine.recognize(&self.image) {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(engine = pipeline.engine.name(), error = %e, "Recognition failed; returning empty text");
                    degradations.push(Degradation::RecognitionUnavailable);
                    Vec::new()
                }
            },
        };

        Recognized {
            image: self.image,
            orientation: self.orientation,
            skew: self.skew,
            tokens,
            degradations,
        }
    }
}

impl Recognized {
    fn structure(self, pipeline: &Pipeline, detect_tables: bool) -> Structured {
        let mut degradations = self.degradations;
        let document = build_document_tree(&self.tokens);

        let tables = if !detect_tables {
            None
        } else {
            match &pipeline.tables {
                Some(detector) => match detector.detect_tables(&self.image, &self.tokens) {
                    Ok(tables) => Some(tables),
                    Err(e) => {
                        warn!(error = %e, "Table detection failed");
                        degradations.push(Degradation::TablesUnavailable);
                        None
                    }
                },
                None => {
                    warn!("Table detection requested but no detector is configured");
                    degradations.push(Degradation::TablesUnavailable);
                    None
                }
            }
        };

        Structured {
            image: self.image,
            orientation: self.orientation,
            skew: self.skew,
            tokens: self.tokens,
            document,
            tables,
            degradations,
        }
    }
}

impl Structured {
    fn respond(self, structured: bool) -> Result<ProcessOutput, PipelineError> {
        let corrected_png = encode_png(&self.image)?;
        Ok(ProcessOutput {
            corrected_png,
            width: self.image.width(),
            height: self.image.height(),
            recognized_text: self.document.text(),
            document: structured.then_some(self.document),
            tables: self.tables,
            orientation: self.orientation,
            skew: self.skew,
            confidence: aggregate_confidence(&self.tokens),
            degradations: self.degradations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::decode::DecodeLimits;
    use crate::pipeline::ocr::{test_token, MockEngine, MockOsd, MockRecognition};
    use crate::pipeline::orientation::apply_rotation;
    use crate::pipeline::pdf::MockPdfRenderer;
    use crate::pipeline::orientation::test_images::upright_marker_page;
    use crate::pipeline::tables::LayoutTableDetector;
    use crate::pipeline::types::OsdReport;

    fn png(buffer: &PixelBuffer) -> Vec<u8> {
        encode_png(buffer).unwrap()
    }

    fn pipeline_with(engine: Arc<MockEngine>) -> Pipeline {
        Pipeline::new(engine, PipelineConfig::default())
    }

    fn hello_tokens() -> Vec<OcrToken> {
        vec![
            test_token("Hello", 90, (1, 1, 1), (10, 10, 50, 12)),
            test_token("World", 80, (1, 1, 1), (70, 10, 50, 12)),
            test_token("Foo", 0, (2, 1, 1), (10, 60, 30, 12)),
        ]
    }

    #[test]
    fn empty_input_is_invalid_image() {
        let pipeline = pipeline_with(Arc::new(MockEngine::marker_aware()));
        let err = pipeline.process(&[], ProcessOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn confident_osd_skips_fallback() {
        let engine = Arc::new(MockEngine::with_tokens(hello_tokens()));
        let pipeline = pipeline_with(engine.clone());
        let page = upright_marker_page(60, 40);

        let out = pipeline.process(&png(&page), ProcessOptions::default()).unwrap();
        assert_eq!(out.orientation.angle, RotationAngle::Deg0);
        assert!(matches!(out.orientation.source, OrientationSource::Detected { .. }));
        assert_eq!(out.recognized_text, "Hello World\n\nFoo");
        assert!((out.confidence - 85.0).abs() < f32::EPSILON);
        assert!(!out.is_degraded());
        assert!(out.document.is_none());
        assert_eq!(engine.recognize_calls(), 1);
    }

    #[test]
    fn undetermined_orientation_uses_fallback_and_reuses_tokens() {
        let engine = Arc::new(MockEngine::new(
            MockOsd::Fail,
            MockRecognition::FromMarker { upright: 90, sideways: 40 },
        ));
        let pipeline = pipeline_with(engine.clone());
        let page = upright_marker_page(60, 40);
        let sideways = apply_rotation(&page, RotationAngle::Deg90);

        let out = pipeline.process(&png(&sideways), ProcessOptions::default()).unwrap();
        assert_eq!(out.orientation.angle, RotationAngle::Deg270);
        assert_eq!(out.orientation.source, OrientationSource::Fallback { score: 90.0 });
        assert_eq!(out.degradations, vec![Degradation::OrientationUndetermined]);
        assert_eq!((out.width, out.height), (60, 40));
        assert_eq!(out.recognized_text, "Upright page");
        assert_eq!(engine.recognize_calls(), 4);

        let restored = decode(&out.corrected_png, &DecodeLimits::default()).unwrap();
        assert_eq!(restored.as_raw(), page.as_raw());
    }

    #[test]
    fn detected_rotation_is_applied() {
        let engine = Arc::new(MockEngine::marker_aware());
        let pipeline = pipeline_with(engine);
        let page = upright_marker_page(60, 40);
        let turned = apply_rotation(&page, RotationAngle::Deg270);

        let out = pipeline.process(&png(&turned), ProcessOptions::default()).unwrap();
        assert_eq!(out.orientation.angle, RotationAngle::Deg90);
        assert_eq!((out.width, out.height), (60, 40));
        assert_eq!(out.recognized_text, "Upright page");
    }

    #[test]
    fn total_engine_failure_degrades_without_error() {
        let engine = Arc::new(MockEngine::new(MockOsd::Fail, MockRecognition::Fail));
        let pipeline = pipeline_with(engine);
        let page = upright_marker_page(60, 40);

        let out = pipeline.process(&png(&page), ProcessOptions::default()).unwrap();
        assert_eq!(out.orientation.angle, RotationAngle::Deg0);
        assert_eq!(out.orientation.source, OrientationSource::Unresolved);
        assert_eq!(
            out.degradations,
            vec![
                Degradation::OrientationUndetermined,
                Degradation::AllCandidatesFailed,
                Degradation::RecognitionUnavailable,
            ]
        );
        assert_eq!(out.recognized_text, "");
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn skip_mode_never_asks_for_orientation() {
        let engine = Arc::new(MockEngine::with_tokens(hello_tokens()));
        let pipeline = pipeline_with(engine.clone());
        let options = ProcessOptions {
            orientation: OrientationMode::Skip,
            ..ProcessOptions::default()
        };

        let out = pipeline
            .process(&png(&upright_marker_page(40, 40)), options)
            .unwrap();
        assert_eq!(out.orientation.source, OrientationSource::Skipped);
        assert_eq!(engine.osd_calls(), 0);
    }

    #[test]
    fn structured_output_includes_tree() {
        let pipeline = pipeline_with(Arc::new(MockEngine::with_tokens(hello_tokens())));
        let options = ProcessOptions {
            structured: true,
            skew_correct: true,
            ..ProcessOptions::default()
        };

        let out = pipeline
            .process(&png(&upright_marker_page(60, 40)), options)
            .unwrap();
        let document = out.document.expect("tree requested");
        assert_eq!(document.blocks.len(), 2);
        assert!(out.skew.is_some());
    }

    #[test]
    fn tables_without_detector_are_flagged() {
        let pipeline = pipeline_with(Arc::new(MockEngine::with_tokens(hello_tokens())));
        let options = ProcessOptions {
            detect_tables: true,
            ..ProcessOptions::default()
        };

        let out = pipeline
            .process(&png(&upright_marker_page(40, 40)), options)
            .unwrap();
        assert!(out.tables.is_none());
        assert_eq!(out.degradations, vec![Degradation::TablesUnavailable]);
    }

    #[test]
    fn tables_detected_when_configured() {
        let tokens = vec![
            test_token("Item", 90, (1, 1, 1), (10, 10, 32, 10)),
            test_token("Qty", 90, (1, 1, 1), (200, 10, 24, 10)),
            test_token("Paper", 90, (1, 1, 2), (10, 30, 40, 10)),
            test_token("500", 90, (1, 1, 2), (200, 30, 24, 10)),
        ];
        let pipeline = pipeline_with(Arc::new(MockEngine::with_tokens(tokens)))
            .with_table_detector(Arc::new(LayoutTableDetector::default()));
        let options = ProcessOptions {
            detect_tables: true,
            ..ProcessOptions::default()
        };

        let out = pipeline
            .process(&png(&upright_marker_page(40, 40)), options)
            .unwrap();
        let tables = out.tables.expect("tables requested");
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].columns, 2);
    }

    #[test]
    fn rotate_only_returns_upright_png() {
        let engine = Arc::new(MockEngine::new(
            MockOsd::Report(OsdReport {
                rotate: Some(180),
                orientation_confidence: Some(8.0),
                ..OsdReport::default()
            }),
            MockRecognition::Fail,
        ));
        let pipeline = pipeline_with(engine.clone());
        let page = upright_marker_page(50, 30);
        let flipped = apply_rotation(&page, RotationAngle::Deg180);

        let out = pipeline.rotate_only(&png(&flipped)).unwrap();
        assert_eq!(out.orientation.angle, RotationAngle::Deg180);
        assert!(out.degradations.is_empty());
        assert_eq!(engine.recognize_calls(), 0);

        let restored = decode(&out.corrected_png, &DecodeLimits::default()).unwrap();
        assert_eq!(restored.as_raw(), page.as_raw());
    }

    /// Always answers with the same orientation.
    struct FixedDetector(Orientation);

    impl OrientationDetector for FixedDetector {
        fn detect(&self, _image: &PixelBuffer) -> Result<Orientation, PipelineError> {
            Ok(self.0)
        }
    }

    #[test]
    fn injected_orientation_detector_replaces_osd() {
        let engine = Arc::new(MockEngine::with_tokens(hello_tokens()));
        let pipeline = pipeline_with(engine.clone()).with_orientation_detector(Box::new(
            FixedDetector(Orientation::Detected {
                angle: RotationAngle::Deg90,
                confidence: 42.0,
            }),
        ));
        let page = upright_marker_page(60, 40);

        let out = pipeline.process(&png(&page), ProcessOptions::default()).unwrap();
        assert_eq!(out.orientation.angle, RotationAngle::Deg90);
        assert_eq!(
            out.orientation.source,
            OrientationSource::Detected { confidence: 42.0 }
        );
        assert_eq!((out.width, out.height), (40, 60));
        assert_eq!(engine.osd_calls(), 0);
        assert_eq!(engine.recognize_calls(), 1);
    }

    #[test]
    fn injected_undetermined_detector_falls_back() {
        let engine = Arc::new(MockEngine::marker_aware());
        let pipeline = pipeline_with(engine.clone())
            .with_orientation_detector(Box::new(FixedDetector(Orientation::Undetermined)));
        let page = upright_marker_page(60, 40);
        let flipped = apply_rotation(&page, RotationAngle::Deg180);

        let out = pipeline.rotate_only(&png(&flipped)).unwrap();
        assert_eq!(out.orientation.angle, RotationAngle::Deg180);
        assert_eq!(out.degradations, vec![Degradation::OrientationUndetermined]);
        assert_eq!(engine.osd_calls(), 0);
    }

    // ── PDF ──

    const PDF_BYTES: &[u8] = b"%PDF-1.7\n% test document\n";

    fn pdf_pipeline(engine: Arc<MockEngine>, pages: Vec<PixelBuffer>) -> Pipeline {
        pipeline_with(engine).with_pdf_renderer(Arc::new(MockPdfRenderer::new(pages)))
    }

    #[test]
    fn pdf_without_renderer_is_unavailable() {
        let pipeline = pipeline_with(Arc::new(MockEngine::marker_aware()));
        assert!(!pipeline.pdf_enabled());
        let err = pipeline.process_pdf(PDF_BYTES, ProcessOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::PdfUnavailable(_)));
    }

    #[test]
    fn pdf_pages_are_each_oriented_and_joined() {
        let engine = Arc::new(MockEngine::marker_aware());
        let page = upright_marker_page(60, 40);
        let pipeline = pdf_pipeline(
            engine.clone(),
            vec![page.clone(), apply_rotation(&page, RotationAngle::Deg90)],
        );

        let out = pipeline.process_pdf(PDF_BYTES, ProcessOptions::default()).unwrap();
        assert_eq!(out.total_pages, 2);
        assert_eq!(out.pages[0].page_number, 1);
        assert_eq!(out.pages[0].output.orientation.angle, RotationAngle::Deg0);
        assert_eq!(out.pages[1].output.orientation.angle, RotationAngle::Deg270);
        assert_eq!((out.pages[1].output.width, out.pages[1].output.height), (60, 40));
        assert_eq!(
            out.full_text,
            "--- Page 1 ---\nUpright page\n\n--- Page 2 ---\nUpright page"
        );
        assert!(!out.is_degraded());
        assert_eq!(engine.osd_calls(), 2);
    }

    #[test]
    fn pdf_page_is_selected_by_one_based_number() {
        let page = upright_marker_page(60, 40);
        let pipeline = pdf_pipeline(
            Arc::new(MockEngine::marker_aware()),
            vec![page.clone(), apply_rotation(&page, RotationAngle::Deg180)],
        );

        let out = pipeline
            .process_pdf_page(PDF_BYTES, 2, ProcessOptions::default())
            .unwrap();
        assert_eq!(out.orientation.angle, RotationAngle::Deg180);

        for page_number in [0, 3] {
            let err = pipeline
                .process_pdf_page(PDF_BYTES, page_number, ProcessOptions::default())
                .unwrap_err();
            assert!(matches!(
                err,
                PipelineError::PageOutOfRange { total: 2, .. }
            ));
        }
    }

    #[test]
    fn pdf_limits_are_enforced() {
        let engine = Arc::new(MockEngine::marker_aware());
        let config = PipelineConfig {
            max_pdf_pages: 1,
            ..PipelineConfig::default()
        };
        let page = upright_marker_page(20, 20);
        let pipeline = Pipeline::new(engine.clone(), config)
            .with_pdf_renderer(Arc::new(MockPdfRenderer::new(vec![page.clone(), page])));
        assert!(matches!(
            pipeline.pdf_page_count(PDF_BYTES),
            Err(PipelineError::ImageTooLarge(_))
        ));

        let empty = pdf_pipeline(engine.clone(), vec![]);
        assert!(matches!(
            empty.pdf_page_count(PDF_BYTES),
            Err(PipelineError::InvalidPdf(_))
        ));

        let single = pdf_pipeline(engine, vec![upright_marker_page(20, 20)]);
        assert!(matches!(
            single.pdf_page_count(b"not a pdf"),
            Err(PipelineError::InvalidPdf(_))
        ));
        assert_eq!(single.pdf_page_count(PDF_BYTES).unwrap(), 1);
    }

    #[test]
    fn rendered_page_over_pixel_limit_is_refused() {
        let config = PipelineConfig {
            max_pixels: 100,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(Arc::new(MockEngine::marker_aware()), config)
            .with_pdf_renderer(Arc::new(MockPdfRenderer::new(vec![upright_marker_page(20, 20)])));
        let err = pipeline.process_pdf(PDF_BYTES, ProcessOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::ImageTooLarge(_)));
    }

    #[test]
    fn page_text_is_trimmed_under_headers() {
        let page = |n: usize, text: &str| PdfPageOutput {
            page_number: n,
            output: ProcessOutput {
                corrected_png: Vec::new(),
                width: 1,
                height: 1,
                recognized_text: text.to_string(),
                document: None,
                tables: None,
                orientation: OrientationOutcome {
                    angle: RotationAngle::Deg0,
                    source: OrientationSource::Skipped,
                },
                skew: None,
                confidence: 0.0,
                degradations: vec![],
            },
        };
        let joined = join_page_text(&[page(1, "  first\n"), page(2, ""), page(3, "third")]);
        assert_eq!(
            joined,
            "--- Page 1 ---\nfirst\n\n--- Page 2 ---\n\n\n--- Page 3 ---\nthird"
        );
    }
}
