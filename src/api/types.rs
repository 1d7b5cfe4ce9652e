//! Shared state and wire types for the HTTP layer.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::pipeline::{
    Block, ConfidenceBand, Degradation, OrientationMode, OrientationOutcome, PdfOutput,
    PdfPageOutput, Pipeline, ProcessOptions, ProcessOutput, SkewEstimate, TableRegion,
};

// ═══════════════════════════════════════════════════════════
// App state, shared by every handler
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Bounds concurrent pipeline runs; the service's throughput ceiling.
    pub jobs: Arc<Semaphore>,
    pub max_jobs: usize,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: Pipeline, max_jobs: usize) -> Self {
        let max_jobs = max_jobs.max(1);
        Self {
            pipeline: Arc::new(pipeline),
            jobs: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
            started_at: Instant::now(),
        }
    }

    /// Request body cap: the image limit plus room for multipart framing.
    pub fn body_limit(&self) -> usize {
        self.pipeline.config().max_image_bytes.saturating_add(64 * 1024)
    }
}

// ═══════════════════════════════════════════════════════════
// Requests
// ═══════════════════════════════════════════════════════════

/// Query flags for `POST /ocr`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct OcrQuery {
    pub structured: bool,
    pub tables: bool,
    pub skew: bool,
    /// `false` leaves the page as uploaded.
    pub orient: Option<bool>,
}

impl From<OcrQuery> for ProcessOptions {
    fn from(query: OcrQuery) -> Self {
        ProcessOptions {
            structured: query.structured,
            detect_tables: query.tables,
            skew_correct: query.skew,
            orientation: orientation_mode(query.orient),
        }
    }
}

fn orientation_mode(orient: Option<bool>) -> OrientationMode {
    match orient {
        Some(false) => OrientationMode::Skip,
        _ => OrientationMode::Auto,
    }
}

/// Query for the single-page PDF routes. Same flags as [`OcrQuery`].
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PdfPageQuery {
    /// 1-based page number.
    pub page: usize,
    pub structured: bool,
    pub tables: bool,
    pub skew: bool,
    pub orient: Option<bool>,
}

impl Default for PdfPageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            structured: false,
            tables: false,
            skew: false,
            orient: None,
        }
    }
}

impl From<PdfPageQuery> for ProcessOptions {
    fn from(query: PdfPageQuery) -> Self {
        ProcessOptions {
            structured: query.structured,
            detect_tables: query.tables,
            skew_correct: query.skew,
            orientation: orientation_mode(query.orient),
        }
    }
}

/// Query for `POST /pdf/json`. Blocks are always returned.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PdfDocumentQuery {
    /// Embed each corrected page as base64 PNG.
    pub include_images: bool,
    pub tables: bool,
    pub skew: bool,
    pub orient: Option<bool>,
}

impl Default for PdfDocumentQuery {
    fn default() -> Self {
        Self {
            include_images: true,
            tables: false,
            skew: false,
            orient: None,
        }
    }
}

impl From<PdfDocumentQuery> for ProcessOptions {
    fn from(query: PdfDocumentQuery) -> Self {
        ProcessOptions {
            structured: true,
            detect_tables: query.tables,
            skew_correct: query.skew,
            orientation: orientation_mode(query.orient),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub request_id: String,
    pub text: String,
    /// Corrected page, base64 PNG.
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub orientation: OrientationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skew: Option<SkewEstimate>,
    pub confidence: f32,
    pub confidence_band: ConfidenceBand,
    pub degraded: bool,
    pub degradations: Vec<Degradation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableRegion>>,
}

impl OcrResponse {
    pub fn from_output(request_id: String, output: ProcessOutput) -> Self {
        use base64::Engine;

        Self {
            request_id,
            text: output.recognized_text,
            image: base64::engine::general_purpose::STANDARD.encode(&output.corrected_png),
            width: output.width,
            height: output.height,
            orientation: output.orientation,
            skew: output.skew,
            confidence: output.confidence,
            confidence_band: ConfidenceBand::from_score(output.confidence),
            degraded: !output.degradations.is_empty(),
            degradations: output.degradations,
            blocks: output.document.map(|d| d.blocks),
            tables: output.tables,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PdfPagesResponse {
    pub total_pages: usize,
}

/// `POST /pdf/json` body: one entry per page plus the joined text.
#[derive(Debug, Serialize)]
pub struct PdfDocumentResponse {
    pub request_id: String,
    pub degraded: bool,
    pub document: PdfDocument,
}

#[derive(Debug, Serialize)]
pub struct PdfDocument {
    pub total_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub pages: Vec<PdfPageEntry>,
    pub full_text: String,
}

#[derive(Debug, Serialize)]
pub struct PdfPageEntry {
    pub page_number: usize,
    pub text: String,
    pub blocks: Vec<Block>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub width: u32,
    pub height: u32,
    pub orientation: OrientationOutcome,
    pub confidence: f32,
    pub degradations: Vec<Degradation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableRegion>>,
}

impl PdfPageEntry {
    fn from_page(page: PdfPageOutput, include_image: bool) -> Self {
        use base64::Engine;

        let output = page.output;
        Self {
            page_number: page.page_number,
            text: output.recognized_text.trim().to_string(),
            blocks: output.document.map(|d| d.blocks).unwrap_or_default(),
            image: include_image
                .then(|| base64::engine::general_purpose::STANDARD.encode(&output.corrected_png)),
            width: output.width,
            height: output.height,
            orientation: output.orientation,
            confidence: output.confidence,
            degradations: output.degradations,
            tables: output.tables,
        }
    }
}

impl PdfDocumentResponse {
    pub fn from_output(
        request_id: String,
        filename: Option<String>,
        output: PdfOutput,
        include_images: bool,
    ) -> Self {
        let degraded = output.is_degraded();
        Self {
            request_id,
            degraded,
            document: PdfDocument {
                total_pages: output.total_pages,
                filename,
                pages: output
                    .pages
                    .into_iter()
                    .map(|page| PdfPageEntry::from_page(page, include_images))
                    .collect(),
                full_text: output.full_text,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{OrientationSource, RotationAngle};

    #[test]
    fn query_maps_to_options() {
        let query = OcrQuery {
            structured: true,
            tables: false,
            skew: true,
            orient: Some(false),
        };
        let options = ProcessOptions::from(query);
        assert!(options.structured && options.skew_correct && !options.detect_tables);
        assert_eq!(options.orientation, OrientationMode::Skip);

        let default = ProcessOptions::from(OcrQuery::default());
        assert_eq!(default.orientation, OrientationMode::Auto);
    }

    #[test]
    fn response_omits_absent_sections() {
        let output = ProcessOutput {
            corrected_png: vec![1, 2, 3],
            width: 10,
            height: 20,
            recognized_text: "hi".into(),
            document: None,
            tables: None,
            orientation: OrientationOutcome {
                angle: RotationAngle::Deg90,
                source: OrientationSource::Detected { confidence: 4.0 },
            },
            skew: None,
            confidence: 91.0,
            degradations: vec![],
        };
        let json = serde_json::to_value(OcrResponse::from_output("r1".into(), output)).unwrap();

        assert_eq!(json["image"], "AQID");
        assert_eq!(json["orientation"]["angle"], 90);
        assert_eq!(json["orientation"]["source"]["kind"], "detected");
        assert_eq!(json["confidence_band"], "high");
        assert_eq!(json["degraded"], false);
        assert!(json.get("blocks").is_none());
        assert!(json.get("tables").is_none());
        assert!(json.get("skew").is_none());
    }

    #[test]
    fn pdf_queries_default_to_first_page_and_images() {
        assert_eq!(PdfPageQuery::default().page, 1);
        assert!(PdfDocumentQuery::default().include_images);
        let options = ProcessOptions::from(PdfDocumentQuery::default());
        assert!(options.structured);
    }

    #[test]
    fn pdf_document_drops_images_when_asked() {
        let page = PdfPageOutput {
            page_number: 1,
            output: ProcessOutput {
                corrected_png: vec![1, 2, 3],
                width: 10,
                height: 20,
                recognized_text: "  hi \n".into(),
                document: None,
                tables: None,
                orientation: OrientationOutcome {
                    angle: RotationAngle::Deg0,
                    source: OrientationSource::Skipped,
                },
                skew: None,
                confidence: 50.0,
                degradations: vec![Degradation::TablesUnavailable],
            },
        };
        let output = PdfOutput {
            total_pages: 1,
            pages: vec![page],
            full_text: "--- Page 1 ---\nhi".into(),
        };
        let json = serde_json::to_value(PdfDocumentResponse::from_output(
            "r2".into(),
            Some("scan.pdf".into()),
            output,
            false,
        ))
        .unwrap();

        assert_eq!(json["degraded"], true);
        assert_eq!(json["document"]["total_pages"], 1);
        assert_eq!(json["document"]["filename"], "scan.pdf");
        assert_eq!(json["document"]["pages"][0]["text"], "hi");
        assert_eq!(json["document"]["pages"][0]["blocks"], serde_json::json!([]));
        assert!(json["document"]["pages"][0].get("image").is_none());
    }
}
