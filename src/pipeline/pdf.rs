//! PDF page rasterization via Google PDFium.
//!
//! Each page is rendered to an RGB buffer and then handed to the same
//! pipeline an uploaded image goes through. `PdfiumRenderer` keeps no
//! state: the upstream `Pdfium` handle is `!Send`, so every call binds a
//! fresh one. The OS caches the library load.

use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::{PdfPageRenderer, PixelBuffer};
use super::PipelineError;

/// Cap on either side of a rendered page.
const MAX_DIMENSION_PX: u32 = 4096;

/// 144 DPI: twice the PDF's native 72 points per inch.
pub const DEFAULT_PDF_DPI: u32 = 144;

pub const DEFAULT_MAX_PDF_PAGES: usize = 100;

const POINTS_PER_INCH: f32 = 72.0;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Cheap checks before PDFium sees the bytes.
pub fn validate_pdf_bytes(bytes: &[u8], max_bytes: usize) -> Result<(), PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::InvalidPdf("empty upload".into()));
    }
    if bytes.len() > max_bytes {
        return Err(PipelineError::ImageTooLarge(format!(
            "{} bytes exceeds the {} MB upload limit",
            bytes.len(),
            max_bytes / (1024 * 1024)
        )));
    }
    // Some writers emit junk before the header; PDF readers scan the first 1 KiB.
    let head = &bytes[..bytes.len().min(1024)];
    if !head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        return Err(PipelineError::InvalidPdf("missing %PDF- header".into()));
    }
    Ok(())
}

/// Renders PDF pages with PDFium, loaded at runtime.
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Fails fast when the PDFium library cannot be found.
    ///
    /// Discovery order:
    /// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path to library file)
    /// 2. Alongside the running executable, or its `lib/` sibling
    /// 3. System library search paths
    pub fn new() -> Result<Self, PipelineError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

fn load_pdfium() -> Result<Pdfium, PipelineError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            PipelineError::PdfUnavailable(format!("failed to load PDFium from {path}: {e}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [
                exe_dir.to_path_buf(),
                exe_dir.join("lib"),
                exe_dir.join("..").join("lib"),
            ];
            for dir in &candidates {
                let lib_path =
                    Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        PipelineError::PdfUnavailable(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Encrypted documents get their own error; everything else is malformed input.
fn map_load_error(e: PdfiumError) -> PipelineError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        PipelineError::PdfEncrypted
    } else {
        PipelineError::InvalidPdf(format!("failed to load PDF: {msg}"))
    }
}

/// Pixel size for a page at `dpi`, both sides clamped to
/// `[1, MAX_DIMENSION_PX]` with the aspect ratio kept.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

impl PdfPageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, PipelineError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<PixelBuffer, PipelineError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        let pages = document.pages();
        let total = pages.len() as usize;

        let out_of_range = || PipelineError::PageOutOfRange {
            page: page_index + 1,
            total,
        };
        let index = u16::try_from(page_index).map_err(|_| out_of_range())?;
        let page = pages.get(index).map_err(|_| out_of_range())?;

        // Width and height already account for the page's /Rotate entry,
        // and PDFium renders with that rotation applied.
        let width_points = page.width().value;
        let height_points = page.height().value;
        let (target_w, target_h) = compute_render_dimensions(width_points, height_points, dpi);

        let uncapped_w = (width_points * dpi as f32 / POINTS_PER_INCH) as u32;
        if target_w != uncapped_w.max(1) {
            warn!(
                page = page_index + 1,
                raw_width = uncapped_w,
                capped_width = target_w,
                capped_height = target_h,
                "Page dimensions capped to {MAX_DIMENSION_PX}px",
            );
        }

        let config = PdfRenderConfig::new()
            .set_target_width(target_w as i32)
            .set_maximum_height(target_h as i32);

        let bitmap = page.render_with_config(&config).map_err(|e| {
            PipelineError::InvalidPdf(format!("page {} failed to render: {e}", page_index + 1))
        })?;
        let rgb = bitmap.as_image().to_rgb8();

        debug!(
            page = page_index + 1,
            width = rgb.width(),
            height = rgb.height(),
            "Rendered PDF page"
        );
        Ok(PixelBuffer::new(rgb))
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Serves pre-built page buffers; no PDFium needed.
pub struct MockPdfRenderer {
    pages: Vec<PixelBuffer>,
}

impl MockPdfRenderer {
    pub fn new(pages: Vec<PixelBuffer>) -> Self {
        Self { pages }
    }
}

impl PdfPageRenderer for MockPdfRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, PipelineError> {
        Ok(self.pages.len())
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_index: usize,
        _dpi: u32,
    ) -> Result<PixelBuffer, PipelineError> {
        self.pages
            .get(page_index)
            .cloned()
            .ok_or(PipelineError::PageOutOfRange {
                page: page_index + 1,
                total: self.pages.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::orientation::test_images::upright_marker_page;

    // ── Dimension logic (no PDFium needed) ──

    #[test]
    fn a4_at_default_dpi() {
        let (w, h) = compute_render_dimensions(595.0, 842.0, DEFAULT_PDF_DPI);
        assert_eq!((w, h), (1190, 1684));
    }

    #[test]
    fn letter_at_300dpi() {
        let (w, h) = compute_render_dimensions(612.0, 792.0, 300);
        assert!(w > 2500 && w < 2560, "Letter width at 300dpi: got {w}");
        assert!(h > 3250 && h < 3310, "Letter height at 300dpi: got {h}");
    }

    #[test]
    fn oversized_page_is_capped_keeping_aspect() {
        let (w, h) = compute_render_dimensions(5000.0, 10000.0, 200);
        assert!(h <= MAX_DIMENSION_PX && h >= MAX_DIMENSION_PX - 1, "got {h}");
        let ratio = h as f32 / w as f32;
        assert!((ratio - 2.0).abs() < 0.01, "Aspect ratio should be 2:1, got {ratio}");
    }

    #[test]
    fn very_wide_page_keeps_a_row() {
        let (w, h) = compute_render_dimensions(100_000.0, 1.0, 200);
        assert!(w <= MAX_DIMENSION_PX && w >= MAX_DIMENSION_PX - 1, "got {w}");
        assert_eq!(h, 1);
    }

    #[test]
    fn zero_points_clamped_to_1() {
        assert_eq!(compute_render_dimensions(0.0, 0.0, 200), (1, 1));
    }

    // ── Validation ──

    #[test]
    fn pdf_bytes_need_a_header() {
        assert!(validate_pdf_bytes(b"%PDF-1.7\n%...", 1024).is_ok());
        assert!(validate_pdf_bytes(b"\n\n%PDF-1.4\n", 1024).is_ok());
        assert!(matches!(
            validate_pdf_bytes(&[], 1024),
            Err(PipelineError::InvalidPdf(_))
        ));
        assert!(matches!(
            validate_pdf_bytes(b"\x89PNG\r\n\x1a\n", 1024),
            Err(PipelineError::InvalidPdf(_))
        ));
    }

    #[test]
    fn oversized_pdf_is_too_large() {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(2048, b' ');
        assert!(matches!(
            validate_pdf_bytes(&bytes, 1024),
            Err(PipelineError::ImageTooLarge(_))
        ));
    }

    #[test]
    fn encryption_errors_are_recognized() {
        let err = map_load_error(PdfiumError::PdfiumLibraryInternalError(
            PdfiumInternalError::PasswordError,
        ));
        assert!(matches!(err, PipelineError::PdfEncrypted));

        let err = map_load_error(PdfiumError::PdfiumLibraryInternalError(
            PdfiumInternalError::FormatError,
        ));
        assert!(matches!(err, PipelineError::InvalidPdf(_)));
    }

    // ── Mock renderer ──

    #[test]
    fn mock_serves_pages_in_order() {
        let mock = MockPdfRenderer::new(vec![upright_marker_page(20, 10), upright_marker_page(30, 40)]);
        assert_eq!(mock.page_count(&[]).unwrap(), 2);
        let second = mock.render_page(&[], 1, DEFAULT_PDF_DPI).unwrap();
        assert_eq!((second.width(), second.height()), (30, 40));
    }

    #[test]
    fn mock_errors_for_out_of_range() {
        let mock = MockPdfRenderer::new(vec![upright_marker_page(20, 10)]);
        let err = mock.render_page(&[], 3, DEFAULT_PDF_DPI).unwrap_err();
        assert!(matches!(err, PipelineError::PageOutOfRange { page: 4, total: 1 }));
    }
}
