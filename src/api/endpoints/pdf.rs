//! PDF routes: page count, one page as PNG or JSON, whole document as JSON.
//!
//! Each page is rendered and then runs through the same pipeline as an
//! uploaded image.

use axum::extract::{Multipart, Query, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_DISPOSITION};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use super::rotate::png_headers;
use super::{read_named_upload, run_job, Upload, PDF_FIELD, UPLOAD_FIELD};
use crate::api::error::ApiError;
use crate::api::types::{
    AppState, OcrResponse, PdfDocumentQuery, PdfDocumentResponse, PdfPageQuery, PdfPagesResponse,
};
use crate::pipeline::ProcessOptions;

/// Recognized page text, percent-encoded.
pub const TEXT_HEADER: HeaderName = HeaderName::from_static("x-ocr-text");

const PDF_FIELDS: [&str; 2] = [PDF_FIELD, UPLOAD_FIELD];

async fn read_pdf(state: &AppState, multipart: Multipart) -> Result<Upload, ApiError> {
    if !state.pipeline.pdf_enabled() {
        return Err(ApiError::PdfUnavailable(
            "PDF rendering is not available on this server".into(),
        ));
    }
    read_named_upload(multipart, &PDF_FIELDS).await
}

/// `POST /pdf/pages`
pub async fn page_count(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PdfPagesResponse>, ApiError> {
    let upload = read_pdf(&state, multipart).await?;
    tracing::info!(bytes = upload.bytes.len(), "PDF page count requested");

    let bytes = upload.bytes;
    let total_pages = run_job(&state, move |pipeline| pipeline.pdf_page_count(&bytes)).await?;
    Ok(Json(PdfPagesResponse { total_pages }))
}

/// `POST /pdf/image?page=N`: the corrected page as PNG, text in a header.
pub async fn page_image(
    State(state): State<AppState>,
    Query(query): Query<PdfPageQuery>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_pdf(&state, multipart).await?;
    tracing::info!(bytes = upload.bytes.len(), page = query.page, "PDF page image requested");

    let bytes = upload.bytes;
    let options = ProcessOptions::from(query);
    let output = run_job(&state, move |pipeline| {
        pipeline.process_pdf_page(&bytes, query.page, options)
    })
    .await?;

    let mut headers = png_headers(&output.orientation);
    let encoded = urlencoding::encode(&output.recognized_text);
    let text = HeaderValue::from_str(&encoded)
        .map_err(|e| ApiError::Internal(format!("text header: {e}")))?;
    headers.insert(TEXT_HEADER, text);

    Ok((headers, output.corrected_png).into_response())
}

/// `POST /pdf/ocr?page=N`: one page in the `/ocr` response shape.
pub async fn page_ocr(
    State(state): State<AppState>,
    Query(query): Query<PdfPageQuery>,
    multipart: Multipart,
) -> Result<Json<OcrResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let upload = read_pdf(&state, multipart).await?;
    tracing::info!(
        request_id = %request_id,
        bytes = upload.bytes.len(),
        page = query.page,
        "PDF page OCR requested"
    );

    let bytes = upload.bytes;
    let options = ProcessOptions::from(query);
    let output = run_job(&state, move |pipeline| {
        pipeline.process_pdf_page(&bytes, query.page, options)
    })
    .await?;

    Ok(Json(OcrResponse::from_output(request_id, output)))
}

/// `POST /pdf/json`: every page, downloadable as `<name>-extracted.json`.
pub async fn document(
    State(state): State<AppState>,
    Query(query): Query<PdfDocumentQuery>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let Upload { bytes, filename } = read_pdf(&state, multipart).await?;
    tracing::info!(
        request_id = %request_id,
        bytes = bytes.len(),
        filename = filename.as_deref().unwrap_or(""),
        include_images = query.include_images,
        "PDF document requested"
    );

    let options = ProcessOptions::from(query);
    let output = run_job(&state, move |pipeline| pipeline.process_pdf(&bytes, options)).await?;

    if output.is_degraded() {
        tracing::warn!(request_id = %request_id, "PDF completed with degraded pages");
    }

    let disposition = attachment_name(filename.as_deref())
        .and_then(|name| HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")).ok());
    let body = Json(PdfDocumentResponse::from_output(
        request_id,
        filename,
        output,
        query.include_images,
    ));

    Ok(match disposition {
        Some(value) => ([(CONTENT_DISPOSITION, value)], body).into_response(),
        None => body.into_response(),
    })
}

/// `report.PDF` → `report-extracted.json`. Quotes and control characters
/// would break the header, so such names get no download name.
fn attachment_name(filename: Option<&str>) -> Option<String> {
    let name = filename?.trim();
    if name.is_empty() || name.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return None;
    }
    let stem = match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".pdf") => {
            &name[..cut]
        }
        _ => name,
    };
    Some(format!("{stem}-extracted.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_name_strips_pdf_extension() {
        assert_eq!(attachment_name(Some("report.PDF")).as_deref(), Some("report-extracted.json"));
        assert_eq!(attachment_name(Some("notes")).as_deref(), Some("notes-extracted.json"));
        assert_eq!(attachment_name(Some("a\"b.pdf")), None);
        assert_eq!(attachment_name(Some("  ")), None);
        assert_eq!(attachment_name(None), None);
    }
}
