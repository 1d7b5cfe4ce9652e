//! `POST /ocr`: orientation correction, optional deskew, recognition.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use uuid::Uuid;

use super::{read_upload, run_job};
use crate::api::error::ApiError;
use crate::api::types::{AppState, OcrQuery, OcrResponse};
use crate::pipeline::ProcessOptions;

/// Accepts a multipart `file`, returns text plus the corrected page.
pub async fn recognize(
    State(state): State<AppState>,
    Query(query): Query<OcrQuery>,
    multipart: Multipart,
) -> Result<Json<OcrResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let bytes = read_upload(multipart).await?;
    let options = ProcessOptions::from(query);

    tracing::info!(
        request_id = %request_id,
        bytes = bytes.len(),
        structured = options.structured,
        tables = options.detect_tables,
        skew = options.skew_correct,
        "OCR request received"
    );

    let output = run_job(&state, move |pipeline| pipeline.process(&bytes, options)).await?;

    if !output.degradations.is_empty() {
        tracing::warn!(
            request_id = %request_id,
            degradations = ?output.degradations,
            "OCR completed with degradations"
        );
    }

    Ok(Json(OcrResponse::from_output(request_id, output)))
}
