//! `POST /rotate`: orientation correction only, PNG in the body.

use axum::extract::{Multipart, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};

use super::{read_upload, run_job};
use crate::api::error::ApiError;
use crate::api::types::AppState;
use crate::pipeline::{OrientationOutcome, OrientationSource};

/// Clockwise degrees applied to the upload.
pub const ROTATION_HEADER: HeaderName = HeaderName::from_static("x-rotation-angle");

/// How the angle was chosen: `detected`, `fallback`, `unresolved`.
pub const SOURCE_HEADER: HeaderName = HeaderName::from_static("x-orientation-source");

pub async fn rotate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let bytes = read_upload(multipart).await?;
    tracing::info!(bytes = bytes.len(), "Rotate request received");

    let output = run_job(&state, move |pipeline| pipeline.rotate_only(&bytes)).await?;

    let headers = png_headers(&output.orientation);
    Ok((headers, output.corrected_png).into_response())
}

/// Content type plus the rotation headers for a corrected PNG body.
pub(crate) fn png_headers(orientation: &OrientationOutcome) -> HeaderMap {
    let source = match orientation.source {
        OrientationSource::Detected { .. } => "detected",
        OrientationSource::Fallback { .. } => "fallback",
        OrientationSource::Unresolved => "unresolved",
        OrientationSource::Skipped => "skipped",
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(ROTATION_HEADER, HeaderValue::from(orientation.angle.degrees()));
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(source));
    headers
}
