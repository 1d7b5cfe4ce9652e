//! API endpoint handlers.
//!
//! Handlers only move bytes in and out; the work happens in
//! [`crate::pipeline::Pipeline`] on the blocking pool.

pub mod health;
pub mod ocr;
pub mod pdf;
pub mod rotate;

use axum::extract::Multipart;

use crate::api::error::ApiError;
use crate::api::types::AppState;
use crate::pipeline::{Pipeline, PipelineError};

/// Multipart field carrying the uploaded image.
pub const UPLOAD_FIELD: &str = "file";

/// Multipart field carrying an uploaded PDF; `file` is accepted too.
pub const PDF_FIELD: &str = "pdf";

/// One uploaded file and the name the client gave it.
pub(crate) struct Upload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

/// Pull the `file` field out of a multipart body.
pub(crate) async fn read_upload(multipart: Multipart) -> Result<Vec<u8>, ApiError> {
    Ok(read_named_upload(multipart, &[UPLOAD_FIELD]).await?.bytes)
}

/// Pull the first field whose name is in `names`.
pub(crate) async fn read_named_upload(
    mut multipart: Multipart,
    names: &[&str],
) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name().is_some_and(|name| names.contains(&name)) {
            let filename = field.file_name().map(str::to_string);
            let bytes = field.bytes().await?;
            return Ok(Upload {
                bytes: bytes.to_vec(),
                filename,
            });
        }
    }
    Err(ApiError::BadRequest(format!(
        "multipart field '{}' is required",
        names.join("' or '")
    )))
}

/// Run one CPU-bound pipeline job under the concurrency limit.
///
/// The permit is held until the blocking task finishes, so at most
/// `max_jobs` runs are ever in flight.
pub(crate) async fn run_job<T, F>(state: &AppState, job: F) -> Result<T, ApiError>
where
    F: FnOnce(&Pipeline) -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    let _permit = state
        .jobs
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::Unavailable)?;

    let pipeline = state.pipeline.clone();
    let result = tokio::task::spawn_blocking(move || job(&pipeline)).await?;
    Ok(result?)
}
