//! API error types with structured JSON responses.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::PipelineError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Image too large: {0}")]
    ImageTooLarge(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),
    #[error("PDF is password-protected")]
    PdfEncrypted,
    #[error("Page out of range: {0}")]
    PageOutOfRange(String),
    #[error("PDF rendering unavailable: {0}")]
    PdfUnavailable(String),
    #[error("Service shutting down")]
    Unavailable,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidImage(detail) => (
                StatusCode::BAD_REQUEST,
                "INVALID_IMAGE",
                detail.clone(),
            ),
            ApiError::ImageTooLarge(detail) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "IMAGE_TOO_LARGE",
                detail.clone(),
            ),
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                detail.clone(),
            ),
            ApiError::InvalidPdf(detail) => (
                StatusCode::BAD_REQUEST,
                "INVALID_PDF",
                detail.clone(),
            ),
            ApiError::PdfEncrypted => (
                StatusCode::BAD_REQUEST,
                "PDF_ENCRYPTED",
                "Password-protected PDFs are not supported".to_string(),
            ),
            ApiError::PageOutOfRange(detail) => (
                StatusCode::BAD_REQUEST,
                "PAGE_OUT_OF_RANGE",
                detail.clone(),
            ),
            ApiError::PdfUnavailable(detail) => {
                tracing::warn!(detail, "PDF request refused");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "PDF_UNAVAILABLE",
                    "PDF rendering is not available on this server".to_string(),
                )
            }
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                "Service is shutting down".to_string(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidImage(detail) => ApiError::InvalidImage(detail),
            PipelineError::ImageTooLarge(detail) => ApiError::ImageTooLarge(detail),
            PipelineError::InvalidPdf(detail) => ApiError::InvalidPdf(detail),
            PipelineError::PdfEncrypted => ApiError::PdfEncrypted,
            err @ PipelineError::PageOutOfRange { .. } => ApiError::PageOutOfRange(err.to_string()),
            PipelineError::PdfUnavailable(detail) => ApiError::PdfUnavailable(detail),
            PipelineError::Encode(detail) | PipelineError::Worker(detail) => {
                ApiError::Internal(detail)
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::ImageTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("pipeline task failed: {err}"))
    }
}
