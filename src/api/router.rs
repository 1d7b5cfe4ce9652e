//! HTTP router.
//!
//! `POST /ocr`, `POST /rotate`, `GET /health`, and the PDF routes under
//! `/pdf`. The body limit is derived from the pipeline's image limit so oversized
//! uploads are refused before they are buffered.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.body_limit();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ocr", post(endpoints::ocr::recognize))
        .route("/rotate", post(endpoints::rotate::rotate))
        .route("/health", get(endpoints::health::check))
        .route("/pdf/pages", post(endpoints::pdf::page_count))
        .route("/pdf/image", post(endpoints::pdf::page_image))
        .route("/pdf/ocr", post(endpoints::pdf::page_ocr))
        .route("/pdf/json", post(endpoints::pdf::document))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
