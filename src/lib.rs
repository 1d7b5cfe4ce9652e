pub mod api;
pub mod config;
pub mod pipeline;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServiceConfig;
use crate::pipeline::ocr::TesseractCli;
use crate::pipeline::tables::LayoutTableDetector;
use crate::pipeline::{Pipeline, PdfiumRenderer};

/// Build the shared pipeline from service settings.
pub fn build_pipeline(config: &ServiceConfig) -> Pipeline {
    let mut engine = TesseractCli::new(config.tesseract_cmd.clone())
        .with_languages(&config.languages)
        .with_page_segmentation(config.page_segmentation);
    if let Some(dir) = &config.tessdata_dir {
        engine = engine.with_tessdata_dir(dir);
    }

    match engine.probe() {
        Ok(version) => tracing::info!(%version, languages = engine.languages(), "Tesseract available"),
        Err(e) => tracing::warn!(
            error = %e,
            "Tesseract probe failed; requests will degrade until it is installed"
        ),
    }

    let tables = LayoutTableDetector::new(config.pipeline.tables.clone());
    let pipeline =
        Pipeline::new(Arc::new(engine), config.pipeline.clone()).with_table_detector(Arc::new(tables));

    match PdfiumRenderer::new() {
        Ok(renderer) => {
            tracing::info!(dpi = config.pipeline.pdf_dpi, "PDFium available; PDF routes enabled");
            pipeline.with_pdf_renderer(Arc::new(renderer))
        }
        Err(e) => {
            tracing::warn!(error = %e, "PDFium not found; PDF routes will answer 503");
            pipeline
        }
    }
}

pub fn run() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let service = ServiceConfig::from_env();
    tracing::info!(
        bind = %service.bind,
        max_jobs = service.max_jobs,
        max_image_bytes = service.pipeline.max_image_bytes,
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start async runtime: {e}"))?;

    let pipeline = build_pipeline(&service);
    let state = AppState::new(pipeline, service.max_jobs);

    runtime.block_on(api::serve_until_ctrl_c(service.bind, state))
}
