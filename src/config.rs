use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::pipeline::ocr::DEFAULT_PSM;
use crate::pipeline::PipelineConfig;

/// Application-level constants
pub const APP_NAME: &str = "upright";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME"))
}

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_TESSERACT_CMD: &str = "tesseract";
pub const DEFAULT_LANGUAGES: &str = "eng";

/// Runtime settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub tesseract_cmd: PathBuf,
    pub languages: String,
    pub tessdata_dir: Option<PathBuf>,
    /// Tesseract page segmentation mode for recognition.
    pub page_segmentation: u8,
    pub max_jobs: usize,
    pub pipeline: PipelineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            tesseract_cmd: PathBuf::from(DEFAULT_TESSERACT_CMD),
            languages: DEFAULT_LANGUAGES.to_string(),
            tessdata_dir: None,
            page_segmentation: DEFAULT_PSM,
            max_jobs: default_max_jobs(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// One concurrent job per core, at least one.
fn default_max_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(bind) = parse_var(&lookup, "UPRIGHT_BIND") {
            config.bind = bind;
        }
        if let Some(cmd) = non_empty(&lookup, "UPRIGHT_TESSERACT_CMD") {
            config.tesseract_cmd = PathBuf::from(cmd);
        }
        if let Some(langs) = non_empty(&lookup, "UPRIGHT_LANG") {
            config.languages = langs;
        }
        config.tessdata_dir = non_empty(&lookup, "TESSDATA_PREFIX").map(PathBuf::from);

        if let Some(psm) = parse_var::<u8>(&lookup, "UPRIGHT_PSM") {
            // 0 is OSD only and 2 is unimplemented upstream; neither yields text.
            if matches!(psm, 1 | 3..=13) {
                config.page_segmentation = psm;
            } else {
                tracing::warn!(value = psm, "UPRIGHT_PSM out of range, keeping default");
            }
        }

        if let Some(mb) = parse_var::<usize>(&lookup, "UPRIGHT_MAX_IMAGE_MB") {
            if mb == 0 {
                tracing::warn!("UPRIGHT_MAX_IMAGE_MB must be positive, keeping default");
            } else {
                config.pipeline.max_image_bytes = mb.saturating_mul(1024 * 1024);
            }
        }
        if let Some(jobs) = parse_var::<usize>(&lookup, "UPRIGHT_MAX_JOBS") {
            config.max_jobs = jobs.max(1);
        }
        if let Some(min) = parse_var::<f32>(&lookup, "UPRIGHT_MIN_OSD_CONFIDENCE") {
            if min.is_finite() && min >= 0.0 {
                config.pipeline.min_osd_confidence = min;
            } else {
                tracing::warn!(value = min, "UPRIGHT_MIN_OSD_CONFIDENCE out of range, keeping default");
            }
        }
        if let Some(parallel) = parse_var::<bool>(&lookup, "UPRIGHT_PARALLEL_FALLBACK") {
            config.pipeline.parallel_fallback = parallel;
        }
        if let Some(dpi) = parse_var::<u32>(&lookup, "UPRIGHT_PDF_DPI") {
            if (36..=600).contains(&dpi) {
                config.pipeline.pdf_dpi = dpi;
            } else {
                tracing::warn!(value = dpi, "UPRIGHT_PDF_DPI outside 36..=600, keeping default");
            }
        }
        if let Some(pages) = parse_var::<usize>(&lookup, "UPRIGHT_MAX_PDF_PAGES") {
            config.pipeline.max_pdf_pages = pages.max(1);
        }

        config
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = non_empty(lookup, key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid setting, keeping default");
            None
        }
    }
}
