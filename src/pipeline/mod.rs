pub mod types;
pub mod decode;
pub mod ocr;
pub mod osd;
pub mod confidence;
pub mod orientation;
pub mod fallback;
pub mod skew;
pub mod structure;
pub mod tables;
pub mod pdf;
pub mod orchestrator;

pub use types::*;
pub use decode::*;
pub use confidence::*;
pub use orientation::*;
pub use fallback::*;
pub use skew::*;
pub use structure::*;
pub use pdf::*;
pub use orchestrator::*;

use thiserror::Error;

/// Errors that abort a pipeline run. Everything engine-related degrades
/// instead; see [`RecognitionError`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Image exceeds limit: {0}")]
    ImageTooLarge(String),

    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error("Pipeline worker failed: {0}")]
    Worker(String),

    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("Page {page} out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    #[error("PDF rendering unavailable: {0}")]
    PdfUnavailable(String),
}

/// Failure of a single recognition engine call.
///
/// Never fatal to a request: the orchestrator turns these into
/// `Undetermined` orientation, zero fallback scores, or empty token lists.
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Recognition engine unavailable: {0}")]
    Unavailable(String),

    #[error("Recognition process exited with {status}: {stderr}")]
    Process { status: String, stderr: String },

    #[error("Unreadable engine output: {0}")]
    Parse(String),

    #[error("Failed to encode image for engine: {0}")]
    Encode(String),

    #[error("I/O error talking to engine: {0}")]
    Io(#[from] std::io::Error),
}
