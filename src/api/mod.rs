//! HTTP surface of the OCR service.
//!
//! `build_router()` returns a plain `Router` so tests can drive it with
//! `oneshot`; `server` owns binding and shutdown.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::build_router;
pub use server::{serve_until_ctrl_c, start_server, OcrServer, ServerSession};
pub use types::AppState;
