//! Mediarelay Web - HTTP range streaming server
//!
//! Serves files from the media relay as HTTP responses honouring Range
//! requests, plus a small JSON API for worker load.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::ApiError;
pub use server::{AppState, build_router, run_server};
