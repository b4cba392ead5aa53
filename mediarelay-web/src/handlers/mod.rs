//! HTTP request handlers organized by functionality

pub mod api;
pub mod media;
pub mod stream;

// Re-export handler functions
pub use api::api_workloads;
pub use media::MediaHeaders;
pub use stream::{FilePath, stream_file};
