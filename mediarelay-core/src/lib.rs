//! Mediarelay Core - chunked media relay streaming
//!
//! Fetches files stored on a messaging backend in fixed-size chunks and
//! republishes byte ranges of them as streams: per-data-center session
//! management, descriptor caching, range planning, and supervised streaming
//! tasks with per-worker load accounting.

pub mod config;
pub mod descriptor;
pub mod relay;
pub mod session;
pub mod simulation;
pub mod streaming;
pub mod tracing_setup;
pub mod transport;

// Re-export main types for convenient access
pub use config::RelayConfig;
pub use descriptor::{FileDescriptor, FileDescriptorCache, FileKind, FileLocation};
pub use relay::{MediaRelay, RelayStatus, WorkerStatus};
pub use session::{SessionError, SessionPool};
pub use streaming::{
    ByteRange, ChunkStream, DisconnectProbe, RangeError, RequesterKey, StreamError, StreamOutcome,
};
pub use transport::{DataCenterId, MediaClient, MetadataResolver, TransportError, TransportSession};

/// Errors that can bubble up from any relay subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Streaming error: {0}")]
    Stream(#[from] StreamError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Stream(e) => match e {
                StreamError::NotFound { .. } => "File not found".to_string(),
                StreamError::InvalidRange(RangeError::Malformed { .. }) => {
                    "Invalid Range header".to_string()
                }
                StreamError::InvalidRange(RangeError::Unsatisfiable { .. }) => {
                    "Requested range not satisfiable".to_string()
                }
                StreamError::MetadataLookup { .. } => "Could not look up the file".to_string(),
                _ => "Streaming error occurred".to_string(),
            },
            RelayError::Session(_) => "Media temporarily unavailable".to_string(),
            RelayError::Transport(_) => "Backend error occurred".to_string(),
            RelayError::Configuration { reason } => format!("Configuration error: {reason}"),
            RelayError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RelayError::Configuration { .. }
                | RelayError::Stream(StreamError::InvalidRange(_))
                | RelayError::Stream(StreamError::NotFound { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let not_found = RelayError::from(StreamError::NotFound {
            chat_id: -1,
            message_id: 2,
        });
        assert_eq!(not_found.user_message(), "File not found");
        assert!(not_found.is_user_error());

        let unavailable = RelayError::from(SessionError::Setup {
            dc: DataCenterId(3),
            source: TransportError::Timeout,
        });
        assert_eq!(unavailable.user_message(), "Media temporarily unavailable");
        assert!(!unavailable.is_user_error());
    }

    #[test]
    fn test_range_errors_convert_through_stream_error() {
        let error = RelayError::from(StreamError::from(RangeError::Unsatisfiable { file_size: 9 }));
        assert_eq!(error.user_message(), "Requested range not satisfiable");
        assert!(error.is_user_error());
    }
}
