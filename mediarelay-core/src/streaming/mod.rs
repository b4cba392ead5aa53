//! Range-request streaming pipeline.
//!
//! A byte range is planned into chunk-aligned fetches (`range`), pulled one
//! chunk at a time from a media session (`fetcher`), and driven by a
//! supervised task per requester (`supervisor`) that enforces a single active
//! stream per requester and keeps per-worker load counters (`workload`)
//! balanced on every exit path.

pub mod fetcher;
pub mod range;
pub mod supervisor;
pub mod workload;

pub use fetcher::ChunkFetcher;
pub use range::{ByteRange, RangeError, RangePlan};
pub use supervisor::{
    ChunkStream, DisconnectProbe, NeverDisconnected, RequesterKey, StreamOutcome, StreamRequest,
    StreamSupervisor,
};
pub use workload::{WorkloadCounter, WorkloadLease};

use crate::transport::TransportError;

/// Errors surfaced to callers of the streaming entry points.
///
/// Failures past metadata resolution do not appear here: they end the stream
/// early and are reported through [`StreamOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("message {message_id} in chat {chat_id} has no file")]
    NotFound { chat_id: i64, message_id: i32 },

    #[error("file metadata lookup failed: {source}")]
    MetadataLookup {
        #[source]
        source: TransportError,
    },

    #[error("worker {index} does not exist (pool has {workers} workers)")]
    UnknownWorker { index: usize, workers: usize },

    /// The stream was superseded or shut down before it finished.
    #[error("stream cancelled")]
    Cancelled,

    #[error(transparent)]
    InvalidRange(#[from] RangeError),
}
