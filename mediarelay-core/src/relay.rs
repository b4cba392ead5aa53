//! Public streaming entry point over a pool of backend workers.
//!
//! Each worker is one authenticated backend account with its own session
//! pool and descriptor cache. All workers share a single supervisor, so the
//! one-stream-per-requester rule holds across the whole pool.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::descriptor::{FileDescriptor, FileDescriptorCache};
use crate::session::SessionPool;
use crate::streaming::{
    ByteRange, ChunkStream, DisconnectProbe, NeverDisconnected, RangePlan, RequesterKey,
    StreamError, StreamRequest, StreamSupervisor, WorkloadCounter,
};
use crate::transport::{MediaClient, MetadataResolver};
use crate::RelayError;

/// One backend account and the state scoped to it.
pub struct Worker {
    index: usize,
    sessions: Arc<SessionPool>,
    files: Arc<FileDescriptorCache>,
    sweeper: JoinHandle<()>,
}

impl Worker {
    pub fn sessions(&self) -> &Arc<SessionPool> {
        &self.sessions
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub index: usize,
    pub active_streams: usize,
    pub cached_descriptors: usize,
    pub data_centers: Vec<i32>,
}

/// Point-in-time view of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub workers: Vec<WorkerStatus>,
    pub active_streams: usize,
}

/// Media relay serving range requests from a pool of backend workers.
pub struct MediaRelay {
    workers: Vec<Worker>,
    supervisor: StreamSupervisor,
    chunk_size: u32,
}

impl MediaRelay {
    /// Builds a relay with one worker per client.
    ///
    /// Must be called within a tokio runtime: each worker's cache sweeper is
    /// spawned here.
    ///
    /// # Errors
    ///
    /// - `RelayError::Configuration` - No clients given or invalid configuration
    pub fn new(
        clients: Vec<Arc<dyn MediaClient>>,
        resolver: Arc<dyn MetadataResolver>,
        config: &RelayConfig,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        if clients.is_empty() {
            return Err(RelayError::Configuration {
                reason: "at least one backend client is required".to_string(),
            });
        }

        let retry_policy = config.session.retry_policy();
        let workers: Vec<Worker> = clients
            .into_iter()
            .enumerate()
            .map(|(index, client)| {
                let sessions = Arc::new(SessionPool::new(Arc::clone(&client), retry_policy.clone()));
                let files = Arc::new(FileDescriptorCache::new(
                    Arc::clone(&client),
                    Arc::clone(&resolver),
                ));
                let sweeper = files.spawn_sweeper(config.cache.sweep_interval);
                Worker {
                    index,
                    sessions,
                    files,
                    sweeper,
                }
            })
            .collect();

        tracing::info!(
            "Media relay ready: {} workers, chunk size {} bytes",
            workers.len(),
            config.streaming.chunk_size
        );

        Ok(Self {
            supervisor: StreamSupervisor::new(Arc::new(WorkloadCounter::new(workers.len()))),
            workers,
            chunk_size: config.streaming.chunk_size,
        })
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Looks up a worker by index.
    ///
    /// # Errors
    ///
    /// - `StreamError::UnknownWorker` - Index outside the pool
    pub fn worker(&self, index: usize) -> Result<&Worker, StreamError> {
        self.workers.get(index).ok_or(StreamError::UnknownWorker {
            index,
            workers: self.workers.len(),
        })
    }

    /// Worker with the fewest active streams; the lowest index wins ties.
    pub fn least_loaded_worker(&self) -> usize {
        self.supervisor.workload().least_loaded().unwrap_or(0)
    }

    /// Resolves the descriptor of a message's file through a worker's cache.
    ///
    /// # Errors
    ///
    /// - `StreamError::UnknownWorker` - Index outside the pool
    /// - `StreamError::NotFound` - Message carries no file
    /// - `StreamError::MetadataLookup` - Lookup failed
    pub async fn describe(
        &self,
        worker_index: usize,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Arc<FileDescriptor>, StreamError> {
        self.worker(worker_index)?
            .files
            .resolve(chat_id, message_id)
            .await
    }

    /// Streams `range` (the whole file when `None`) of a message's file.
    ///
    /// # Errors
    ///
    /// See [`MediaRelay::stream_with_probe`].
    pub async fn stream(
        &self,
        chat_id: i64,
        message_id: i32,
        range: Option<ByteRange>,
        requester: RequesterKey,
        worker_index: usize,
    ) -> Result<ChunkStream, StreamError> {
        self.stream_with_probe(
            chat_id,
            message_id,
            range,
            requester,
            worker_index,
            Arc::new(NeverDisconnected),
        )
        .await
    }

    /// Streams a message's file, polling `probe` before every fetch.
    ///
    /// Only metadata resolution fails the call. Session or fetch failures
    /// after that show up as a stream that ends early.
    ///
    /// # Errors
    ///
    /// - `StreamError::NotFound` - Message carries no file
    /// - `StreamError::MetadataLookup` - Lookup failed
    /// - `StreamError::InvalidRange` - Range lies outside the file
    /// - `StreamError::UnknownWorker` - Index outside the pool
    pub async fn stream_with_probe(
        &self,
        chat_id: i64,
        message_id: i32,
        range: Option<ByteRange>,
        requester: RequesterKey,
        worker_index: usize,
        probe: Arc<dyn DisconnectProbe>,
    ) -> Result<ChunkStream, StreamError> {
        let descriptor = self.describe(worker_index, chat_id, message_id).await?;
        self.stream_descriptor(descriptor, range, requester, worker_index, probe)
            .await
    }

    /// Streams an already resolved file.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidRange` - Range lies outside the file
    /// - `StreamError::UnknownWorker` - Index outside the pool
    pub async fn stream_descriptor(
        &self,
        descriptor: Arc<FileDescriptor>,
        range: Option<ByteRange>,
        requester: RequesterKey,
        worker_index: usize,
        probe: Arc<dyn DisconnectProbe>,
    ) -> Result<ChunkStream, StreamError> {
        let worker = self.worker(worker_index)?;

        let range = match range {
            Some(range) => ByteRange::new(range.start, range.end, descriptor.file_size)?,
            None => match ByteRange::full(descriptor.file_size) {
                Some(range) => range,
                None => {
                    // Nothing to fetch, but the request still supersedes the
                    // requester's active stream.
                    self.supervisor.cancel(&requester).await;
                    return Ok(ChunkStream::empty(requester));
                }
            },
        };

        self.supervisor
            .start_stream(StreamRequest {
                requester,
                descriptor,
                worker_index,
                plan: RangePlan::new(range, self.chunk_size),
                sessions: Arc::clone(&worker.sessions),
                probe,
            })
            .await
    }

    /// Active stream count per worker, in index order.
    pub fn workload(&self) -> Vec<usize> {
        self.supervisor.workload().snapshot()
    }

    pub fn active_streams(&self) -> usize {
        self.supervisor.active_count()
    }

    /// Cancels the stream running for `requester`, if any.
    pub async fn cancel(&self, requester: &RequesterKey) -> bool {
        self.supervisor.cancel(requester).await
    }

    pub async fn status(&self) -> RelayStatus {
        let loads = self.workload();
        let mut workers = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            workers.push(WorkerStatus {
                index: worker.index,
                active_streams: loads.get(worker.index).copied().unwrap_or(0),
                cached_descriptors: worker.files.len(),
                data_centers: worker
                    .sessions
                    .cached_data_centers()
                    .await
                    .into_iter()
                    .map(|dc| dc.0)
                    .collect(),
            });
        }

        RelayStatus {
            workers,
            active_streams: self.active_streams(),
        }
    }

    /// Cancels all streams and stops every worker's sessions.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down media relay");
        self.supervisor.cancel_all().await;
        for worker in &self.workers {
            worker.sweeper.abort();
            worker.sessions.shutdown().await;
        }
    }
}

impl Drop for MediaRelay {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.sweeper.abort();
        }
    }
}
