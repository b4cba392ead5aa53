//! Supervised streaming tasks, one per requester.
//!
//! Every stream runs as its own tokio task feeding a bounded channel. The
//! supervisor keeps the task registered under its [`RequesterKey`]; starting
//! a new stream for a key cancels the registered task and waits for it to
//! finish unwinding before the replacement acquires its workload lease.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::StreamError;
use super::fetcher::ChunkFetcher;
use super::range::RangePlan;
use super::workload::{WorkloadCounter, WorkloadLease};
use crate::descriptor::FileDescriptor;
use crate::session::SessionPool;
use crate::transport::TransportError;

/// Identity of a logical consumer; at most one stream per key is active.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequesterKey(String);

impl RequesterKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for RequesterKey {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl From<&str> for RequesterKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for RequesterKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for RequesterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reports whether the downstream consumer has gone away.
///
/// Polled before the first fetch and before every fetch after it.
#[async_trait::async_trait]
pub trait DisconnectProbe: Send + Sync {
    async fn is_disconnected(&self) -> bool;
}

#[async_trait::async_trait]
impl<F> DisconnectProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    async fn is_disconnected(&self) -> bool {
        self()
    }
}

/// Probe for consumers whose only disconnect signal is dropping the stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDisconnected;

#[async_trait::async_trait]
impl DisconnectProbe for NeverDisconnected {
    async fn is_disconnected(&self) -> bool {
        false
    }
}

/// How a streaming task ended. `parts` counts chunks handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every planned part was delivered, or the backend ran out of bytes.
    Completed { parts: u64 },
    /// The probe reported a disconnect or the consumer dropped the stream.
    Disconnected { parts: u64 },
    /// No media session could be established; nothing was fetched.
    SessionUnavailable,
    /// Superseded by a newer stream for the same requester, or shut down.
    Cancelled { parts: u64 },
    /// A fetch failed; delivery stopped after `parts` chunks.
    Failed { parts: u64, error: TransportError },
}

impl StreamOutcome {
    pub fn parts(&self) -> u64 {
        match self {
            StreamOutcome::Completed { parts }
            | StreamOutcome::Disconnected { parts }
            | StreamOutcome::Cancelled { parts }
            | StreamOutcome::Failed { parts, .. } => *parts,
            StreamOutcome::SessionUnavailable => 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamOutcome::Cancelled { .. })
    }
}

/// Everything a streaming task needs to run.
pub struct StreamRequest {
    pub requester: RequesterKey,
    pub descriptor: Arc<FileDescriptor>,
    pub worker_index: usize,
    pub plan: RangePlan,
    /// Session pool of the worker the stream runs on.
    pub sessions: Arc<SessionPool>,
    pub probe: Arc<dyn DisconnectProbe>,
}

struct ActiveStream {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type ActiveStreams = Arc<Mutex<HashMap<RequesterKey, ActiveStream>>>;

type StartLocks = Mutex<HashMap<RequesterKey, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive right to start or cancel the stream of one requester.
///
/// Removes the key's lock from the map on drop once nobody else holds it.
struct StartPermit<'a> {
    locks: &'a StartLocks,
    requester: RequesterKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl<'a> StartPermit<'a> {
    async fn acquire(locks: &'a StartLocks, requester: &RequesterKey) -> StartPermit<'a> {
        let lock = Arc::clone(locks.lock().entry(requester.clone()).or_default());
        StartPermit {
            locks,
            requester: requester.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

impl Drop for StartPermit<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks
            .get(&self.requester)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.requester);
        }
    }
}

/// Owns the per-requester streaming tasks and the workload counters.
pub struct StreamSupervisor {
    active: ActiveStreams,
    workload: Arc<WorkloadCounter>,
    next_stream_id: AtomicU64,
    /// Per-requester locks: a superseded task is fully gone before its
    /// replacement registers, while other requesters proceed independently.
    starts: StartLocks,
}

impl StreamSupervisor {
    pub fn new(workload: Arc<WorkloadCounter>) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            workload,
            next_stream_id: AtomicU64::new(1),
            starts: Mutex::new(HashMap::new()),
        }
    }

    /// Starts streaming `request.plan` and returns the consumer side.
    ///
    /// Any stream still registered for the same requester is cancelled and
    /// awaited first, so its workload lease is released before the new
    /// stream takes one.
    ///
    /// # Errors
    ///
    /// - `StreamError::UnknownWorker` - `worker_index` is outside the pool
    pub async fn start_stream(&self, request: StreamRequest) -> Result<ChunkStream, StreamError> {
        if request.worker_index >= self.workload.workers() {
            return Err(StreamError::UnknownWorker {
                index: request.worker_index,
                workers: self.workload.workers(),
            });
        }

        let _permit = StartPermit::acquire(&self.starts, &request.requester).await;

        let previous = self.active.lock().remove(&request.requester);
        if let Some(previous) = previous {
            tracing::debug!(
                "Cancelling stream {} for {} in favour of a new request",
                previous.id,
                request.requester
            );
            Self::stop(previous).await;
        }

        let lease = self
            .workload
            .acquire(request.worker_index)
            .ok_or(StreamError::UnknownWorker {
                index: request.worker_index,
                workers: self.workload.workers(),
            })?;

        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let content_length = request.plan.content_length();
        let requester = request.requester.clone();

        tracing::debug!(
            "Starting stream {} for {} on worker {}: bytes {}-{} in {} parts",
            id,
            requester,
            request.worker_index,
            request.plan.range.start,
            request.plan.range.end,
            request.plan.part_count
        );

        let task = StreamTask {
            id,
            request,
            cancel: cancel.clone(),
            active: Arc::clone(&self.active),
        };

        {
            let mut active = self.active.lock();
            let handle = tokio::spawn(task.run(lease, chunk_tx, outcome_tx));
            active.insert(
                requester.clone(),
                ActiveStream {
                    id,
                    cancel,
                    handle,
                },
            );
        }

        Ok(ChunkStream {
            requester,
            content_length,
            chunks: chunk_rx,
            outcome_rx: Some(outcome_rx),
            outcome: None,
            finished: false,
        })
    }

    /// Cancels the stream registered for `requester` and waits for it to end.
    ///
    /// Returns false when no stream was active.
    pub async fn cancel(&self, requester: &RequesterKey) -> bool {
        let _permit = StartPermit::acquire(&self.starts, requester).await;
        let previous = self.active.lock().remove(requester);
        match previous {
            Some(previous) => {
                Self::stop(previous).await;
                true
            }
            None => false,
        }
    }

    /// Cancels every active stream and waits for all of them to end.
    ///
    /// All tasks are signalled before any is awaited.
    pub async fn cancel_all(&self) {
        let streams: Vec<_> = self.active.lock().drain().map(|(_, s)| s).collect();
        if !streams.is_empty() {
            tracing::info!("Cancelling {} active streams", streams.len());
        }
        for stream in &streams {
            stream.cancel.cancel();
        }
        for stream in streams {
            Self::stop(stream).await;
        }
    }

    async fn stop(stream: ActiveStream) {
        stream.cancel.cancel();
        if let Err(error) = stream.handle.await {
            tracing::warn!("Stream task {} ended abnormally: {}", stream.id, error);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn workload(&self) -> &Arc<WorkloadCounter> {
        &self.workload
    }
}

struct StreamTask {
    id: u64,
    request: StreamRequest,
    cancel: CancellationToken,
    active: ActiveStreams,
}

impl StreamTask {
    async fn run(
        self,
        lease: WorkloadLease,
        chunks: mpsc::Sender<Bytes>,
        outcome_tx: oneshot::Sender<StreamOutcome>,
    ) {
        let outcome = self.drive(&chunks).await;

        tracing::debug!(
            "Stream {} for {} finished: {:?}",
            self.id,
            self.request.requester,
            outcome
        );

        drop(lease);
        {
            let mut active = self.active.lock();
            if active
                .get(&self.request.requester)
                .is_some_and(|entry| entry.id == self.id)
            {
                active.remove(&self.request.requester);
            }
        }

        // Outcome goes out before the chunk sender closes, so the consumer
        // always finds it once the channel reports end of stream.
        let _ = outcome_tx.send(outcome);
        drop(chunks);
    }

    async fn drive(&self, chunks: &mpsc::Sender<Bytes>) -> StreamOutcome {
        let request = &self.request;

        let disconnected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return StreamOutcome::Cancelled { parts: 0 },
            disconnected = request.probe.is_disconnected() => disconnected,
        };
        if disconnected {
            return StreamOutcome::Disconnected { parts: 0 };
        }

        let dc = request.descriptor.dc_id;
        let session = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return StreamOutcome::Cancelled { parts: 0 },
            session = request.sessions.get_or_create(dc) => session,
        };
        let session = match session {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!("Media unavailable for stream {}: {}", self.id, error);
                return StreamOutcome::SessionUnavailable;
            }
        };

        let mut fetcher = ChunkFetcher::new(session, request.descriptor.location(), request.plan);

        loop {
            let parts = fetcher.parts_emitted();

            let disconnected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled { parts },
                disconnected = request.probe.is_disconnected() => disconnected,
            };
            if disconnected {
                return StreamOutcome::Disconnected { parts };
            }

            // Waiting for a free slot first keeps at most one fetch in flight
            // beyond what the consumer has taken.
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled { parts },
                permit = chunks.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return StreamOutcome::Disconnected { parts },
                },
            };

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled { parts },
                _ = chunks.closed() => return StreamOutcome::Disconnected { parts },
                next = fetcher.next_chunk() => next,
            };

            match next {
                Ok(Some(chunk)) => permit.send(chunk),
                Ok(None) => return StreamOutcome::Completed { parts },
                Err(error) => {
                    self.log_fetch_error(fetcher.offset(), &error);
                    if error.is_auth_failure() {
                        request.sessions.invalidate(dc).await;
                    }
                    return StreamOutcome::Failed { parts, error };
                }
            }
        }
    }

    fn log_fetch_error(&self, offset: u64, error: &TransportError) {
        match error {
            TransportError::Timeout => tracing::debug!(
                "Timed out fetching offset {} for stream {}; ending stream",
                offset,
                self.id
            ),
            TransportError::MalformedResponse { .. } => tracing::warn!(
                "Malformed chunk at offset {} for stream {}: {}",
                offset,
                self.id,
                error
            ),
            _ => tracing::error!(
                "Fetch at offset {} for stream {} failed: {}",
                offset,
                self.id,
                error
            ),
        }
    }
}

/// Consumer side of a supervised stream.
///
/// Yields chunks in ascending offset order. A cancelled stream ends with a
/// single `Err(StreamError::Cancelled)` item; every other ending is a plain
/// end of stream. Dropping the value counts as a client disconnect.
pub struct ChunkStream {
    requester: RequesterKey,
    content_length: u64,
    chunks: mpsc::Receiver<Bytes>,
    outcome_rx: Option<oneshot::Receiver<StreamOutcome>>,
    outcome: Option<StreamOutcome>,
    finished: bool,
}

impl ChunkStream {
    /// A stream with nothing to deliver, already completed.
    pub fn empty(requester: RequesterKey) -> Self {
        let (_, chunks) = mpsc::channel(1);
        Self {
            requester,
            content_length: 0,
            chunks,
            outcome_rx: None,
            outcome: Some(StreamOutcome::Completed { parts: 0 }),
            finished: false,
        }
    }

    /// Bytes the stream delivers when it runs to completion.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// How the task ended; available once the stream has been drained.
    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.outcome.as_ref()
    }

    /// Stops consuming and waits for the task's outcome.
    pub async fn close(mut self) -> Option<StreamOutcome> {
        if let Some(outcome) = self.outcome.take() {
            return Some(outcome);
        }
        self.chunks.close();
        while self.chunks.recv().await.is_some() {}
        match self.outcome_rx.take() {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }

    fn collect_outcome(&mut self) {
        if let Some(mut rx) = self.outcome_rx.take() {
            self.outcome = rx.try_recv().ok();
        }
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.chunks.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                this.finished = true;
                this.collect_outcome();
                match &this.outcome {
                    Some(outcome) if outcome.is_cancelled() => {
                        Poll::Ready(Some(Err(StreamError::Cancelled)))
                    }
                    _ => Poll::Ready(None),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream")
            .field("requester", &self.requester)
            .field("content_length", &self.content_length)
            .field("outcome", &self.outcome)
            .finish()
    }
}
