//! Simulated backend client and media sessions

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;

use super::library::MediaLibrary;
use crate::descriptor::{FileDescriptor, FileLocation};
use crate::transport::{
    AuthKey, DataCenterId, ExportedAuthorization, MediaClient, MetadataResolver, TransportError,
    TransportSession,
};

/// Fetch failure injected at one offset.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub offset: u64,
    pub error: TransportError,
}

/// Faults the simulated backend should exhibit.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFaults {
    /// Authorization imports rejected with `AuthBytesInvalid` before one succeeds.
    pub rejected_imports: u32,
    /// Authorization imports failing with a connection error before one succeeds.
    pub failed_import_connections: u32,
    /// Fetch at this offset fails every time.
    pub fetch_failure: Option<FetchFailure>,
    /// Delay applied to every fetch.
    pub fetch_latency: Duration,
}

/// Call counters shared by a client and its sessions.
#[derive(Debug, Default)]
pub struct ClientStats {
    fetches: AtomicUsize,
    key_exchanges: AtomicUsize,
    authorization_exports: AtomicUsize,
    authorization_imports: AtomicUsize,
    sessions_started: AtomicUsize,
    sessions_stopped: AtomicUsize,
}

impl ClientStats {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn key_exchanges(&self) -> usize {
        self.key_exchanges.load(Ordering::SeqCst)
    }

    pub fn authorization_exports(&self) -> usize {
        self.authorization_exports.load(Ordering::SeqCst)
    }

    pub fn authorization_imports(&self) -> usize {
        self.authorization_imports.load(Ordering::SeqCst)
    }

    pub fn sessions_started(&self) -> usize {
        self.sessions_started.load(Ordering::SeqCst)
    }

    pub fn sessions_stopped(&self) -> usize {
        self.sessions_stopped.load(Ordering::SeqCst)
    }
}

/// Fault configuration plus the countdowns consumed while it plays out.
#[derive(Debug)]
struct FaultState {
    faults: SimulatedFaults,
    remaining_rejections: AtomicU32,
    remaining_connection_failures: AtomicU32,
}

impl FaultState {
    fn new(faults: SimulatedFaults) -> Self {
        Self {
            remaining_rejections: AtomicU32::new(faults.rejected_imports),
            remaining_connection_failures: AtomicU32::new(faults.failed_import_connections),
            faults,
        }
    }

    /// Decrements `counter` if positive and reports whether a fault fires.
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Backend client serving files out of a [`MediaLibrary`].
pub struct InMemoryClient {
    library: Arc<MediaLibrary>,
    home: DataCenterId,
    faults: Arc<FaultState>,
    stats: Arc<ClientStats>,
}

impl InMemoryClient {
    /// Creates a fault-free client registered in `home`.
    pub fn new(library: Arc<MediaLibrary>, home: DataCenterId) -> Self {
        Self {
            library,
            home,
            faults: Arc::new(FaultState::new(SimulatedFaults::default())),
            stats: Arc::new(ClientStats::default()),
        }
    }

    /// Replaces the fault configuration.
    pub fn with_faults(mut self, faults: SimulatedFaults) -> Self {
        self.faults = Arc::new(FaultState::new(faults));
        self
    }

    /// Call counters for this client and its sessions.
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }
}

#[async_trait::async_trait]
impl MediaClient for InMemoryClient {
    async fn home_data_center(&self) -> Result<DataCenterId, TransportError> {
        Ok(self.home)
    }

    async fn stored_auth_key(&self) -> Result<AuthKey, TransportError> {
        Ok(AuthKey(Bytes::from(vec![self.home.0 as u8; 256])))
    }

    async fn exchange_auth_key(&self, dc: DataCenterId) -> Result<AuthKey, TransportError> {
        self.stats.key_exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(AuthKey(Bytes::from(vec![dc.0 as u8; 256])))
    }

    async fn start_session(
        &self,
        dc: DataCenterId,
        _auth_key: AuthKey,
    ) -> Result<Arc<dyn TransportSession>, TransportError> {
        self.stats.sessions_started.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemorySession {
            dc,
            library: Arc::clone(&self.library),
            faults: Arc::clone(&self.faults),
            stats: Arc::clone(&self.stats),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn export_authorization(
        &self,
        dc: DataCenterId,
    ) -> Result<ExportedAuthorization, TransportError> {
        let exports = self.stats.authorization_exports.fetch_add(1, Ordering::SeqCst);
        Ok(ExportedAuthorization {
            id: i64::from(dc.0) * 1_000 + exports as i64,
            bytes: Bytes::from_static(b"exported-authorization"),
        })
    }
}

/// Media session over the shared library.
pub struct InMemorySession {
    dc: DataCenterId,
    library: Arc<MediaLibrary>,
    faults: Arc<FaultState>,
    stats: Arc<ClientStats>,
    stopped: AtomicBool,
}

#[async_trait::async_trait]
impl TransportSession for InMemorySession {
    fn data_center(&self) -> DataCenterId {
        self.dc
    }

    async fn fetch(
        &self,
        location: &FileLocation,
        offset: u64,
        limit: u32,
    ) -> Result<Bytes, TransportError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed);
        }
        if !self.faults.faults.fetch_latency.is_zero() {
            tokio::time::sleep(self.faults.faults.fetch_latency).await;
        }
        self.stats.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = &self.faults.faults.fetch_failure {
            if failure.offset == offset {
                return Err(failure.error.clone());
            }
        }

        let content = self
            .library
            .content_at(location)
            .ok_or_else(|| TransportError::Rpc {
                code: 400,
                message: "FILE_ID_INVALID".to_string(),
            })?;

        let len = content.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(u64::from(limit)).min(len) as usize;
        Ok(content.slice(start..end))
    }

    async fn import_authorization(
        &self,
        _authorization: &ExportedAuthorization,
    ) -> Result<(), TransportError> {
        self.stats.authorization_imports.fetch_add(1, Ordering::SeqCst);

        if FaultState::take(&self.faults.remaining_rejections) {
            return Err(TransportError::AuthBytesInvalid);
        }
        if FaultState::take(&self.faults.remaining_connection_failures) {
            return Err(TransportError::Connection {
                reason: "connection reset by peer".to_string(),
            });
        }
        Ok(())
    }

    async fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stats.sessions_stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Metadata resolver answering from a [`MediaLibrary`].
pub struct LibraryResolver {
    library: Arc<MediaLibrary>,
    resolutions: AtomicUsize,
}

impl LibraryResolver {
    pub fn new(library: Arc<MediaLibrary>) -> Self {
        Self {
            library,
            resolutions: AtomicUsize::new(0),
        }
    }

    /// Number of lookups performed so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MetadataResolver for LibraryResolver {
    async fn resolve(
        &self,
        _client: &dyn MediaClient,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Option<FileDescriptor>, TransportError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        Ok(self.library.descriptor(chat_id, message_id))
    }
}
