//! Per-data-center media session pool.
//!
//! Each backend client owns one pool. The pool hands out a shared reference to
//! the session for a data center, creating and authorizing it on first use:
//! the home data center reuses the client's stored key, foreign data centers
//! get a fresh key exchange followed by an authorization import that is
//! retried under a bounded policy.

pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

pub use retry::{RetryDecision, RetryFailure, RetryPolicy, retry_bounded};

use crate::transport::{DataCenterId, MediaClient, TransportError, TransportSession};

/// Errors that can occur while establishing a media session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Authorization import kept failing with transient errors.
    #[error("failed to establish media session for {dc} after {attempts} attempts: {last}")]
    Exhausted {
        dc: DataCenterId,
        attempts: u32,
        #[source]
        last: TransportError,
    },

    /// A setup step failed with an error that is not worth retrying.
    #[error("media session setup for {dc} failed: {source}")]
    Setup {
        dc: DataCenterId,
        #[source]
        source: TransportError,
    },

    /// The setup task ended without producing a result.
    #[error("media session setup for {dc} was interrupted: {reason}")]
    Interrupted { dc: DataCenterId, reason: String },
}

/// Maps import failures to retry decisions.
fn classify_import_error(error: &TransportError) -> RetryDecision {
    match error {
        TransportError::AuthBytesInvalid => RetryDecision::Retry,
        TransportError::Connection { .. } | TransportError::Timeout => {
            RetryDecision::RetryAfterBackoff
        }
        _ => RetryDecision::Abort,
    }
}

/// Established media sessions of one client, keyed by data center.
pub struct SessionPool {
    client: Arc<dyn MediaClient>,
    retry_policy: RetryPolicy,
    sessions: Mutex<HashMap<DataCenterId, Arc<dyn TransportSession>>>,
}

impl SessionPool {
    /// Creates an empty pool for `client`.
    pub fn new(client: Arc<dyn MediaClient>, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            retry_policy,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached session for `dc`, creating it on first use.
    ///
    /// Creation holds the pool lock, so concurrent callers for a data center
    /// share one session rather than racing to build two. Setup runs in its
    /// own task: once started it finishes, caching the session or tearing it
    /// down, even when the caller stops waiting.
    ///
    /// # Errors
    ///
    /// - `SessionError::Exhausted` - Authorization import retries used up
    /// - `SessionError::Setup` - Key exchange or session start failed
    /// - `SessionError::Interrupted` - Setup task panicked or the runtime shut down
    pub async fn get_or_create(
        self: &Arc<Self>,
        dc: DataCenterId,
    ) -> Result<Arc<dyn TransportSession>, SessionError> {
        if let Some(session) = self.sessions.lock().await.get(&dc) {
            tracing::debug!("Using cached media session for {}", dc);
            return Ok(Arc::clone(session));
        }

        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.create(dc).await })
            .await
            .map_err(|error| SessionError::Interrupted {
                dc,
                reason: error.to_string(),
            })?
    }

    async fn create(&self, dc: DataCenterId) -> Result<Arc<dyn TransportSession>, SessionError> {
        let mut sessions = self.sessions.lock().await;

        // Another caller may have finished setup while this one waited.
        if let Some(session) = sessions.get(&dc) {
            return Ok(Arc::clone(session));
        }

        let home = self
            .client
            .home_data_center()
            .await
            .map_err(|source| SessionError::Setup { dc, source })?;

        let session = if dc == home {
            self.open_home_session(dc).await?
        } else {
            self.open_foreign_session(dc).await?
        };

        sessions.insert(dc, Arc::clone(&session));
        tracing::debug!("Created media session for {}", dc);
        Ok(session)
    }

    async fn open_home_session(
        &self,
        dc: DataCenterId,
    ) -> Result<Arc<dyn TransportSession>, SessionError> {
        let auth_key = self
            .client
            .stored_auth_key()
            .await
            .map_err(|source| SessionError::Setup { dc, source })?;

        self.client
            .start_session(dc, auth_key)
            .await
            .map_err(|source| SessionError::Setup { dc, source })
    }

    async fn open_foreign_session(
        &self,
        dc: DataCenterId,
    ) -> Result<Arc<dyn TransportSession>, SessionError> {
        let auth_key = self
            .client
            .exchange_auth_key(dc)
            .await
            .map_err(|source| SessionError::Setup { dc, source })?;

        let session = self
            .client
            .start_session(dc, auth_key)
            .await
            .map_err(|source| SessionError::Setup { dc, source })?;

        let imported = retry_bounded(
            &self.retry_policy,
            |attempt| {
                let session = Arc::clone(&session);
                async move {
                    let exported = self.client.export_authorization(dc).await?;
                    let result = session.import_authorization(&exported).await;
                    if let Err(error) = &result {
                        tracing::debug!(
                            "Authorization import for {} failed on attempt {}: {}",
                            dc,
                            attempt,
                            error
                        );
                    }
                    result
                }
            },
            classify_import_error,
        )
        .await;

        match imported {
            Ok(()) => Ok(session),
            Err(failure) => {
                session.stop().await;
                tracing::debug!("Failed to establish media session for {}", dc);
                Err(match failure {
                    RetryFailure::Exhausted { attempts, last } => SessionError::Exhausted {
                        dc,
                        attempts,
                        last,
                    },
                    RetryFailure::Aborted { error, .. } => SessionError::Setup { dc, source: error },
                })
            }
        }
    }

    /// Stops and forgets the session for `dc`, if any.
    ///
    /// The next `get_or_create` for that data center builds a new session.
    pub async fn invalidate(&self, dc: DataCenterId) {
        let removed = self.sessions.lock().await.remove(&dc);
        if let Some(session) = removed {
            tracing::warn!("Tearing down media session for {}", dc);
            session.stop().await;
        }
    }

    /// Data centers with an established session, in ascending order.
    pub async fn cached_data_centers(&self) -> Vec<DataCenterId> {
        let mut dcs: Vec<_> = self.sessions.lock().await.keys().copied().collect();
        dcs.sort();
        dcs
    }

    /// Stops every session in the pool.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (dc, session) in sessions {
            tracing::debug!("Stopping media session for {}", dc);
            session.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::simulation::{InMemoryClient, MediaLibrary, SimulatedFaults};

    const HOME: DataCenterId = DataCenterId(2);
    const FOREIGN: DataCenterId = DataCenterId(4);

    fn pool_with(faults: SimulatedFaults) -> (Arc<InMemoryClient>, Arc<SessionPool>) {
        let client = Arc::new(
            InMemoryClient::new(Arc::new(MediaLibrary::new()), HOME).with_faults(faults),
        );
        let pool = Arc::new(SessionPool::new(client.clone(), RetryPolicy::default()));
        (client, pool)
    }

    #[tokio::test]
    async fn test_home_session_uses_stored_key() {
        let (client, pool) = pool_with(SimulatedFaults::default());

        let session = pool.get_or_create(HOME).await.unwrap();

        assert_eq!(session.data_center(), HOME);
        let stats = client.stats();
        assert_eq!(stats.key_exchanges(), 0);
        assert_eq!(stats.authorization_imports(), 0);
        assert_eq!(stats.sessions_started(), 1);
    }

    #[tokio::test]
    async fn test_foreign_session_exchanges_and_imports() {
        let (client, pool) = pool_with(SimulatedFaults::default());

        let session = pool.get_or_create(FOREIGN).await.unwrap();

        assert_eq!(session.data_center(), FOREIGN);
        let stats = client.stats();
        assert_eq!(stats.key_exchanges(), 1);
        assert_eq!(stats.authorization_imports(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_reused_per_data_center() {
        let (client, pool) = pool_with(SimulatedFaults::default());

        let first = pool.get_or_create(FOREIGN).await.unwrap();
        let second = pool.get_or_create(FOREIGN).await.unwrap();
        pool.get_or_create(HOME).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.stats().sessions_started(), 2);
        assert_eq!(pool.cached_data_centers().await, vec![HOME, FOREIGN]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_session() {
        let (client, pool) = pool_with(SimulatedFaults::default());

        let (a, b) = tokio::join!(pool.get_or_create(FOREIGN), pool.get_or_create(FOREIGN));

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(client.stats().sessions_started(), 1);
    }

    #[tokio::test]
    async fn test_rejected_auth_bytes_are_retried() {
        let (client, pool) = pool_with(SimulatedFaults {
            rejected_imports: 2,
            ..Default::default()
        });

        pool.get_or_create(FOREIGN).await.unwrap();

        let stats = client.stats();
        assert_eq!(stats.authorization_imports(), 3);
        assert_eq!(stats.authorization_exports(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_errors_back_off_between_attempts() {
        let (client, pool) = pool_with(SimulatedFaults {
            failed_import_connections: 2,
            ..Default::default()
        });

        let started = tokio::time::Instant::now();
        pool.get_or_create(FOREIGN).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(client.stats().authorization_imports(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_tear_down_session() {
        let (client, pool) = pool_with(SimulatedFaults {
            rejected_imports: 6,
            ..Default::default()
        });

        let result = pool.get_or_create(FOREIGN).await;

        match result {
            Err(SessionError::Exhausted { dc, attempts, last }) => {
                assert_eq!(dc, FOREIGN);
                assert_eq!(attempts, 6);
                assert_eq!(last, TransportError::AuthBytesInvalid);
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("session should not be established"),
        }
        assert_eq!(client.stats().sessions_stopped(), 1);
        assert!(pool.cached_data_centers().await.is_empty());

        // Failure is scoped to the call: the next attempt starts over.
        pool.get_or_create(FOREIGN).await.unwrap();
        assert_eq!(client.stats().key_exchanges(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_rebuilds_session() {
        let (client, pool) = pool_with(SimulatedFaults::default());

        let first = pool.get_or_create(HOME).await.unwrap();
        pool.invalidate(HOME).await;
        let second = pool.get_or_create(HOME).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(client.stats().sessions_stopped(), 1);
        assert_eq!(client.stats().sessions_started(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_sessions() {
        let (client, pool) = pool_with(SimulatedFaults::default());

        pool.get_or_create(HOME).await.unwrap();
        pool.get_or_create(FOREIGN).await.unwrap();
        pool.shutdown().await;

        assert_eq!(client.stats().sessions_stopped(), 2);
        assert!(pool.cached_data_centers().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_setup_still_caches_session() {
        let (client, pool) = pool_with(SimulatedFaults {
            failed_import_connections: 3,
            ..Default::default()
        });

        // Give up during the first backoff pause.
        let waited = tokio::time::timeout(Duration::from_millis(500), pool.get_or_create(FOREIGN)).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(pool.cached_data_centers().await, vec![FOREIGN]);

        pool.get_or_create(FOREIGN).await.unwrap();
        let stats = client.stats();
        assert_eq!(stats.sessions_started(), 1);
        assert_eq!(stats.sessions_stopped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_failing_setup_still_stops_session() {
        let (client, pool) = pool_with(SimulatedFaults {
            failed_import_connections: 10,
            ..Default::default()
        });

        let waited = tokio::time::timeout(Duration::from_millis(500), pool.get_or_create(FOREIGN)).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let stats = client.stats();
        assert_eq!(stats.sessions_started(), 1);
        assert_eq!(stats.sessions_stopped(), 1);
        assert!(pool.cached_data_centers().await.is_empty());
    }
}
