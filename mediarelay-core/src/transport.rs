//! Backend transport abstractions.
//!
//! The relay never speaks the messaging backend's wire protocol itself. It
//! talks to an authenticated client handle (`MediaClient`) that can open
//! per-data-center media sessions (`TransportSession`), and those sessions
//! serve raw file bytes in fixed-size pulls. Production deployments plug a
//! real protocol client in behind these traits; tests and development mode
//! use the in-memory backend from `crate::simulation`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::descriptor::{FileDescriptor, FileLocation};

/// Identifier of the backend cluster that stores a file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataCenterId(pub i32);

impl fmt::Display for DataCenterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DC{}", self.0)
    }
}

/// Authorization key material for one data center.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(pub Bytes);

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key bytes stay out of logs.
        write!(f, "AuthKey({} bytes)", self.0.len())
    }
}

/// Authorization exported from the home data center for import elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedAuthorization {
    pub id: i64,
    pub bytes: Bytes,
}

/// Errors reported by backend calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The target data center rejected imported authorization bytes.
    ///
    /// Transient: a freshly exported authorization usually succeeds.
    #[error("authorization bytes rejected by data center")]
    AuthBytesInvalid,

    /// Network-level failure talking to the backend.
    #[error("connection error: {reason}")]
    Connection { reason: String },

    /// The backend did not answer in time.
    #[error("request timed out")]
    Timeout,

    /// The backend answered with something that is not a file payload.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// The backend answered with an RPC error.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The session was stopped while a call was pending.
    #[error("session closed")]
    SessionClosed,
}

impl TransportError {
    /// Returns true when the failure means the session's authorization is gone.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TransportError::Rpc { code: 401, .. })
    }
}

/// An authenticated media channel to a single data center.
///
/// A session is a single logical fetch pipe: callers must not issue two
/// overlapping fetches against the same session.
#[async_trait::async_trait]
pub trait TransportSession: Send + Sync {
    /// Data center this session is connected to.
    fn data_center(&self) -> DataCenterId;

    /// Pulls up to `limit` bytes of the file at `location` starting at `offset`.
    ///
    /// An empty payload means the file has no bytes at that offset.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` - Backend did not answer in time
    /// - `TransportError::MalformedResponse` - Answer was not a file payload
    /// - `TransportError::Rpc` - Backend rejected the request
    async fn fetch(
        &self,
        location: &FileLocation,
        offset: u64,
        limit: u32,
    ) -> Result<Bytes, TransportError>;

    /// Imports an authorization exported from the home data center.
    ///
    /// # Errors
    ///
    /// - `TransportError::AuthBytesInvalid` - Bytes were rejected
    /// - `TransportError::Connection` - Network failure during import
    async fn import_authorization(
        &self,
        authorization: &ExportedAuthorization,
    ) -> Result<(), TransportError>;

    /// Closes the session. Pending and future calls fail with `SessionClosed`.
    async fn stop(&self);
}

/// An authenticated backend account handle.
#[async_trait::async_trait]
pub trait MediaClient: Send + Sync {
    /// Data center the account is registered in.
    async fn home_data_center(&self) -> Result<DataCenterId, TransportError>;

    /// Authorization key the account already holds for its home data center.
    async fn stored_auth_key(&self) -> Result<AuthKey, TransportError>;

    /// Performs a fresh key exchange with a foreign data center.
    async fn exchange_auth_key(&self, dc: DataCenterId) -> Result<AuthKey, TransportError>;

    /// Opens and starts a media session using the given key.
    async fn start_session(
        &self,
        dc: DataCenterId,
        auth_key: AuthKey,
    ) -> Result<Arc<dyn TransportSession>, TransportError>;

    /// Exports the account's authorization for use in another data center.
    async fn export_authorization(
        &self,
        dc: DataCenterId,
    ) -> Result<ExportedAuthorization, TransportError>;
}

/// Resolves a (chat, message) pair into the descriptor of its attached file.
#[async_trait::async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Returns `Ok(None)` when the message does not exist or carries no file.
    ///
    /// # Errors
    ///
    /// - `TransportError` - Lookup could not be performed
    async fn resolve(
        &self,
        client: &dyn MediaClient,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Option<FileDescriptor>, TransportError>;
}
