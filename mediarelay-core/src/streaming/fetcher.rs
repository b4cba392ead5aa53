//! Sequential chunk fetching over a media session.
//!
//! Drives one fetch per call against a transport session, starting at the
//! plan's aligned offset and advancing by one chunk each time, and trims the
//! first and last payloads to the exact requested byte boundaries.

use std::sync::Arc;

use bytes::Bytes;

use super::range::RangePlan;
use crate::descriptor::FileLocation;
use crate::transport::{TransportError, TransportSession};

/// Lazy, finite, non-restartable source of the chunks covering a [`RangePlan`].
///
/// Exactly one fetch is issued per `next_chunk` call and nothing is fetched
/// ahead. Once it has returned `None` or an error it stays exhausted.
pub struct ChunkFetcher {
    session: Arc<dyn TransportSession>,
    location: FileLocation,
    plan: RangePlan,
    offset: u64,
    current_part: u64,
    exhausted: bool,
}

impl ChunkFetcher {
    /// Creates a fetcher positioned at the plan's first part.
    pub fn new(session: Arc<dyn TransportSession>, location: FileLocation, plan: RangePlan) -> Self {
        Self {
            session,
            location,
            offset: plan.offset,
            plan,
            current_part: 1,
            exhausted: false,
        }
    }

    /// Fetches and trims the next part.
    ///
    /// Returns `Ok(None)` once every part has been produced or the backend
    /// returns an empty payload.
    ///
    /// # Errors
    ///
    /// - `TransportError` - The fetch failed; the fetcher is exhausted afterwards
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.exhausted || self.current_part > self.plan.part_count {
            self.exhausted = true;
            return Ok(None);
        }

        let payload = match self
            .session
            .fetch(&self.location, self.offset, self.plan.chunk_size)
            .await
        {
            Ok(payload) => payload,
            Err(error) => {
                self.exhausted = true;
                return Err(error);
            }
        };

        if payload.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let chunk = self.plan.trim(self.current_part, payload);
        self.current_part += 1;
        self.offset += u64::from(self.plan.chunk_size);
        Ok(Some(chunk))
    }

    /// Number of parts produced so far.
    pub fn parts_emitted(&self) -> u64 {
        self.current_part - 1
    }

    /// Offset of the next fetch.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
