//! Resolved file descriptor cache
//!
//! Maps (chat, message) pairs to descriptors so repeated range requests for the
//! same file skip the metadata round-trip. Freshness is bounded by a periodic
//! wholesale clear rather than per-entry expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use super::FileDescriptor;
use crate::streaming::StreamError;
use crate::transport::{MediaClient, MetadataResolver};

/// Cache key: the message carrying the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MessageKey {
    chat_id: i64,
    message_id: i32,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatistics {
    pub entries: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub sweep_count: u64,
}

/// Per-client cache of resolved file descriptors.
pub struct FileDescriptorCache {
    client: Arc<dyn MediaClient>,
    resolver: Arc<dyn MetadataResolver>,
    entries: RwLock<HashMap<MessageKey, Arc<FileDescriptor>>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    sweep_count: AtomicU64,
}

impl FileDescriptorCache {
    /// Creates an empty cache resolving misses through `resolver` on `client`.
    pub fn new(client: Arc<dyn MediaClient>, resolver: Arc<dyn MetadataResolver>) -> Self {
        Self {
            client,
            resolver,
            entries: RwLock::new(HashMap::new()),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            sweep_count: AtomicU64::new(0),
        }
    }

    /// Returns the descriptor of the file attached to a message.
    ///
    /// Served from memory when cached; otherwise resolved and inserted. Two
    /// concurrent misses may both resolve, but only the first result is kept.
    ///
    /// # Errors
    ///
    /// - `StreamError::NotFound` - Resolver found no file for the message
    /// - `StreamError::MetadataLookup` - Resolver failed to perform the lookup
    pub async fn resolve(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Arc<FileDescriptor>, StreamError> {
        let key = MessageKey {
            chat_id,
            message_id,
        };

        let cached = self.entries.read().get(&key).cloned();
        if let Some(descriptor) = cached {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(descriptor);
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);

        let resolved = self
            .resolver
            .resolve(self.client.as_ref(), chat_id, message_id)
            .await
            .map_err(|source| StreamError::MetadataLookup { source })?;

        let Some(descriptor) = resolved else {
            tracing::info!("Message with ID {} not found in chat {}", message_id, chat_id);
            return Err(StreamError::NotFound {
                chat_id,
                message_id,
            });
        };

        let mut entries = self.entries.write();
        let cached = entries
            .entry(key)
            .or_insert_with(|| Arc::new(descriptor));
        Ok(Arc::clone(cached))
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.write();
            let removed = entries.len();
            entries.clear();
            removed
        };
        self.sweep_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cleaned {} cached file descriptors", removed);
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current cache statistics.
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            entries: self.len(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            sweep_count: self.sweep_count.load(Ordering::Relaxed),
        }
    }

    /// Spawns the background sweep that clears the cache every `period`.
    ///
    /// The task holds only a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => cache.clear(),
                    None => break,
                }
            }

            tracing::debug!("File descriptor sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use bytes::Bytes;

    use super::*;
    use crate::descriptor::FileKind;
    use crate::simulation::{InMemoryClient, MediaLibrary};
    use crate::transport::{DataCenterId, TransportError};

    /// Resolver that answers for message 7 only and counts its calls.
    struct CountingResolver {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingResolver {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl MetadataResolver for CountingResolver {
        async fn resolve(
            &self,
            _client: &dyn MediaClient,
            chat_id: i64,
            message_id: i32,
        ) -> Result<Option<FileDescriptor>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::Timeout);
            }
            if message_id != 7 {
                return Ok(None);
            }
            Ok(Some(FileDescriptor {
                dc_id: DataCenterId(4),
                media_id: chat_id.abs(),
                access_hash: 1,
                file_reference: Bytes::new(),
                kind: FileKind::Document,
                thumbnail_size: None,
                file_size: 10,
                unique_id: format!("u{message_id}"),
                file_name: None,
                mime_type: None,
            }))
        }
    }

    fn cache_with(resolver: Arc<CountingResolver>) -> Arc<FileDescriptorCache> {
        let client = Arc::new(InMemoryClient::new(
            Arc::new(MediaLibrary::new()),
            DataCenterId(2),
        ));
        Arc::new(FileDescriptorCache::new(client, resolver))
    }

    #[tokio::test]
    async fn test_repeated_resolution_hits_cache() {
        let resolver = Arc::new(CountingResolver::new());
        let cache = cache_with(Arc::clone(&resolver));

        let first = cache.resolve(-100, 7).await.unwrap();
        let second = cache.resolve(-100, 7).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.calls(), 1);

        let stats = cache.statistics();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }

    #[tokio::test]
    async fn test_same_message_in_other_chat_is_distinct() {
        let resolver = Arc::new(CountingResolver::new());
        let cache = cache_with(Arc::clone(&resolver));

        let a = cache.resolve(-100, 7).await.unwrap();
        let b = cache.resolve(-200, 7).await.unwrap();

        assert_ne!(a.media_id, b.media_id);
        assert_eq!(resolver.calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_message_is_not_found() {
        let resolver = Arc::new(CountingResolver::new());
        let cache = cache_with(Arc::clone(&resolver));

        let result = cache.resolve(-100, 8).await;
        assert!(matches!(
            result,
            Err(StreamError::NotFound {
                chat_id: -100,
                message_id: 8
            })
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_reported() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cache = cache_with(resolver);

        let result = cache.resolve(-100, 7).await;
        assert!(matches!(
            result,
            Err(StreamError::MetadataLookup {
                source: TransportError::Timeout
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_clears_everything_each_period() {
        let resolver = Arc::new(CountingResolver::new());
        let cache = cache_with(Arc::clone(&resolver));
        let sweeper = cache.spawn_sweeper(Duration::from_secs(30 * 60));

        cache.resolve(-100, 7).await.unwrap();
        cache.resolve(-200, 7).await.unwrap();

        tokio::time::sleep(Duration::from_secs(29 * 60)).await;
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.statistics().sweep_count, 1);

        // Cleared entries are resolved again on next use.
        cache.resolve(-100, 7).await.unwrap();
        assert_eq!(resolver.calls(), 3);

        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_cache_dropped() {
        let resolver = Arc::new(CountingResolver::new());
        let cache = cache_with(resolver);
        let sweeper = cache.spawn_sweeper(Duration::from_secs(60));

        drop(cache);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(sweeper.await.is_ok());
    }
}
