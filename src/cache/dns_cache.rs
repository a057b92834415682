//! DNS answer cache trait and implementations.
//!
//! Only answers relayed from upstream are cached. Block decisions are always
//! taken before the cache is consulted, so a rule change is never hidden by a
//! cached answer.

use std::future::Future;
use std::time::Duration;

use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use moka::future::Cache;

/// Cache key: the lowercased question name and its record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: Name,
    record_type: RecordType,
}

impl CacheKey {
    pub fn new(name: &Name, record_type: RecordType) -> Self {
        Self {
            name: name.to_lowercase(),
            record_type,
        }
    }

    pub fn from_query(query: &Query) -> Self {
        Self::new(query.name(), query.query_type())
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }
}

/// Trait for DNS answer caching.
///
/// This trait abstracts the caching mechanism, allowing for different
/// implementations (production Moka cache, test mocks, etc.).
pub trait DnsCache: Send + Sync + Clone + 'static {
    /// Get a cached answer for the given question.
    fn get(&self, key: &CacheKey) -> impl Future<Output = Option<Message>> + Send;

    /// Insert an answer into the cache.
    fn insert(&self, key: CacheKey, message: Message) -> impl Future<Output = ()> + Send;

    /// Returns the number of entries in the cache.
    fn entry_count(&self) -> u64;
}

/// Production cache implementation using Moka, with a fixed TTL and a
/// bounded number of entries.
#[derive(Clone)]
pub struct MokaCache {
    inner: Cache<CacheKey, Message>,
}

impl MokaCache {
    /// Create a new cache with the specified TTL.
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder().time_to_live(ttl).build();

        Self { inner: cache }
    }

    /// Create a new cache with TTL and maximum capacity.
    pub fn with_capacity(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();

        Self { inner: cache }
    }
}

impl DnsCache for MokaCache {
    async fn get(&self, key: &CacheKey) -> Option<Message> {
        self.inner.get(key).await
    }

    async fn insert(&self, key: CacheKey, message: Message) {
        self.inner.insert(key, message).await;
    }

    fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}
