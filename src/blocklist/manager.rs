//! Periodically refreshed blocklist cache.
//!
//! The cache owns the current [`Snapshot`] behind an [`ArcSwap`]: query and
//! connection handlers load it without locking while a refresh builds the
//! next one on the side and swaps it in when complete.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;

use super::snapshot::{Snapshot, TenantData};
use crate::metrics;
use crate::store::{RuleStore, StoreError};

/// Error type for blocklist refreshes.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The rule store failed; the previous snapshot is kept.
    #[error("failed to read rule store: {0}")]
    Store(#[from] StoreError),

    /// The snapshot build task panicked or was cancelled.
    #[error("snapshot build task failed: {0}")]
    Build(#[from] tokio::task::JoinError),
}

/// Cheap, cloneable read handle on the current snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    current: Arc<ArcSwap<Snapshot>>,
}

impl SnapshotReader {
    /// A reader over a fixed snapshot, for embedding and tests.
    pub fn fixed(snapshot: Snapshot) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(snapshot)),
        }
    }

    /// The latest complete snapshot.
    #[inline]
    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }
}

/// Materialized view of a [`RuleStore`], rebuilt wholesale on refresh.
///
/// # Example
///
/// ```no_run
/// use domainwall::blocklist::BlocklistCache;
/// use domainwall::store::MemoryStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = BlocklistCache::new(MemoryStore::new());
/// cache.refresh().await?;
///
/// // Hand a reader to the DNS responder and the proxy.
/// let reader = cache.reader();
/// assert_eq!(reader.load().generation(), 1);
/// # Ok(())
/// # }
/// ```
pub struct BlocklistCache<S> {
    store: S,
    current: Arc<ArcSwap<Snapshot>>,
    /// Serializes refreshes so generations stay ordered.
    refresh_lock: Mutex<()>,
}

impl<S: RuleStore> BlocklistCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            current: Arc::new(ArcSwap::from_pointee(Snapshot::empty())),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The latest complete snapshot.
    #[inline]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// A read handle sharing this cache's snapshot pointer.
    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            current: Arc::clone(&self.current),
        }
    }

    /// Rebuild the snapshot from the store.
    ///
    /// Fetches all tenants, then the active rules and whitelist of every
    /// active tenant. Any store error aborts the refresh and leaves the
    /// previous snapshot in place.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Store`] if any store call fails.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, RefreshError> {
        let _guard = self.refresh_lock.lock().await;

        match self.fetch_and_build().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.current.store(Arc::clone(&snapshot));
                tracing::info!(
                    generation = snapshot.generation(),
                    tenants = snapshot.tenants().len(),
                    rules = snapshot.rule_count(),
                    skipped_rules = snapshot.skipped_rules(),
                    conflicts = snapshot.conflicts().len(),
                    "rebuilt blocklist snapshot"
                );
                metrics::record_refresh(true, snapshot.generation());
                Ok(snapshot)
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    generation = self.current.load().generation(),
                    "blocklist refresh failed, keeping previous snapshot"
                );
                metrics::record_refresh(false, self.current.load().generation());
                Err(err)
            }
        }
    }

    async fn fetch_and_build(&self) -> Result<Snapshot, RefreshError> {
        let tenants = self.store.list_tenants().await?;

        let mut data = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            if !tenant.active {
                continue;
            }
            let rules = self.store.list_active_domain_rules(&tenant.id).await?;
            let whitelist = self.store.list_whitelisted_ips(&tenant.id).await?;
            tracing::debug!(
                tenant = %tenant.id,
                rules = rules.len(),
                whitelist = whitelist.len(),
                "fetched tenant policy"
            );
            data.push(TenantData {
                tenant,
                rules,
                whitelist,
            });
        }

        let generation = self.current.load().generation() + 1;
        // Regex compilation can be slow for large rule sets.
        let snapshot =
            tokio::task::spawn_blocking(move || Snapshot::build(generation, data)).await?;
        Ok(snapshot)
    }

    /// Refresh on a fixed interval and whenever `trigger` receives a message.
    ///
    /// The first tick fires after one full interval; callers are expected to
    /// have run an initial [`refresh`](Self::refresh). Returns when the
    /// trigger channel is closed.
    pub async fn run(self: Arc<Self>, interval: Duration, mut trigger: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::debug!("scheduled blocklist refresh");
                }
                message = trigger.recv() => {
                    if message.is_none() {
                        tracing::debug!("refresh trigger closed, stopping refresh loop");
                        return;
                    }
                    tracing::info!("manual blocklist refresh triggered");
                    ticker.reset();
                }
            }

            // Errors are logged by refresh and the previous snapshot stays.
            let _ = self.refresh().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DomainRule, MemoryStore};
    use std::net::IpAddr;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_tenant(
            "acme",
            [
                DomainRule::exact("1", "facebook.com"),
                DomainRule::regex("2", r"^ads?\."),
            ],
            ["192.168.1.1"],
        );
        store
    }

    #[tokio::test]
    async fn should_serve_empty_snapshot_before_first_refresh() {
        let cache = BlocklistCache::new(seeded_store());
        let snapshot = cache.snapshot();
        assert!(!snapshot.is_loaded());
        assert_eq!(snapshot.generation(), 0);
    }

    #[tokio::test]
    async fn should_build_snapshot_on_refresh() {
        let cache = BlocklistCache::new(seeded_store());
        let snapshot = cache.refresh().await.unwrap();

        assert_eq!(snapshot.generation(), 1);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        let tenant = snapshot.tenant_for_ip(&ip).unwrap();
        assert_eq!(tenant.id(), "acme");
        assert_eq!(tenant.rules().find("www.facebook.com"), Some("1"));
        assert_eq!(tenant.rules().find("ads.example.com"), Some("2"));
    }

    #[tokio::test]
    async fn should_produce_equivalent_snapshots_when_store_unchanged() {
        let cache = BlocklistCache::new(seeded_store());
        let first = cache.refresh().await.unwrap();
        let second = cache.refresh().await.unwrap();

        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(first.rule_count(), second.rule_count());
        for host in ["facebook.com", "www.facebook.com", "ad.x.io", "example.com"] {
            assert_eq!(
                first.tenant("acme").unwrap().rules().find(host),
                second.tenant("acme").unwrap().rules().find(host),
            );
        }
    }

    #[tokio::test]
    async fn should_keep_previous_snapshot_when_store_fails() {
        let store = seeded_store();
        let cache = BlocklistCache::new(store.clone());
        cache.refresh().await.unwrap();

        store.set_available(false);
        let result = cache.refresh().await;
        assert!(matches!(result, Err(RefreshError::Store(_))));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.generation(), 1);
        assert_eq!(
            snapshot.tenant("acme").unwrap().rules().find("facebook.com"),
            Some("1")
        );
    }

    #[tokio::test]
    async fn should_expose_updates_through_reader() {
        let store = seeded_store();
        let cache = BlocklistCache::new(store.clone());
        let reader = cache.reader();
        cache.refresh().await.unwrap();

        assert!(store.remove_rule("acme", "1"));
        cache.refresh().await.unwrap();

        let snapshot = reader.load();
        assert_eq!(snapshot.generation(), 2);
        assert_eq!(snapshot.tenant("acme").unwrap().rules().find("facebook.com"), None);
    }

    #[tokio::test]
    async fn should_refresh_when_triggered() {
        let store = seeded_store();
        let cache = Arc::new(BlocklistCache::new(store.clone()));
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn(Arc::clone(&cache).run(Duration::from_secs(3600), rx));

        tx.send(()).await.unwrap();
        for _ in 0..100 {
            if cache.snapshot().generation() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.snapshot().generation(), 1);

        drop(tx);
        handle.await.unwrap();
        assert_eq!(store.list_tenants_calls(), 1);
    }

    #[tokio::test]
    async fn should_refresh_on_interval() {
        let store = seeded_store();
        let cache = Arc::new(BlocklistCache::new(store.clone()));
        let (_tx, rx) = mpsc::channel(1);

        tokio::spawn(Arc::clone(&cache).run(Duration::from_millis(20), rx));

        for _ in 0..100 {
            if cache.snapshot().generation() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cache.snapshot().generation() >= 2);
        assert!(store.list_tenants_calls() >= 2);
    }
}
