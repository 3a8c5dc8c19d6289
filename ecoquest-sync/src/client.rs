//! The query client: process-wide handle to the cache and the executors
//!
//! All cache writes go through [`QueryCache::set`] (or a snapshot restore).
//! The client adds the asynchronous half on top: one in-flight fetch per key,
//! retries, invalidation with refetch, cancellation and the idle sweep.

use crate::cache::{
    lock::mutex_lock, CacheEntry, CacheStats, EntryPatch, InvalidationEvent, InvalidationReason,
    QueryCache, QueryData, QueryKey, QueryStatus, SyncConfig,
};
use crate::error::{QueryError, Result};
use crate::mutation::{Mutation, MutationObserver};
use crate::observer::QueryObserver;
use crate::query::{ErasedFetch, Query};
use crate::retry::RetryPolicy;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::type_name;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

const SOURCE: &str = "client";

type SharedFetch = Shared<BoxFuture<'static, Result<QueryData>>>;

/// Cheap-to-clone handle shared by every consumer in the process
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: SyncConfig,
    cache: Arc<QueryCache>,
    inflight: Mutex<HashMap<QueryKey, InFlight>>,
    refetchers: Mutex<HashMap<QueryKey, Refetcher>>,
    fetch_seq: AtomicU64,
}

struct InFlight {
    id: u64,
    shared: SharedFetch,
    abort: AbortHandle,
    previous: Arc<CacheEntry>,
    // Invalidated after the fetch started: its response may predate the write
    superseded: bool,
}

/// How to refetch a key that has mounted observers
#[derive(Clone)]
pub(crate) struct Refetcher {
    pub(crate) fetch: ErasedFetch,
    pub(crate) retry: RetryPolicy,
}

impl QueryClient {
    /// Create a client with an empty cache
    pub fn new(config: SyncConfig) -> Self {
        let cache = Arc::new(QueryCache::new(&config));
        Self {
            inner: Arc::new(ClientInner {
                config,
                cache,
                inflight: Mutex::new(HashMap::new()),
                refetchers: Mutex::new(HashMap::new()),
                fetch_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Validate `config` and create the client
    pub fn init(config: SyncConfig) -> Result<Self> {
        config.validate().map_err(QueryError::ConfigError)?;
        info!(
            "Query client initialised (stale_time: {:?}, gc_time: {:?}, max_retries: {})",
            config.stale_time, config.gc_time, config.max_retries
        );
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The underlying store
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.inner.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub(crate) fn resolve_retry<T: Send + Sync + 'static>(&self, query: &Query<T>) -> RetryPolicy {
        query
            .options()
            .retry
            .clone()
            .unwrap_or_else(|| self.inner.config.retry_policy())
    }

    /// Create the entry for `query` if needed and apply its timing options
    pub(crate) fn ensure_entry<T: Send + Sync + 'static>(&self, query: &Query<T>) -> Arc<CacheEntry> {
        let options = query.options();
        self.inner.cache.ensure(
            query.key(),
            options.stale_time.unwrap_or(self.inner.config.stale_time),
            options.gc_time.unwrap_or(self.inner.config.gc_time),
        )
    }

    /// Return cached data when fresh, otherwise wait for the key's single
    /// in-flight fetch (starting it if nobody has).
    pub async fn fetch_query<T: Send + Sync + 'static>(&self, query: &Query<T>) -> Result<Arc<T>> {
        if !query.is_enabled() {
            return Err(QueryError::Disabled(query.key().to_string()));
        }

        let entry = self.ensure_entry(query);
        if !entry.is_stale() {
            if let Some(data) = entry.data::<T>()? {
                self.inner.cache.record(|stats| stats.hits += 1);
                debug!("Cache hit: {}", query.key());
                return Ok(data);
            }
        }

        self.inner.cache.record(|stats| stats.misses += 1);
        debug!("Cache miss: {}", query.key());

        let shared = self.start_or_join(query.key(), query.erased(), self.resolve_retry(query));
        let data = shared.await?;
        downcast(query.key(), data)
    }

    /// Warm the cache for `query`. Errors are logged, not returned.
    pub async fn prefetch_query<T: Send + Sync + 'static>(&self, query: &Query<T>) {
        if let Err(e) = self.fetch_query(query).await {
            debug!("Prefetch of {} failed: {}", query.key(), e);
        }
    }

    /// Typed read of the cached payload for `key`
    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Result<Option<Arc<T>>> {
        match self.inner.cache.get(key) {
            Some(entry) => entry.data::<T>(),
            None => Ok(None),
        }
    }

    /// Replace the cached payload for `key` with the updater's result.
    ///
    /// Returning `None` from the updater leaves the entry untouched.
    pub fn set_query_data<T, F>(&self, key: &QueryKey, updater: F) -> Result<Option<Arc<T>>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let current = self.get_query_data::<T>(key)?;
        match updater(current.as_deref()) {
            None => Ok(current),
            Some(next) => {
                let next = Arc::new(next);
                self.inner.cache.set(key, EntryPatch::success(next.clone()));
                Ok(Some(next))
            }
        }
    }

    /// Mark every entry under `prefix` stale and refetch the ones in use
    pub fn invalidate_queries(&self, prefix: impl Into<QueryKey>) -> InvalidationEvent {
        self.invalidate_with_reason(&prefix.into(), InvalidationReason::Manual)
    }

    pub(crate) fn invalidate_with_reason(
        &self,
        prefix: &QueryKey,
        reason: InvalidationReason,
    ) -> InvalidationEvent {
        let keys = {
            let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, "invalidate");
            for (key, record) in inflight.iter_mut() {
                if key.starts_with(prefix) {
                    record.superseded = true;
                }
            }
            self.inner.cache.invalidate(prefix)
        };
        let mut refetched = Vec::new();

        if self.inner.config.refetch_on_invalidate {
            for key in &keys {
                if self.inner.cache.subscriber_count(key) == 0 {
                    continue;
                }
                let refetcher = mutex_lock(&self.inner.refetchers, SOURCE, "invalidate")
                    .get(key)
                    .cloned();
                if let Some(refetcher) = refetcher {
                    let _ = self.start_or_join(key, refetcher.fetch, refetcher.retry);
                    refetched.push(key.clone());
                }
            }
        }

        info!(
            "Invalidated {} queries under {} ({}), refetching {}",
            keys.len(),
            prefix,
            reason,
            refetched.len()
        );
        InvalidationEvent::new(reason, keys).with_refetched(refetched)
    }

    /// Abort in-flight fetches under `prefix`.
    ///
    /// Affected entries get back the status they had before the fetch
    /// started; waiters receive [`QueryError::Cancelled`].
    pub fn cancel_queries(&self, prefix: impl Into<QueryKey>) -> Vec<QueryKey> {
        let prefix = prefix.into();
        let cancelled: Vec<(QueryKey, InFlight)> = {
            let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, "cancel");
            let keys: Vec<QueryKey> = inflight
                .keys()
                .filter(|key| key.starts_with(&prefix))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| inflight.remove(&key).map(|record| (key, record)))
                .collect()
        };

        let mut keys = Vec::with_capacity(cancelled.len());
        for (key, record) in cancelled {
            record.abort.abort();
            if let Some(current) = self.inner.cache.get(&key) {
                if current.status == QueryStatus::Fetching {
                    self.inner.cache.set(
                        &key,
                        EntryPatch::new()
                            .status(record.previous.status)
                            .error(record.previous.error.clone()),
                    );
                }
            }
            debug!("Cancelled fetch for {}", key);
            keys.push(key);
        }
        keys
    }

    /// Cancel and drop every entry under `prefix`
    pub fn remove_queries(&self, prefix: impl Into<QueryKey>) -> usize {
        let prefix = prefix.into();
        self.cancel_queries(prefix.clone());
        let removed = self.inner.cache.remove_matching(&prefix);
        debug!("Removed {} queries under {} ({})", removed, prefix, InvalidationReason::Removed);
        removed
    }

    /// Whether a fetch for `key` is currently in flight
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        mutex_lock(&self.inner.inflight, SOURCE, "is_fetching").contains_key(key)
    }

    /// Mount an observer for `query`. Must be called inside a tokio runtime.
    pub fn use_query<T: Send + Sync + 'static>(&self, query: Query<T>) -> QueryObserver<T> {
        QueryObserver::mount(self.clone(), query)
    }

    /// Wrap `mutation` in an observer tracking its pending state
    pub fn use_mutation<V, R>(&self, mutation: Mutation<V, R>) -> MutationObserver<V, R>
    where
        V: Clone + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        MutationObserver::new(self.clone(), mutation)
    }

    /// Spawn the idle-entry sweeper.
    ///
    /// The task holds a weak handle and stops once the client is dropped.
    pub fn start_gc(&self) -> JoinHandle<()> {
        let interval = self.inner.config.gc_interval;
        let inner = Arc::downgrade(&self.inner);
        info!("Starting idle cache sweep (interval: {:?})", interval);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = inner.upgrade() else {
                    debug!("Query client dropped, stopping idle sweep");
                    break;
                };

                let evicted = inner.cache.evict_idle();
                if !evicted.is_empty() {
                    let mut refetchers = mutex_lock(&inner.refetchers, SOURCE, "gc");
                    for key in &evicted {
                        refetchers.remove(key);
                    }
                    debug!(
                        "Idle sweep: {} entries ({})",
                        evicted.len(),
                        InvalidationReason::GarbageCollected
                    );
                }
            }
        })
    }

    pub(crate) fn register_refetcher(&self, key: &QueryKey, refetcher: Refetcher) {
        mutex_lock(&self.inner.refetchers, SOURCE, "register_refetcher").insert(key.clone(), refetcher);
    }

    pub(crate) fn release_refetcher(&self, key: &QueryKey) {
        if self.inner.cache.subscriber_count(key) == 0 {
            mutex_lock(&self.inner.refetchers, SOURCE, "release_refetcher").remove(key);
        }
    }

    /// Join the in-flight fetch for `key`, or start one.
    ///
    /// The fetch runs as its own task, so it settles and writes the cache
    /// even if every waiter goes away. A fetch that was invalidated while
    /// running is not joined: a new one takes over the key and the old
    /// result only reaches the old waiters.
    pub(crate) fn start_or_join(&self, key: &QueryKey, fetch: ErasedFetch, retry: RetryPolicy) -> SharedFetch {
        let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, "start_or_join");
        let replaced = match inflight.get(key) {
            Some(existing) if !existing.superseded => {
                self.inner.cache.record(|stats| stats.deduplicated += 1);
                debug!("Joining in-flight fetch for {}", key);
                return existing.shared.clone();
            }
            Some(existing) => {
                debug!("Replacing invalidated fetch for {}", key);
                Some(existing.previous.clone())
            }
            None => None,
        };

        let id = self.inner.fetch_seq.fetch_add(1, Ordering::Relaxed);
        let previous = replaced
            .or_else(|| self.inner.cache.get(key))
            .unwrap_or_else(|| {
                Arc::new(CacheEntry::new(
                    key.clone(),
                    self.inner.config.stale_time,
                    self.inner.config.gc_time,
                ))
            });
        self.inner.cache.set(key, EntryPatch::fetching());

        let client = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move { client.run_fetch(task_key, id, fetch, retry).await });
        let abort = handle.abort_handle();

        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(QueryError::Cancelled),
                Err(e) => Err(QueryError::Other(format!("fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        inflight.insert(
            key.clone(),
            InFlight {
                id,
                shared: shared.clone(),
                abort,
                previous,
                superseded: false,
            },
        );
        shared
    }

    async fn run_fetch(self, key: QueryKey, id: u64, fetch: ErasedFetch, retry: RetryPolicy) -> Result<QueryData> {
        self.inner.cache.record(|stats| stats.fetches += 1);
        debug!("Fetching {}", key);

        let label = key.to_string();
        let (result, retries) = retry.run(&label, || fetch()).await;
        if retries > 0 {
            self.inner.cache.record(|stats| stats.retries += u64::from(retries));
        }

        // Only the fetch that still owns the key may write it back. The write
        // happens under the in-flight lock so an invalidation cannot slip
        // between the ownership check and the store update.
        let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, "run_fetch");
        let owned = inflight.get(&key).map(|record| record.id) == Some(id);
        let record = if owned { inflight.remove(&key) } else { None };
        let Some(record) = record else {
            debug!("Fetch for {} was replaced, discarding result", key);
            return result;
        };

        match &result {
            Ok(data) => {
                let mut patch = EntryPatch::success(data.clone());
                if record.superseded {
                    debug!("{} was invalidated while fetching, keeping it stale", key);
                    patch = patch.invalidated(true);
                }
                self.inner.cache.set(&key, patch);
                debug!("Fetched {} after {} retries", key, retries);
            }
            Err(e) => {
                self.inner.cache.record(|stats| stats.failures += 1);
                self.inner.cache.set(&key, EntryPatch::failure(e.clone()));
                warn!("Fetch for {} failed: {}", key, e);
            }
        }
        drop(inflight);
        result
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.cache.len())
            .finish()
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(key: &QueryKey, data: QueryData) -> Result<Arc<T>> {
    data.downcast::<T>().map_err(|_| QueryError::TypeMismatch {
        key: key.to_string(),
        expected: type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn client() -> QueryClient {
        QueryClient::new(SyncConfig::testing())
    }

    fn counting(calls: Arc<AtomicUsize>, value: u32) -> Query<u32> {
        Query::new(["profile"], move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(value)
            }
        })
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut config = SyncConfig::testing();
        config.retry_jitter = 2.0;
        assert!(matches!(QueryClient::init(config), Err(QueryError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_deduplicated() {
        let client = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting(calls.clone(), 7);

        let (a, b) = futures::join!(client.fetch_query(&query), client.fetch_query(&query));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(client.stats().deduplicated, 1);
    }

    #[tokio::test]
    async fn test_fresh_data_is_a_cache_hit() {
        let client = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting(calls.clone(), 7).stale_time(Duration::from_secs(60));

        client.fetch_query(&query).await.unwrap();
        let again = client.fetch_query(&query).await.unwrap();

        assert_eq!(*again, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_disabled_query_never_fetches() {
        let client = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting(calls.clone(), 7).enabled(false);

        assert!(matches!(client.fetch_query(&query).await, Err(QueryError::Disabled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(client.cache().get(query.key()).is_none());
    }

    #[tokio::test]
    async fn test_set_and_get_query_data() {
        let client = client();
        let key = QueryKey::from(["tasks", "today"]);

        assert!(client.get_query_data::<Vec<u32>>(&key).unwrap().is_none());
        client
            .set_query_data::<Vec<u32>, _>(&key, |current| {
                assert!(current.is_none());
                Some(vec![1, 2])
            })
            .unwrap();
        client
            .set_query_data::<Vec<u32>, _>(&key, |current| {
                let mut next = current.cloned().unwrap_or_default();
                next.push(3);
                Some(next)
            })
            .unwrap();

        let data = client.get_query_data::<Vec<u32>>(&key).unwrap().unwrap();
        assert_eq!(*data, vec![1, 2, 3]);
        assert!(client.get_query_data::<String>(&key).is_err());
    }

    #[tokio::test]
    async fn test_cancel_restores_previous_status() {
        let client = client();
        let query = Query::new(["slow"], || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1u8)
        });

        let pending = {
            let client = client.clone();
            let query = query.clone();
            tokio::spawn(async move { client.fetch_query(&query).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.is_fetching(query.key()));

        let cancelled = client.cancel_queries(["slow"]);
        assert_eq!(cancelled, vec![query.key().clone()]);
        assert!(matches!(pending.await.unwrap(), Err(QueryError::Cancelled)));

        let entry = client.cache().get(query.key()).unwrap();
        assert_eq!(entry.status, QueryStatus::Idle);
        assert!(!client.is_fetching(query.key()));
    }

    #[tokio::test]
    async fn test_invalidate_without_subscribers_marks_stale_only() {
        let client = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting(calls.clone(), 1).stale_time(Duration::from_secs(60));
        client.fetch_query(&query).await.unwrap();

        let event = client.invalidate_queries(["profile"]);
        assert_eq!(event.keys, vec![query.key().clone()]);
        assert!(event.refetched.is_empty());
        assert!(client.cache().get(query.key()).unwrap().is_stale());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        client.fetch_query(&query).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remove_queries() {
        let client = client();
        client
            .set_query_data::<u8, _>(&QueryKey::from(["albums", "1"]), |_| Some(1))
            .unwrap();
        client
            .set_query_data::<u8, _>(&QueryKey::from(["albums", "2"]), |_| Some(2))
            .unwrap();

        assert_eq!(client.remove_queries(["albums"]), 2);
        assert!(client.cache().is_empty());
    }
}
