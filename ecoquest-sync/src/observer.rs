//! Subscriber bridge: a mounted consumer of one query key
//!
//! A [`QueryObserver`] subscribes to its key for as long as it lives. Every
//! cache write for the key lands in a `watch` channel, which is the consumer's
//! re-render signal. All observers of a key read the same `Arc<CacheEntry>`,
//! so their payloads are pointer-equal after each update.

use crate::cache::{CacheEntry, QueryKey, QueryStatus, Subscription};
use crate::client::{downcast, QueryClient, Refetcher};
use crate::error::{QueryError, Result};
use crate::query::Query;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// What a consumer renders from
#[derive(Debug)]
pub struct QueryResult<T> {
    pub data: Option<Arc<T>>,
    pub status: QueryStatus,
    pub error: Option<QueryError>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl<T> Clone for QueryResult<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            status: self.status,
            error: self.error.clone(),
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            fetched_at: self.fetched_at,
            version: self.version,
        }
    }
}

impl<T: Send + Sync + 'static> QueryResult<T> {
    fn from_entry(entry: &CacheEntry) -> Self {
        match entry.data::<T>() {
            Ok(data) => Self {
                data,
                status: entry.status,
                error: entry.error.clone(),
                is_fetching: entry.is_fetching(),
                is_stale: entry.is_stale(),
                fetched_at: entry.fetched_at,
                version: entry.version,
            },
            Err(mismatch) => Self {
                data: None,
                status: QueryStatus::Error,
                error: Some(mismatch),
                is_fetching: entry.is_fetching(),
                is_stale: entry.is_stale(),
                fetched_at: entry.fetched_at,
                version: entry.version,
            },
        }
    }
}

impl<T> QueryResult<T> {
    /// First load: nothing to show yet and a fetch is running
    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.is_fetching
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_idle(&self) -> bool {
        self.status == QueryStatus::Idle
    }
}

/// A mounted query consumer; unsubscribes when dropped
pub struct QueryObserver<T> {
    client: QueryClient,
    query: Query<T>,
    subscription: Option<Subscription>,
    receiver: watch::Receiver<Arc<CacheEntry>>,
    // Keeps the channel open for the lifetime of the observer
    _sender: Arc<watch::Sender<Arc<CacheEntry>>>,
}

fn push(sender: &watch::Sender<Arc<CacheEntry>>, entry: &Arc<CacheEntry>) {
    sender.send_if_modified(|current| {
        if entry.version > current.version {
            *current = entry.clone();
            true
        } else {
            false
        }
    });
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    pub(crate) fn mount(client: QueryClient, query: Query<T>) -> Self {
        let key = query.key().clone();

        if !query.is_enabled() {
            debug!("Mounted disabled observer for {}", key);
            let config = client.config();
            let placeholder = Arc::new(CacheEntry::new(key, config.stale_time, config.gc_time));
            let (sender, receiver) = watch::channel(placeholder);
            return Self {
                client,
                query,
                subscription: None,
                receiver,
                _sender: Arc::new(sender),
            };
        }

        let entry = client.ensure_entry(&query);
        let (sender, receiver) = watch::channel(entry);
        let sender = Arc::new(sender);

        let listener = sender.clone();
        let subscription = client
            .cache()
            .subscribe(&key, move |entry| push(&listener, entry));

        // Catch a write that landed between `ensure_entry` and `subscribe`.
        if let Some(current) = client.cache().get(&key) {
            push(&sender, &current);
        }

        client.register_refetcher(
            &key,
            Refetcher {
                fetch: query.erased(),
                retry: client.resolve_retry(&query),
            },
        );

        let current = receiver.borrow().clone();
        if current.is_stale() || !current.has_data() {
            client.cache().record(|stats| stats.misses += 1);
            let _ = client.start_or_join(&key, query.erased(), client.resolve_retry(&query));
        } else {
            client.cache().record(|stats| stats.hits += 1);
        }

        debug!("Mounted observer for {}", key);
        Self {
            client,
            query,
            subscription: Some(subscription),
            receiver,
            _sender: sender,
        }
    }

    pub fn key(&self) -> &QueryKey {
        self.query.key()
    }

    pub fn is_enabled(&self) -> bool {
        self.query.is_enabled()
    }

    /// Current entry as seen by this observer
    pub fn entry(&self) -> Arc<CacheEntry> {
        self.receiver.borrow().clone()
    }

    /// Current state
    pub fn state(&self) -> QueryResult<T> {
        QueryResult::from_entry(&self.receiver.borrow())
    }

    /// Wait for the next update to the entry.
    ///
    /// A disabled observer never receives updates.
    pub async fn changed(&mut self) -> QueryResult<T> {
        if self.receiver.changed().await.is_err() {
            debug!("Observer channel for {} closed", self.key());
        }
        self.state()
    }

    /// Wait until no fetch is running for the key
    pub async fn settled(&mut self) -> QueryResult<T> {
        if self
            .receiver
            .wait_for(|entry| entry.status != QueryStatus::Fetching)
            .await
            .is_err()
        {
            debug!("Observer channel for {} closed", self.key());
        }
        self.state()
    }

    /// Force a fetch, joining one already in flight
    pub async fn refetch(&self) -> Result<Arc<T>> {
        if !self.is_enabled() {
            return Err(QueryError::Disabled(self.key().to_string()));
        }
        let shared = self.client.start_or_join(
            self.query.key(),
            self.query.erased(),
            self.client.resolve_retry(&self.query),
        );
        let data = shared.await?;
        downcast(self.query.key(), data)
    }
}

impl<T> Drop for QueryObserver<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            let key = subscription.key().clone();
            drop(subscription);
            self.client.release_refetcher(&key);
            debug!("Unmounted observer for {}", key);
        }
    }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("key", self.query.key())
            .field("enabled", &self.query.options().enabled)
            .field("version", &self.receiver.borrow().version)
            .finish()
    }
}
