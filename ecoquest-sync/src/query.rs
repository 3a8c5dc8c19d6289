//! Query definitions: a key, a fetch function and the policy around it

use crate::cache::{QueryData, QueryKey};
use crate::error::Result;
use crate::retry::RetryPolicy;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Fetch function with the payload type erased, as stored by the client
pub(crate) type ErasedFetch = Arc<dyn Fn() -> BoxFuture<'static, Result<QueryData>> + Send + Sync>;

/// Per-query overrides of the client defaults
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Freshness window; falls back to `SyncConfig::stale_time`
    pub stale_time: Option<Duration>,

    /// Idle window before eviction; falls back to `SyncConfig::gc_time`
    pub gc_time: Option<Duration>,

    /// When false the query never fetches and reports `idle`
    pub enabled: bool,

    /// Retry behaviour; falls back to `SyncConfig::retry_policy()`
    pub retry: Option<RetryPolicy>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: None,
            gc_time: None,
            enabled: true,
            retry: None,
        }
    }
}

/// A typed query: the unit a screen asks the client for
pub struct Query<T> {
    key: QueryKey,
    fetch: FetchFn<T>,
    options: QueryOptions,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetch: self.fetch.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish()
    }
}

impl<T> Query<T> {
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }
}

impl<T: Send + Sync + 'static> Query<T> {
    /// Create a query for `key` fetched by `fetch`
    pub fn new<F, Fut>(key: impl Into<QueryKey>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            fetch: Arc::new(move || fetch().boxed()),
            options: QueryOptions::default(),
        }
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.options.stale_time = Some(stale_time);
        self
    }

    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.options.gc_time = Some(gc_time);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.options.enabled = enabled;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.options.retry = Some(retry);
        self
    }

    pub(crate) fn erased(&self) -> ErasedFetch {
        let fetch = self.fetch.clone();
        Arc::new(move || {
            let pending = fetch();
            async move { pending.await.map(|value| Arc::new(value) as QueryData) }.boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;

    #[test]
    fn test_default_options() {
        let query = Query::new(["profile"], || async { Ok(1u32) });
        assert!(query.is_enabled());
        assert!(query.options().stale_time.is_none());
        assert_eq!(query.key(), &QueryKey::from(["profile"]));
    }

    #[test]
    fn test_builder_overrides() {
        let query = Query::new(["packets", "me"], || async { Ok(()) })
            .stale_time(Duration::from_secs(30))
            .gc_time(Duration::from_secs(90))
            .enabled(false)
            .retry(RetryPolicy::none().never_retry_status(409));

        let options = query.options();
        assert_eq!(options.stale_time, Some(Duration::from_secs(30)));
        assert_eq!(options.gc_time, Some(Duration::from_secs(90)));
        assert!(!options.enabled);
        assert_eq!(options.retry.as_ref().unwrap().never_retry_statuses, vec![409]);
    }

    #[tokio::test]
    async fn test_erased_fetch_wraps_payload() {
        let query = Query::new(["tasks", "today"], || async { Ok(vec![1u8, 2]) });
        let data = (query.erased())().await.unwrap();
        let tasks = data.downcast::<Vec<u8>>().unwrap();
        assert_eq!(*tasks, vec![1, 2]);

        let failing: Query<u8> = Query::new(["x"], || async { Err(QueryError::http(500, "boom")) });
        assert!((failing.erased())().await.is_err());
    }
}
