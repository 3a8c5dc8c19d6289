//! Cache entries and the partial updates applied to them

use crate::cache::key::QueryKey;
use crate::error::{QueryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Type-erased payload of a cache entry.
///
/// Payloads are immutable once stored; patches replace the `Arc` rather than
/// mutating through it, so holding a clone is as good as a deep copy.
pub type QueryData = Arc<dyn Any + Send + Sync>;

/// Lifecycle status of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Created, never fetched (or gated off)
    Idle,

    /// A fetch is in flight
    Fetching,

    /// Last fetch succeeded
    Success,

    /// Last fetch failed after exhausting retries
    Error,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Idle => write!(f, "idle"),
            QueryStatus::Fetching => write!(f, "fetching"),
            QueryStatus::Success => write!(f, "success"),
            QueryStatus::Error => write!(f, "error"),
        }
    }
}

/// A cache entry, owned by the store and handed out as `Arc<CacheEntry>`.
///
/// Entries are never mutated in place. Every write produces a new entry with
/// a bumped `version`, so a consumer holding an `Arc` always sees a complete,
/// consistent state.
#[derive(Clone)]
pub struct CacheEntry {
    /// The key this entry belongs to
    pub key: QueryKey,

    data: Option<QueryData>,

    /// Current lifecycle status
    pub status: QueryStatus,

    /// Last error, present only while `status == Error`
    pub error: Option<QueryError>,

    /// When the data was last confirmed by the server
    pub fetched_at: Option<DateTime<Utc>>,

    /// Age after which the data is eligible for refetch
    pub stale_time: Duration,

    /// Idle time without subscribers before eviction
    pub gc_time: Duration,

    /// Explicitly marked stale by invalidation
    pub invalidated: bool,

    /// Monotonic change counter, bumped on every write
    pub version: u64,

    /// When this version was written
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an idle entry with no data
    pub fn new(key: QueryKey, stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            key,
            data: None,
            status: QueryStatus::Idle,
            error: None,
            fetched_at: None,
            stale_time,
            gc_time,
            invalidated: false,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Typed view of the payload
    ///
    /// Returns `Ok(None)` when there is no data yet and
    /// [`QueryError::TypeMismatch`] when the payload has a different type.
    pub fn data<T: Any + Send + Sync>(&self) -> Result<Option<Arc<T>>> {
        match &self.data {
            None => Ok(None),
            Some(raw) => raw
                .clone()
                .downcast::<T>()
                .map(Some)
                .map_err(|_| QueryError::TypeMismatch {
                    key: self.key.to_string(),
                    expected: type_name::<T>(),
                }),
        }
    }

    /// The untyped payload
    pub fn raw_data(&self) -> Option<&QueryData> {
        self.data.as_ref()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.status == QueryStatus::Fetching
    }

    /// Check staleness against the entry's own `stale_time`
    pub fn is_stale(&self) -> bool {
        self.is_stale_after(self.stale_time)
    }

    /// Check staleness against an explicit `stale_time`
    pub fn is_stale_after(&self, stale_time: Duration) -> bool {
        if self.invalidated {
            return true;
        }
        match self.fetched_at {
            None => true,
            Some(fetched_at) => {
                let age = (Utc::now() - fetched_at)
                    .to_std()
                    .unwrap_or(Duration::from_secs(0));
                age >= stale_time
            }
        }
    }

    /// Get the age of the data since the last successful fetch
    pub fn age(&self) -> Option<Duration> {
        self.fetched_at.map(|fetched_at| {
            (Utc::now() - fetched_at)
                .to_std()
                .unwrap_or(Duration::from_secs(0))
        })
    }

    /// Get time until the data turns stale
    pub fn time_until_stale(&self) -> Option<Duration> {
        if self.invalidated {
            return None;
        }
        let age = self.age()?;
        self.stale_time.checked_sub(age).filter(|d| !d.is_zero())
    }

    /// Whether two entries hold the same observable state.
    ///
    /// Payloads are compared by identity; `version` and `updated_at` are
    /// bookkeeping and ignored.
    pub fn same_state(&self, other: &CacheEntry) -> bool {
        let same_data = match (&self.data, &other.data) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_data
            && self.key == other.key
            && self.status == other.status
            && self.error == other.error
            && self.fetched_at == other.fetched_at
            && self.stale_time == other.stale_time
            && self.gc_time == other.gc_time
            && self.invalidated == other.invalidated
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("has_data", &self.has_data())
            .field("status", &self.status)
            .field("error", &self.error)
            .field("fetched_at", &self.fetched_at)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("invalidated", &self.invalidated)
            .field("version", &self.version)
            .finish()
    }
}

/// A partial update merged into an entry by [`QueryCache::set`].
///
/// Fields left as `None` keep their current value.
///
/// [`QueryCache::set`]: crate::cache::QueryCache::set
#[derive(Clone, Default)]
pub struct EntryPatch {
    data: Option<Option<QueryData>>,
    status: Option<QueryStatus>,
    error: Option<Option<QueryError>>,
    fetched_at: Option<Option<DateTime<Utc>>>,
    stale_time: Option<Duration>,
    gc_time: Option<Duration>,
    invalidated: Option<bool>,
}

impl EntryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetch has started: data is kept, the error is cleared
    pub fn fetching() -> Self {
        Self::new().status(QueryStatus::Fetching).error(None)
    }

    /// A fetch succeeded
    pub fn success(data: QueryData) -> Self {
        Self::new()
            .data(Some(data))
            .status(QueryStatus::Success)
            .error(None)
            .fetched_at(Some(Utc::now()))
            .invalidated(false)
    }

    /// A fetch failed after exhausting retries. Existing data is retained.
    pub fn failure(error: QueryError) -> Self {
        Self::new().status(QueryStatus::Error).error(Some(error))
    }

    /// Mark the entry stale
    pub fn invalidate() -> Self {
        Self::new().invalidated(true)
    }

    pub fn data(mut self, data: Option<QueryData>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn status(mut self, status: QueryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error(mut self, error: Option<QueryError>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn fetched_at(mut self, fetched_at: Option<DateTime<Utc>>) -> Self {
        self.fetched_at = Some(fetched_at);
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }

    pub fn invalidated(mut self, invalidated: bool) -> Self {
        self.invalidated = Some(invalidated);
        self
    }

    /// Produce the next version of `entry` with this patch merged in
    pub fn apply(&self, entry: &CacheEntry) -> CacheEntry {
        let mut next = entry.clone();
        if let Some(data) = &self.data {
            next.data = data.clone();
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(error) = &self.error {
            next.error = error.clone();
        }
        if let Some(fetched_at) = self.fetched_at {
            next.fetched_at = fetched_at;
        }
        if let Some(stale_time) = self.stale_time {
            next.stale_time = stale_time;
        }
        if let Some(gc_time) = self.gc_time {
            next.gc_time = gc_time;
        }
        if let Some(invalidated) = self.invalidated {
            next.invalidated = invalidated;
        }
        if next.status != QueryStatus::Error {
            next.error = None;
        }
        next.version = entry.version + 1;
        next.updated_at = Utc::now();
        next
    }
}
