//! The cache store: the single mutable map from query key to entry
//!
//! `set` is the only write path. It is synchronous and swaps in a complete
//! new entry under the lock, so a reader sees either the old `Arc` or the new
//! one, never a half-applied patch. Listeners for the exact key are called
//! after the lock is released.

use crate::cache::{
    config::SyncConfig,
    entry::{CacheEntry, EntryPatch, QueryStatus},
    key::QueryKey,
    lock::{mutex_lock, rw_read, rw_write},
    types::CacheStats,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tracing::debug;

const SOURCE: &str = "cache::store";

/// Callback invoked with the new entry after every write to a subscribed key
pub type Listener = Arc<dyn Fn(&Arc<CacheEntry>) + Send + Sync>;

/// Process-wide query cache
pub struct QueryCache {
    slots: RwLock<HashMap<QueryKey, Slot>>,
    stats: Mutex<CacheStats>,
    next_listener_id: AtomicU64,
    default_stale_time: Duration,
    default_gc_time: Duration,
}

struct Slot {
    entry: Arc<CacheEntry>,
    listeners: Vec<(u64, Listener)>,
    /// Set while nobody is subscribed; drives eviction
    idle_since: Option<DateTime<Utc>>,
}

impl Slot {
    fn new(entry: CacheEntry) -> Self {
        Self {
            entry: Arc::new(entry),
            listeners: Vec::new(),
            idle_since: Some(Utc::now()),
        }
    }

    fn listeners(&self) -> Vec<Listener> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}

impl QueryCache {
    /// Create an empty store with the defaults from `config`
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
            next_listener_id: AtomicU64::new(1),
            default_stale_time: config.stale_time,
            default_gc_time: config.gc_time,
        }
    }

    fn blank_entry(&self, key: &QueryKey) -> CacheEntry {
        CacheEntry::new(key.clone(), self.default_stale_time, self.default_gc_time)
    }

    /// Current entry for `key`.
    ///
    /// Two calls without an intervening write return the same `Arc`.
    pub fn get(&self, key: &QueryKey) -> Option<Arc<CacheEntry>> {
        rw_read(&self.slots, SOURCE, "get")
            .get(key)
            .map(|slot| slot.entry.clone())
    }

    /// Merge `patch` into the entry for `key`, creating it if needed, and
    /// notify the key's subscribers.
    pub fn set(&self, key: &QueryKey, patch: EntryPatch) -> Arc<CacheEntry> {
        let (entry, listeners) = {
            let mut slots = rw_write(&self.slots, SOURCE, "set");
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(self.blank_entry(key)));
            let next = Arc::new(patch.apply(&slot.entry));
            slot.entry = next.clone();
            (next, slot.listeners())
        };

        debug!(
            "Cache set {} -> {} (v{})",
            key, entry.status, entry.version
        );
        notify(&listeners, &entry);
        entry
    }

    /// Create an idle entry for `key` if absent, applying the query's
    /// timing options. Returns the current entry.
    pub fn ensure(&self, key: &QueryKey, stale_time: Duration, gc_time: Duration) -> Arc<CacheEntry> {
        let existing = {
            let mut slots = rw_write(&self.slots, SOURCE, "ensure");
            match slots.get(key) {
                Some(slot) => slot.entry.clone(),
                None => {
                    let entry = CacheEntry::new(key.clone(), stale_time, gc_time);
                    let slot = Slot::new(entry);
                    let entry = slot.entry.clone();
                    slots.insert(key.clone(), slot);
                    debug!("Created cache entry: {}", key);
                    return entry;
                }
            }
        };

        if existing.stale_time != stale_time || existing.gc_time != gc_time {
            self.set(key, EntryPatch::new().stale_time(stale_time).gc_time(gc_time))
        } else {
            existing
        }
    }

    /// Register `listener` for writes to `key`.
    ///
    /// Creates the entry on first subscription. The listener stays registered
    /// until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, key: &QueryKey, listener: F) -> Subscription
    where
        F: Fn(&Arc<CacheEntry>) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut slots = rw_write(&self.slots, SOURCE, "subscribe");
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(self.blank_entry(key)));
            slot.listeners.push((id, Arc::new(listener)));
            slot.idle_since = None;
            debug!(
                "Subscribed to {} ({} subscribers)",
                key,
                slot.listeners.len()
            );
        }

        Subscription {
            cache: Arc::downgrade(self),
            key: key.clone(),
            id,
            active: true,
        }
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, key: &QueryKey, id: u64) -> bool {
        let mut slots = rw_write(&self.slots, SOURCE, "unsubscribe");
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };

        let before = slot.listeners.len();
        slot.listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = slot.listeners.len() < before;

        if removed && slot.listeners.is_empty() {
            slot.idle_since = Some(Utc::now());
            debug!("Last subscriber left {}", key);
        }
        removed
    }

    /// Number of active subscribers for `key`
    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        rw_read(&self.slots, SOURCE, "subscriber_count")
            .get(key)
            .map(|slot| slot.listeners.len())
            .unwrap_or(0)
    }

    /// All entries whose key starts with `prefix`
    pub fn find_all(&self, prefix: &QueryKey) -> Vec<Arc<CacheEntry>> {
        let slots = rw_read(&self.slots, SOURCE, "find_all");
        let mut entries: Vec<Arc<CacheEntry>> = slots
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, slot)| slot.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// All keys currently cached
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = rw_read(&self.slots, SOURCE, "keys").keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Mark every entry under `prefix` stale. Returns the affected keys.
    pub fn invalidate(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let keys: Vec<QueryKey> = self
            .find_all(prefix)
            .into_iter()
            .map(|entry| entry.key.clone())
            .collect();

        for key in &keys {
            self.set(key, EntryPatch::invalidate());
        }

        if !keys.is_empty() {
            self.record(|stats| stats.invalidations += keys.len() as u64);
            debug!("Invalidated {} entries under {}", keys.len(), prefix);
        }
        keys
    }

    /// Drop entries under `prefix`.
    ///
    /// Entries that still have subscribers are reset to a blank idle entry
    /// instead, so their consumers keep a live subscription.
    pub fn remove_matching(&self, prefix: &QueryKey) -> usize {
        let mut notifications = Vec::new();
        let removed = {
            let mut slots = rw_write(&self.slots, SOURCE, "remove_matching");
            let keys: Vec<QueryKey> = slots
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();

            for key in &keys {
                let keep = slots
                    .get(key)
                    .map(|slot| !slot.listeners.is_empty())
                    .unwrap_or(false);
                if keep {
                    if let Some(slot) = slots.get_mut(key) {
                        let mut blank = self.blank_entry(key);
                        blank.stale_time = slot.entry.stale_time;
                        blank.gc_time = slot.entry.gc_time;
                        blank.version = slot.entry.version + 1;
                        slot.entry = Arc::new(blank);
                        notifications.push((slot.entry.clone(), slot.listeners()));
                    }
                } else {
                    slots.remove(key);
                }
            }
            keys.len()
        };

        for (entry, listeners) in notifications {
            notify(&listeners, &entry);
        }
        if removed > 0 {
            debug!("Removed {} entries under {}", removed, prefix);
        }
        removed
    }

    /// Capture the current entries for `keys` (absent keys included)
    pub fn snapshot(&self, keys: &[QueryKey]) -> CacheSnapshot {
        let slots = rw_read(&self.slots, SOURCE, "snapshot");
        let entries = keys
            .iter()
            .map(|key| (key.clone(), slots.get(key).map(|slot| slot.entry.clone())))
            .collect();

        CacheSnapshot {
            entries,
            taken_at: Utc::now(),
        }
    }

    /// Write a snapshot back verbatim.
    ///
    /// Each entry regains its captured state (same payload, status, error and
    /// timestamps) under a new version. Keys that were absent are removed, or
    /// reset to a blank entry if someone subscribed in the meantime.
    pub fn restore(&self, snapshot: &CacheSnapshot) -> Vec<QueryKey> {
        let mut notifications = Vec::new();
        let mut restored = Vec::new();
        {
            let mut slots = rw_write(&self.slots, SOURCE, "restore");
            for (key, previous) in &snapshot.entries {
                match previous {
                    Some(previous) => {
                        let slot = slots
                            .entry(key.clone())
                            .or_insert_with(|| Slot::new(self.blank_entry(key)));
                        let mut entry = CacheEntry::clone(previous);
                        entry.version = slot.entry.version + 1;
                        entry.updated_at = Utc::now();
                        slot.entry = Arc::new(entry);
                        notifications.push((slot.entry.clone(), slot.listeners()));
                    }
                    None => {
                        let has_listeners = match slots.get(key) {
                            Some(slot) => !slot.listeners.is_empty(),
                            None => continue,
                        };
                        if has_listeners {
                            if let Some(slot) = slots.get_mut(key) {
                                let mut blank = self.blank_entry(key);
                                blank.version = slot.entry.version + 1;
                                slot.entry = Arc::new(blank);
                                notifications.push((slot.entry.clone(), slot.listeners()));
                            }
                        } else {
                            slots.remove(key);
                        }
                    }
                }
                restored.push(key.clone());
            }
        }

        for (entry, listeners) in notifications {
            notify(&listeners, &entry);
        }
        restored
    }

    /// Evict entries nobody has subscribed to for longer than their `gc_time`.
    /// Entries with a fetch in flight are kept.
    pub fn evict_idle(&self) -> Vec<QueryKey> {
        let now = Utc::now();
        let evicted: Vec<QueryKey> = {
            let mut slots = rw_write(&self.slots, SOURCE, "evict_idle");
            let expired: Vec<QueryKey> = slots
                .iter()
                .filter(|(_, slot)| {
                    slot.listeners.is_empty()
                        && slot.entry.status != QueryStatus::Fetching
                        && slot
                            .idle_since
                            .map(|since| {
                                (now - since).to_std().unwrap_or(Duration::from_secs(0))
                                    >= slot.entry.gc_time
                            })
                            .unwrap_or(false)
                })
                .map(|(key, _)| key.clone())
                .collect();

            for key in &expired {
                slots.remove(key);
            }
            expired
        };

        if !evicted.is_empty() {
            self.record(|stats| stats.evictions += evicted.len() as u64);
            debug!("Evicted {} idle entries", evicted.len());
        }
        evicted
    }

    pub fn len(&self) -> usize {
        rw_read(&self.slots, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        rw_read(&self.slots, SOURCE, "is_empty").is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let entries = self.len();
        let mut stats = mutex_lock(&self.stats, SOURCE, "stats").clone();
        stats.entries = entries;
        stats
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        update(&mut mutex_lock(&self.stats, SOURCE, "record"));
    }
}

fn notify(listeners: &[Listener], entry: &Arc<CacheEntry>) {
    for listener in listeners {
        listener(entry);
    }
}

/// Handle to a registered listener; unsubscribes on drop
pub struct Subscription {
    cache: Weak<QueryCache>,
    key: QueryKey,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Unsubscribe explicitly
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(cache) = self.cache.upgrade() {
            cache.unsubscribe(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

/// Entries captured before an optimistic patch, written back on rollback
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    entries: Vec<(QueryKey, Option<Arc<CacheEntry>>)>,
    taken_at: DateTime<Utc>,
}

impl CacheSnapshot {
    /// Keys covered by the snapshot
    pub fn keys(&self) -> Vec<QueryKey> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Captured entry for `key`; `None` if the key was absent or not covered
    pub fn get(&self, key: &QueryKey) -> Option<&Arc<CacheEntry>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, entry)| entry.as_ref())
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
