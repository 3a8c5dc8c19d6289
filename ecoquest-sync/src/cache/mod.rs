//! # Query Cache
//!
//! The store behind every query and mutation: one entry per [`QueryKey`],
//! replaced wholesale on every write.
//!
//! ## Features
//!
//! - **Structural keys**: hierarchical keys with prefix matching for invalidation
//! - **Immutable entries**: readers hold an `Arc<CacheEntry>` that never changes under them
//! - **Per-key subscriptions**: listeners fire after each write to their exact key
//! - **Snapshots**: capture and restore entries around optimistic updates
//! - **Idle eviction**: entries without subscribers are dropped after `gc_time`
//!
//! ## Example
//!
//! ```rust
//! use ecoquest_sync::cache::{EntryPatch, QueryCache, SyncConfig};
//! use ecoquest_sync::query_key;
//! use std::sync::Arc;
//!
//! let cache = Arc::new(QueryCache::new(&SyncConfig::default()));
//! let key = query_key!["tasks", "today"];
//!
//! cache.set(&key, EntryPatch::success(Arc::new(vec![1u32, 2, 3])));
//!
//! let entry = cache.get(&key).unwrap();
//! let tasks = entry.data::<Vec<u32>>().unwrap().unwrap();
//! assert_eq!(tasks.len(), 3);
//! ```

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub(crate) mod lock;
pub mod store;
pub mod types;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use entry::{CacheEntry, EntryPatch, QueryData, QueryStatus};
pub use invalidation::{InvalidationEdge, InvalidationEvent, InvalidationReason};
pub use key::{KeyPart, QueryKey};
pub use store::{CacheSnapshot, Listener, QueryCache, Subscription};
pub use types::CacheStats;
