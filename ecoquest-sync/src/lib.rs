//! # EcoQuest Sync (ecoquest-sync)
//!
//! A client-side query cache for server state: fetch once, share everywhere,
//! write optimistically and roll back on failure.
//!
//! ## Features
//!
//! - Hierarchical query keys with prefix invalidation
//! - One in-flight fetch per key, shared by every concurrent caller
//! - Per-query staleness, garbage collection window and retry policy
//! - Optimistic mutations with snapshot rollback
//! - Declared invalidation edges from mutations to dependent queries
//! - Observers that re-render on every change to their key
//!
//! ## Queries
//!
//! A query is a key plus a fetch function. Fresh data is served from the
//! cache; stale or missing data is fetched, and concurrent callers share the
//! same request.
//!
//! ```no_run
//! use ecoquest_sync::{Query, QueryClient, SyncConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = QueryClient::init(SyncConfig::default())?;
//!
//!     let profile = Query::new(["profile"], || async { Ok("ada".to_string()) })
//!         .stale_time(Duration::from_secs(30));
//!
//!     let name = client.fetch_query(&profile).await?;
//!     println!("Hello, {}", name);
//!     Ok(())
//! }
//! ```
//!
//! ## Observers
//!
//! Mounting a query subscribes to its key until the observer is dropped.
//!
//! ```no_run
//! use ecoquest_sync::{Query, QueryClient, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = QueryClient::init(SyncConfig::default())?;
//!     let mut tasks = client.use_query(Query::new(["tasks", "today"], || async {
//!         Ok(vec!["sort recycling".to_string()])
//!     }));
//!
//!     let state = tasks.settled().await;
//!     if let Some(list) = state.data {
//!         println!("{} tasks today", list.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Mutations
//!
//! The optimistic patch is applied before the network call and undone if the
//! call fails. Declared prefixes are invalidated once the mutation settles.
//!
//! ```no_run
//! use ecoquest_sync::{query_key, Mutation, QueryClient, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = QueryClient::init(SyncConfig::default())?;
//!
//!     let rename = Mutation::new("rename", |name: String| async move { Ok(name) })
//!         .optimistic(
//!             |_| vec![query_key!["profile"]],
//!             |client, name| {
//!                 client.set_query_data::<String, _>(&query_key!["profile"], |_| Some(name.clone()))?;
//!                 Ok(())
//!             },
//!         )
//!         .invalidates(["profile"]);
//!
//!     let outcome = client.use_mutation(rename).mutate("grace".to_string()).await;
//!     println!("{}", outcome.state());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod mutation;
pub mod observer;
pub mod query;
pub mod retry;

// Re-export main types for convenience
pub use cache::{
    CacheEntry, CacheSnapshot, CacheStats, EntryPatch, InvalidationEdge, InvalidationEvent,
    InvalidationReason, KeyPart, QueryCache, QueryData, QueryKey, QueryStatus, Subscription,
    SyncConfig, SyncConfigBuilder,
};
pub use client::QueryClient;
pub use error::{ApiErrorBody, QueryError, Result};
pub use mutation::{Mutation, MutationContext, MutationObserver, MutationOutcome, MutationState};
pub use observer::{QueryObserver, QueryResult};
pub use query::{Query, QueryOptions};
pub use retry::RetryPolicy;
