//! Invalidation edges and events
//!
//! An invalidation edge is the static declaration that settling a given
//! mutation makes a set of query-key prefixes stale. Each invalidation run
//! produces an [`InvalidationEvent`] describing what was touched and why.

use crate::cache::key::QueryKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Manual invalidation by prefix
    Manual,

    /// A mutation settled and its declared edges fired
    MutationSettled { mutation: String },

    /// Removed by the idle sweep after `gc_time`
    GarbageCollected,

    /// Explicitly removed from the store
    Removed,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::MutationSettled { mutation } => {
                write!(f, "mutation settled: {}", mutation)
            }
            InvalidationReason::GarbageCollected => write!(f, "idle past gc time"),
            InvalidationReason::Removed => write!(f, "removed"),
        }
    }
}

/// Static dependency from a mutation to the key prefixes it makes stale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEdge {
    /// Mutation name, used for logging
    pub mutation: String,

    /// Prefixes marked stale when the mutation settles
    pub prefixes: Vec<QueryKey>,
}

impl InvalidationEdge {
    pub fn new(mutation: impl Into<String>) -> Self {
        Self {
            mutation: mutation.into(),
            prefixes: Vec::new(),
        }
    }

    /// Add a prefix to the edge
    pub fn prefix(mut self, prefix: impl Into<QueryKey>) -> Self {
        let prefix = prefix.into();
        if !self.prefixes.contains(&prefix) {
            self.prefixes.push(prefix);
        }
        self
    }

    /// Whether settling the mutation touches `key`
    pub fn covers(&self, key: &QueryKey) -> bool {
        self.prefixes.iter().any(|prefix| key.starts_with(prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn reason(&self) -> InvalidationReason {
        InvalidationReason::MutationSettled {
            mutation: self.mutation.clone(),
        }
    }
}

/// Record of one invalidation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<QueryKey>,

    /// Keys that were refetched immediately because they had subscribers
    pub refetched: Vec<QueryKey>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<QueryKey>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            refetched: Vec::new(),
        }
    }

    /// Attach the list of refetched keys
    pub fn with_refetched(mut self, refetched: Vec<QueryKey>) -> Self {
        self.refetched = refetched;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
