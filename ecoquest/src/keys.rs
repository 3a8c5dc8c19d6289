//! Query key registry
//!
//! Every cached resource of the app is named here, so two screens asking for
//! the same data always build structurally equal keys.

use ecoquest_sync::{query_key, QueryKey};

use crate::api::LeaderboardPeriod;

pub fn profile() -> QueryKey {
    query_key!["profile"]
}

/// Prefix of every task query
pub fn tasks() -> QueryKey {
    query_key!["tasks"]
}

pub fn tasks_today() -> QueryKey {
    query_key!["tasks", "today"]
}

pub fn packets_me() -> QueryKey {
    query_key!["packets", "me"]
}

/// The journal list, and prefix of every single-entry key
pub fn journals() -> QueryKey {
    query_key!["journals"]
}

pub fn journal(id: i64) -> QueryKey {
    query_key!["journals", id]
}

pub fn albums() -> QueryKey {
    query_key!["albums"]
}

pub fn album(id: i64) -> QueryKey {
    query_key!["albums", id]
}

/// Prefix of every leaderboard period
pub fn leaderboards() -> QueryKey {
    query_key!["leaderboard"]
}

pub fn leaderboard(period: LeaderboardPeriod) -> QueryKey {
    query_key!["leaderboard", period.as_str()]
}

pub fn challenges() -> QueryKey {
    query_key!["challenges"]
}
