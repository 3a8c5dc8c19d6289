use ecoquest_sync::{Query, QueryObserver};
use std::time::Duration;

use super::EcoQuest;
use crate::api::{LeaderboardEntry, LeaderboardPeriod};
use crate::keys;

pub const LEADERBOARD_STALE_TIME: Duration = Duration::from_secs(5 * 60);

impl EcoQuest {
    /// Public ranking; does not require a signed-in user
    pub fn leaderboard_query(&self, period: LeaderboardPeriod) -> Query<Vec<LeaderboardEntry>> {
        let api = self.api.clone();
        Query::new(keys::leaderboard(period), move || {
            let api = api.clone();
            async move { api.leaderboard(period).await }
        })
        .stale_time(LEADERBOARD_STALE_TIME)
    }

    pub fn use_leaderboard(&self, period: LeaderboardPeriod) -> QueryObserver<Vec<LeaderboardEntry>> {
        self.client.use_query(self.leaderboard_query(period))
    }
}
