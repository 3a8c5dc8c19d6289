use ecoquest_sync::{Mutation, MutationObserver, Query, QueryObserver};
use std::time::Duration;

use super::EcoQuest;
use crate::api::{Challenge, JoinChallenge};
use crate::keys;

pub const CHALLENGES_STALE_TIME: Duration = Duration::from_secs(2 * 60);

fn mark_joined(challenges: &[Challenge], challenge_id: i64) -> Option<Vec<Challenge>> {
    if !challenges.iter().any(|c| c.id == challenge_id && !c.joined) {
        return None;
    }
    Some(
        challenges
            .iter()
            .map(|challenge| {
                let mut challenge = challenge.clone();
                if challenge.id == challenge_id {
                    challenge.joined = true;
                    challenge.participants += 1;
                }
                challenge
            })
            .collect(),
    )
}

impl EcoQuest {
    pub fn challenges_query(&self) -> Query<Vec<Challenge>> {
        let api = self.api.clone();
        Query::new(keys::challenges(), move || {
            let api = api.clone();
            async move { api.challenges().await }
        })
        .stale_time(CHALLENGES_STALE_TIME)
        .enabled(self.auth.is_authenticated())
    }

    pub fn use_challenges(&self) -> QueryObserver<Vec<Challenge>> {
        self.client.use_query(self.challenges_query())
    }

    /// Show the user as joined right away; joining can award points, so the
    /// profile is refreshed as well.
    pub fn join_challenge_mutation(&self) -> Mutation<JoinChallenge, Challenge> {
        let api = self.api.clone();
        Mutation::new("join_challenge", move |join: JoinChallenge| {
            let api = api.clone();
            async move { api.join_challenge(join.challenge_id).await }
        })
        .optimistic(
            |_| vec![keys::challenges()],
            |client, join| {
                client.set_query_data::<Vec<Challenge>, _>(&keys::challenges(), |current| {
                    mark_joined(current?, join.challenge_id)
                })?;
                Ok(())
            },
        )
        .invalidates(keys::challenges())
        .invalidates(keys::profile())
    }

    pub fn use_join_challenge(&self) -> MutationObserver<JoinChallenge, Challenge> {
        self.client.use_mutation(self.join_challenge_mutation())
    }
}
