use ecoquest_sync::{Mutation, MutationObserver, Query, QueryObserver};
use std::time::Duration;

use super::EcoQuest;
use crate::api::{Profile, UpdateProfile};
use crate::keys;

pub const PROFILE_STALE_TIME: Duration = Duration::from_secs(60);

impl EcoQuest {
    pub fn profile_query(&self) -> Query<Profile> {
        let api = self.api.clone();
        Query::new(keys::profile(), move || {
            let api = api.clone();
            async move { api.profile_me().await }
        })
        .stale_time(PROFILE_STALE_TIME)
        .enabled(self.auth.is_authenticated())
    }

    pub fn use_profile_me(&self) -> QueryObserver<Profile> {
        self.client.use_query(self.profile_query())
    }

    /// Apply the edit locally, then store the server's version on success
    pub fn update_profile_mutation(&self) -> Mutation<UpdateProfile, Profile> {
        let api = self.api.clone();
        Mutation::new("update_profile", move |update: UpdateProfile| {
            let api = api.clone();
            async move { api.update_profile(&update).await }
        })
        .optimistic(
            |_| vec![keys::profile()],
            |client, update| {
                client.set_query_data::<Profile, _>(&keys::profile(), |current| {
                    current.map(|profile| update.apply_to(profile))
                })?;
                Ok(())
            },
        )
        .on_success(|client, profile, _| {
            let _ = client.set_query_data::<Profile, _>(&keys::profile(), |_| Some(profile.clone()));
        })
        .invalidates(keys::profile())
    }

    pub fn use_update_profile(&self) -> MutationObserver<UpdateProfile, Profile> {
        self.client.use_mutation(self.update_profile_mutation())
    }
}
