use ecoquest_sync::{Mutation, MutationObserver, Query, QueryObserver};
use std::time::Duration;

use super::EcoQuest;
use crate::api::{Album, NewAlbum};
use crate::keys;

pub const ALBUMS_STALE_TIME: Duration = Duration::from_secs(5 * 60);

impl EcoQuest {
    pub fn albums_query(&self) -> Query<Vec<Album>> {
        let api = self.api.clone();
        Query::new(keys::albums(), move || {
            let api = api.clone();
            async move { api.albums().await }
        })
        .stale_time(ALBUMS_STALE_TIME)
        .enabled(self.auth.is_authenticated())
    }

    pub fn use_albums(&self) -> QueryObserver<Vec<Album>> {
        self.client.use_query(self.albums_query())
    }

    pub fn album_query(&self, id: i64) -> Query<Album> {
        let api = self.api.clone();
        Query::new(keys::album(id), move || {
            let api = api.clone();
            async move { api.album(id).await }
        })
        .stale_time(ALBUMS_STALE_TIME)
        .enabled(self.auth.is_authenticated())
    }

    pub fn use_album(&self, id: i64) -> QueryObserver<Album> {
        self.client.use_query(self.album_query(id))
    }

    /// No optimistic patch: the album id only exists once the server answers
    pub fn create_album_mutation(&self) -> Mutation<NewAlbum, Album> {
        let api = self.api.clone();
        Mutation::new("create_album", move |album: NewAlbum| {
            let api = api.clone();
            async move { api.create_album(&album).await }
        })
        .on_success(|client, album, _| {
            let _ = client.set_query_data::<Vec<Album>, _>(&keys::albums(), |current| {
                let mut next: Vec<Album> = current?.clone();
                next.push(album.clone());
                Some(next)
            });
            let _ = client.set_query_data::<Album, _>(&keys::album(album.id), |_| Some(album.clone()));
        })
        .invalidates(keys::albums())
    }

    pub fn use_create_album(&self) -> MutationObserver<NewAlbum, Album> {
        self.client.use_mutation(self.create_album_mutation())
    }
}
