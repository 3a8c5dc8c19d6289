//! Typed hooks consumed by screens
//!
//! Each hook pairs a fixed key from [`crate::keys`] with an API call and the
//! cache policy for that resource. Query hooks return a mounted
//! [`QueryObserver`](ecoquest_sync::QueryObserver); mutation hooks return a
//! [`MutationObserver`](ecoquest_sync::MutationObserver).
//!
//! Queries that need a signed-in user are built with `enabled` set from the
//! [`AuthGate`]; signed-out screens get an idle observer and no traffic.

mod albums;
mod challenges;
mod journals;
mod leaderboard;
mod packets;
mod profile;
mod tasks;

pub use albums::ALBUMS_STALE_TIME;
pub use challenges::CHALLENGES_STALE_TIME;
pub use journals::JOURNALS_STALE_TIME;
pub use leaderboard::LEADERBOARD_STALE_TIME;
pub use packets::{PacketState, PACKET_STALE_TIME};
pub use profile::PROFILE_STALE_TIME;
pub use tasks::{completion, TASKS_STALE_TIME};

use ecoquest_sync::{QueryClient, Result};

use crate::api::ApiClient;
use crate::auth::AuthGate;
use crate::config::AppConfig;

/// HTTP status the API uses for "expected absence", e.g. no active packet
pub const NO_ACTIVE_RESOURCE: u16 = 409;

/// Entry point of the application layer
#[derive(Clone, Debug)]
pub struct EcoQuest {
    client: QueryClient,
    api: ApiClient,
    auth: AuthGate,
}

impl EcoQuest {
    /// Build the query client, auth gate and API client from `config`
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = QueryClient::init(config.sync.clone())?;
        let auth = AuthGate::new(config.api_token.clone());
        let api = ApiClient::new(config, auth.clone())?;
        Ok(Self::from_parts(client, api))
    }

    pub fn from_parts(client: QueryClient, api: ApiClient) -> Self {
        let auth = api.auth().clone();
        Self { client, api, auth }
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    /// Warm the queries behind the home screen in parallel
    pub async fn prefetch_home(&self) {
        if !self.auth.is_authenticated() {
            return;
        }
        let profile = self.profile_query();
        let today_tasks = self.today_tasks_query();
        let my_packet = self.my_packet_query();
        futures::join!(
            self.client.prefetch_query(&profile),
            self.client.prefetch_query(&today_tasks),
            self.client.prefetch_query(&my_packet),
        );
    }

    /// Drop all user-scoped cache entries and sign out
    pub fn sign_out(&self) {
        for prefix in [
            crate::keys::profile(),
            crate::keys::tasks(),
            crate::keys::packets_me(),
            crate::keys::journals(),
            crate::keys::albums(),
            crate::keys::challenges(),
        ] {
            self.client.remove_queries(prefix);
        }
        self.auth.sign_out();
    }
}
