//! HTTP client for the EcoQuest REST API
//!
//! Every call attaches the bearer token held by the [`AuthGate`] and maps
//! failures into [`QueryError`], so fetch functions can hand results straight
//! to the sync engine.

use ecoquest_sync::{ApiErrorBody, QueryError, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::{
    Album, Challenge, JournalEntry, LeaderboardEntry, LeaderboardPeriod, NewAlbum, NewJournalEntry,
    Packet, Profile, Task, UpdateProfile, UpdateTaskCompletion,
};
use crate::auth::AuthGate;
use crate::config::AppConfig;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Typed access to the remote API
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    auth: AuthGate,
}

impl ApiClient {
    pub fn new(config: &AppConfig, auth: AuthGate) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QueryError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, path)).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.request(Method::PATCH, path).json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::DELETE, path)).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self
            .http
            .request(method, url)
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string());
        if let Some(token) = self.auth.token() {
            request = request.header(AUTHORIZATION, AuthGate::bearer_header(&token));
        }
        request
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            warn!("Request failed before a response arrived: {}", e);
            QueryError::Transport(e.to_string())
        })?;

        let status = response.status();
        let url = response.url().path().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| QueryError::Transport(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            let error = ApiErrorBody::parse(status.as_u16(), &body).into_error(status.as_u16());
            debug!("{} -> {}", url, error);
            return Err(error);
        }

        debug!("{} -> {} ({} bytes)", url, status, body.len());
        let payload: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(payload)
            .map_err(|e| QueryError::Decode(format!("{}: {}", url, e)))
    }

    // Profile

    pub async fn profile_me(&self) -> Result<Profile> {
        self.get("/profile/me").await
    }

    pub async fn update_profile(&self, update: &UpdateProfile) -> Result<Profile> {
        self.patch("/profile/me", update).await
    }

    // Tasks and packets

    pub async fn tasks_today(&self) -> Result<Vec<Task>> {
        self.get("/tasks/today").await
    }

    pub async fn update_task_completion(&self, update: &UpdateTaskCompletion) -> Result<Task> {
        self.patch(&format!("/tasks/{}/completion", update.task_id), update)
            .await
    }

    /// The active packet; `409` means the user has none
    pub async fn my_packet(&self) -> Result<Packet> {
        self.get("/packets/me").await
    }

    // Journals

    pub async fn journals(&self) -> Result<Vec<JournalEntry>> {
        self.get("/journals").await
    }

    pub async fn journal(&self, id: i64) -> Result<JournalEntry> {
        self.get(&format!("/journals/{}", id)).await
    }

    pub async fn create_journal_entry(&self, entry: &NewJournalEntry) -> Result<JournalEntry> {
        self.post("/journals", entry).await
    }

    pub async fn delete_journal_entry(&self, id: i64) -> Result<()> {
        self.delete(&format!("/journals/{}", id)).await
    }

    // Albums

    pub async fn albums(&self) -> Result<Vec<Album>> {
        self.get("/albums").await
    }

    pub async fn album(&self, id: i64) -> Result<Album> {
        self.get(&format!("/albums/{}", id)).await
    }

    pub async fn create_album(&self, album: &NewAlbum) -> Result<Album> {
        self.post("/albums", album).await
    }

    // Leaderboard and challenges

    pub async fn leaderboard(&self, period: LeaderboardPeriod) -> Result<Vec<LeaderboardEntry>> {
        self.get(&format!("/leaderboard?period={}", period.as_str()))
            .await
    }

    pub async fn challenges(&self) -> Result<Vec<Challenge>> {
        self.get("/challenges").await
    }

    pub async fn join_challenge(&self, challenge_id: i64) -> Result<Challenge> {
        self.post(&format!("/challenges/{}/join", challenge_id), &serde_json::json!({}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalised() {
        let config = AppConfig::default().with_api_url("http://localhost:9000/api/");
        let client = ApiClient::new(&config, AuthGate::signed_out()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000/api");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Port 9 (discard) is not expected to accept HTTP connections
        let config = AppConfig::default()
            .with_api_url("http://127.0.0.1:9")
            .with_timeout(std::time::Duration::from_secs(2));
        let client = ApiClient::new(&config, AuthGate::signed_out()).unwrap();

        let err = client.profile_me().await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.is_retryable());
    }
}
