//! In-process fake of the EcoQuest API for integration tests

#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use ecoquest::{
    AppConfig, Challenge, EcoQuest, JournalEntry, LeaderboardEntry, NewAlbum, NewJournalEntry, Packet,
    Profile, Task, UpdateProfile, UpdateTaskCompletion,
};
use ecoquest_sync::SyncConfig;

pub const TOKEN: &str = "test-token-123";

#[derive(Default)]
pub struct FakeApi {
    hits: Mutex<HashMap<&'static str, usize>>,
    pub authorization: Mutex<Vec<Option<String>>>,
    pub request_ids: Mutex<Vec<String>>,
    pub periods: Mutex<Vec<String>>,
    pub profile: Mutex<Option<Profile>>,
    pub tasks: Mutex<Vec<Task>>,
    pub packet: Mutex<Option<Packet>>,
    pub journals: Mutex<Vec<JournalEntry>>,
    pub challenges: Mutex<Vec<Challenge>>,
    /// Number of upcoming profile requests answered with 503
    pub profile_failures: AtomicUsize,
    pub fail_completion: AtomicBool,
    /// When set, task completion waits for a notification before answering
    pub completion_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        let api = Self::default();
        *api.profile.lock().unwrap() = Some(profile());
        Arc::new(api)
    }

    pub fn hits(&self, route: &'static str) -> usize {
        self.hits.lock().unwrap().get(route).copied().unwrap_or(0)
    }

    fn record(&self, route: &'static str, headers: &HeaderMap) {
        *self.hits.lock().unwrap().entry(route).or_insert(0) += 1;
        self.authorization.lock().unwrap().push(
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
        if let Some(id) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
            self.request_ids.lock().unwrap().push(id.to_string());
        }
    }
}

pub fn profile() -> Profile {
    Profile {
        id: 1,
        username: "ada".to_string(),
        display_name: Some("Ada".to_string()),
        bio: None,
        avatar_url: None,
        points: 120,
        level: 3,
        streak_days: 4,
    }
}

pub fn task(id: i64, completed: bool) -> Task {
    Task {
        id,
        title: format!("Task {}", id),
        description: None,
        points: 10,
        completed,
    }
}

pub fn journal(id: i64, title: &str) -> JournalEntry {
    JournalEntry {
        id,
        title: title.to_string(),
        content: String::new(),
        mood: None,
        photo_urls: Vec::new(),
        created_at: Utc::now(),
    }
}

pub fn challenge(id: i64) -> Challenge {
    Challenge {
        id,
        title: format!("Challenge {}", id),
        description: None,
        reward_points: 50,
        participants: 7,
        joined: false,
        ends_at: None,
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "message": message, "status": status.as_u16() })),
    )
        .into_response()
}

type Shared = Arc<FakeApi>;

async fn get_profile(State(api): State<Shared>, headers: HeaderMap) -> Response {
    api.record("profile", &headers);
    let remaining = api.profile_failures.load(Ordering::SeqCst);
    if remaining > 0 {
        api.profile_failures.store(remaining - 1, Ordering::SeqCst);
        return error(StatusCode::SERVICE_UNAVAILABLE, "try again later");
    }
    match api.profile.lock().unwrap().clone() {
        Some(profile) => Json(profile).into_response(),
        None => error(StatusCode::NOT_FOUND, "profile not found"),
    }
}

async fn patch_profile(
    State(api): State<Shared>,
    headers: HeaderMap,
    Json(update): Json<UpdateProfile>,
) -> Response {
    api.record("update_profile", &headers);
    let mut guard = api.profile.lock().unwrap();
    match guard.as_ref() {
        Some(current) => {
            let next = update.apply_to(current);
            *guard = Some(next.clone());
            Json(next).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "profile not found"),
    }
}

async fn tasks_today(State(api): State<Shared>, headers: HeaderMap) -> Response {
    api.record("tasks", &headers);
    Json(api.tasks.lock().unwrap().clone()).into_response()
}

async fn task_completion(
    State(api): State<Shared>,
    Path(task_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<UpdateTaskCompletion>,
) -> Response {
    api.record("completion", &headers);
    let gate = api.completion_gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
    if api.fail_completion.load(Ordering::SeqCst) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "database unavailable");
    }
    let mut tasks = api.tasks.lock().unwrap();
    match tasks.iter_mut().find(|task| task.id == task_id) {
        Some(task) => {
            task.completed = body.completed;
            Json(task.clone()).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "task not found"),
    }
}

async fn my_packet(State(api): State<Shared>, headers: HeaderMap) -> Response {
    api.record("packet", &headers);
    match api.packet.lock().unwrap().clone() {
        Some(packet) => Json(packet).into_response(),
        None => error(StatusCode::CONFLICT, "no active packet"),
    }
}

async fn list_journals(State(api): State<Shared>, headers: HeaderMap) -> Response {
    api.record("journals", &headers);
    Json(api.journals.lock().unwrap().clone()).into_response()
}

async fn create_journal(
    State(api): State<Shared>,
    headers: HeaderMap,
    Json(entry): Json<NewJournalEntry>,
) -> Response {
    api.record("create_journal", &headers);
    if entry.title.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "message": "validation failed",
                "status": 422,
                "errors": { "title": ["can't be blank"] }
            })),
        )
            .into_response();
    }
    let mut journals = api.journals.lock().unwrap();
    let id = journals.iter().map(|j| j.id).max().unwrap_or(0) + 1;
    let created = JournalEntry {
        id,
        title: entry.title,
        content: entry.content,
        mood: entry.mood,
        photo_urls: entry.photo_urls,
        created_at: Utc::now(),
    };
    journals.insert(0, created.clone());
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn delete_journal(State(api): State<Shared>, Path(id): Path<i64>, headers: HeaderMap) -> Response {
    api.record("delete_journal", &headers);
    let mut journals = api.journals.lock().unwrap();
    let before = journals.len();
    journals.retain(|j| j.id != id);
    if journals.len() == before {
        return error(StatusCode::NOT_FOUND, "journal not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn list_albums(State(api): State<Shared>, headers: HeaderMap) -> Response {
    api.record("albums", &headers);
    Json(json!([])).into_response()
}

async fn get_album(State(api): State<Shared>, Path(id): Path<i64>, headers: HeaderMap) -> Response {
    api.record("album", &headers);
    match id {
        // Malformed payload
        13 => Json(json!({ "id": "thirteen" })).into_response(),
        _ => (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response(),
    }
}

async fn create_album(State(api): State<Shared>, headers: HeaderMap, Json(album): Json<NewAlbum>) -> Response {
    api.record("create_album", &headers);
    Json(json!({
        "id": 40,
        "title": album.title,
        "description": album.description,
        "photos": [],
        "created_at": Utc::now(),
    }))
    .into_response()
}

async fn leaderboard(
    State(api): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    api.record("leaderboard", &headers);
    api.periods
        .lock()
        .unwrap()
        .push(params.get("period").cloned().unwrap_or_default());
    Json(vec![LeaderboardEntry {
        rank: 1,
        user_id: 9,
        username: "grace".to_string(),
        points: 900,
    }])
    .into_response()
}

async fn list_challenges(State(api): State<Shared>, headers: HeaderMap) -> Response {
    api.record("challenges", &headers);
    Json(api.challenges.lock().unwrap().clone()).into_response()
}

async fn join_challenge(State(api): State<Shared>, Path(id): Path<i64>, headers: HeaderMap) -> Response {
    api.record("join", &headers);
    let mut challenges = api.challenges.lock().unwrap();
    match challenges.iter_mut().find(|c| c.id == id) {
        Some(challenge) => {
            if !challenge.joined {
                challenge.joined = true;
                challenge.participants += 1;
            }
            Json(challenge.clone()).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "challenge not found"),
    }
}

/// Serve the fake API on an ephemeral port and return its base URL
pub async fn start(api: Shared) -> String {
    let app = Router::new()
        .route("/profile/me", get(get_profile).patch(patch_profile))
        .route("/tasks/today", get(tasks_today))
        .route("/tasks/:id/completion", patch(task_completion))
        .route("/packets/me", get(my_packet))
        .route("/journals", get(list_journals).post(create_journal))
        .route("/journals/:id", axum::routing::delete(delete_journal))
        .route("/albums", get(list_albums).post(create_album))
        .route("/albums/:id", get(get_album))
        .route("/leaderboard", get(leaderboard))
        .route("/challenges", get(list_challenges))
        .route("/challenges/:id/join", post(join_challenge))
        .with_state(api);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Application wired to the fake API
pub fn app(base_url: &str, token: Option<&str>, sync: SyncConfig) -> EcoQuest {
    let mut config = AppConfig::default().with_api_url(base_url).with_sync(sync);
    if let Some(token) = token {
        config = config.with_token(token);
    }
    config.validate().unwrap();
    EcoQuest::new(&config).unwrap()
}

/// Retries enabled with millisecond backoff
pub fn retrying_sync() -> SyncConfig {
    SyncConfig::builder()
        .max_retries(3)
        .retry_delay(
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(5),
        )
        .build()
}
