pub mod api;
pub mod auth;
pub mod config;
pub mod hooks;
pub mod keys;

pub use api::{
    Album, ApiClient, Challenge, JoinChallenge, JournalEntry, LeaderboardEntry, LeaderboardPeriod,
    NewAlbum, NewJournalEntry, Packet, Photo, Profile, Task, UpdateProfile, UpdateTaskCompletion,
};
pub use auth::{AuthGate, Claims};
pub use config::{AppConfig, ConfigError};
pub use hooks::{completion, EcoQuest, PacketState};
