//! Payloads exchanged with the EcoQuest API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The signed-in user's profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub streak_days: u32,
}

/// A daily eco task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub completed: bool,
}

/// The user's active task packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Completed share of the packet, 0.0 - 1.0
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Packet {
    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.completed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: i64,
    pub username: String,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reward_points: i64,
    #[serde(default)]
    pub participants: u32,
    #[serde(default)]
    pub joined: bool,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

/// Ranking window of the leaderboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    Daily,
    #[default]
    Weekly,
    Monthly,
    AllTime,
}

impl LeaderboardPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderboardPeriod::Daily => "daily",
            LeaderboardPeriod::Weekly => "weekly",
            LeaderboardPeriod::Monthly => "monthly",
            LeaderboardPeriod::AllTime => "all_time",
        }
    }
}

impl fmt::Display for LeaderboardPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaderboardPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "daily" => Ok(LeaderboardPeriod::Daily),
            "weekly" => Ok(LeaderboardPeriod::Weekly),
            "monthly" => Ok(LeaderboardPeriod::Monthly),
            "all_time" | "alltime" => Ok(LeaderboardPeriod::AllTime),
            other => Err(format!("unknown leaderboard period: {}", other)),
        }
    }
}

/// Partial profile update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UpdateProfile {
    /// Apply the update to a cached profile
    pub fn apply_to(&self, profile: &Profile) -> Profile {
        let mut next = profile.clone();
        if let Some(display_name) = &self.display_name {
            next.display_name = Some(display_name.clone());
        }
        if let Some(bio) = &self.bio {
            next.bio = Some(bio.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            next.avatar_url = Some(avatar_url.clone());
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTaskCompletion {
    #[serde(default, skip_serializing)]
    pub task_id: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlbum {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinChallenge {
    pub challenge_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_defaults() {
        let task: Task = serde_json::from_value(json!({ "id": 5, "title": "Cycle to work" })).unwrap();
        assert!(!task.completed);
        assert_eq!(task.points, 0);
        assert!(task.description.is_none());
    }

    #[test]
    fn test_packet_progress() {
        let packet: Packet = serde_json::from_value(json!({
            "id": 1,
            "title": "Zero waste week",
            "tasks": [
                { "id": 1, "title": "a", "completed": true },
                { "id": 2, "title": "b" }
            ],
            "progress": 0.5
        }))
        .unwrap();
        assert_eq!(packet.completed_count(), 1);
        assert!(packet.expires_at.is_none());
    }

    #[test]
    fn test_leaderboard_period() {
        assert_eq!("weekly".parse::<LeaderboardPeriod>().unwrap(), LeaderboardPeriod::Weekly);
        assert_eq!("all-time".parse::<LeaderboardPeriod>().unwrap(), LeaderboardPeriod::AllTime);
        assert!("yearly".parse::<LeaderboardPeriod>().is_err());
        assert_eq!(LeaderboardPeriod::default().to_string(), "weekly");
        assert_eq!(
            serde_json::to_string(&LeaderboardPeriod::AllTime).unwrap(),
            "\"all_time\""
        );
    }

    #[test]
    fn test_update_profile_serializes_only_set_fields() {
        let update = UpdateProfile {
            bio: Some("Composting enthusiast".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "bio": "Composting enthusiast" })
        );
    }

    #[test]
    fn test_update_profile_apply() {
        let profile = Profile {
            id: 1,
            username: "ada".to_string(),
            display_name: None,
            bio: Some("old".to_string()),
            avatar_url: None,
            points: 10,
            level: 1,
            streak_days: 0,
        };
        let update = UpdateProfile {
            display_name: Some("Ada".to_string()),
            ..Default::default()
        };
        let next = update.apply_to(&profile);
        assert_eq!(next.display_name.as_deref(), Some("Ada"));
        assert_eq!(next.bio.as_deref(), Some("old"));
    }

    #[test]
    fn test_task_completion_body() {
        let body = UpdateTaskCompletion {
            task_id: 5,
            completed: true,
        };
        assert_eq!(serde_json::to_value(body).unwrap(), json!({ "completed": true }));
    }
}
