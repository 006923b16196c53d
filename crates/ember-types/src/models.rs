use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub age: u32,
    pub bio: Option<String>,
    pub is_admin: bool,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

/// A swipe verdict. Stored as lowercase text in the matches table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeAction {
    Like,
    Pass,
}

impl SwipeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Pass => "pass",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "pass" => Some(Self::Pass),
            _ => None,
        }
    }
}

/// Discovery preferences stored as JSON on the profile row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default = "default_age_min")]
    pub age_min: u32,
    #[serde(default = "default_age_max")]
    pub age_max: u32,
}

fn default_age_min() -> u32 {
    18
}

fn default_age_max() -> u32 {
    100
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            gender: None,
            age_min: default_age_min(),
            age_max: default_age_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub gender: Option<String>,
    pub preferences: Preferences,
}

/// A chat message. Both directions of a pair resolve to the same
/// conversation id (see [`crate::chat::conversation_id`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
