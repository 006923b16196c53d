//! Database row types — these map directly to SQLite rows.
//! Distinct from the ember-types API models; conversion helpers live here
//! so the api and gateway crates share one parsing path.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use ember_types::models::{Message, Preferences, User};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub name: String,
    pub age: u32,
    pub bio: Option<String>,
    pub is_admin: bool,
    pub is_online: bool,
    pub created_at: String,
}

pub struct ProfileRow {
    pub user_id: String,
    pub gender: Option<String>,
    pub preferences: Option<String>,
}

pub struct PhotoRow {
    pub id: i64,
    pub user_id: String,
    pub url: String,
    pub is_primary: bool,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub is_read: bool,
    pub created_at: String,
}

/// SQLite stores `datetime('now')` defaults as `YYYY-MM-DD HH:MM:SS`
/// without timezone; rows written by the server carry RFC 3339. Accept
/// both, defaulting (with a warning) on corrupt values.
pub fn parse_timestamp(raw: &str, context: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on {}: {}", raw, context, e);
            DateTime::default()
        })
}

fn parse_uuid(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}' on {}: {}", raw, context, e);
        Uuid::default()
    })
}

impl UserRow {
    pub fn into_user(self) -> User {
        let created_at = parse_timestamp(&self.created_at, &format!("user '{}'", self.id));
        User {
            id: parse_uuid(&self.id, "user"),
            email: self.email,
            name: self.name,
            age: self.age,
            bio: self.bio,
            is_admin: self.is_admin,
            is_online: self.is_online,
            created_at,
        }
    }
}

impl ProfileRow {
    /// Stored preferences, or the defaults when unset or corrupt.
    pub fn preferences(&self) -> Preferences {
        match &self.preferences {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!("Corrupt preferences on profile '{}': {}", self.user_id, e);
                Preferences::default()
            }),
            None => Preferences::default(),
        }
    }
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        let created_at = parse_timestamp(&self.created_at, &format!("message '{}'", self.id));
        Message {
            id: parse_uuid(&self.id, "message"),
            sender_id: parse_uuid(&self.sender_id, "message sender"),
            recipient_id: parse_uuid(&self.recipient_id, "message recipient"),
            conversation_id: self.conversation_id,
            body: self.body,
            is_read: self.is_read,
            created_at,
        }
    }
}
