use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Preferences, SwipeAction};

// -- JWT Claims --

/// JWT claims shared across ember-api (REST middleware) and ember-gateway.
/// Canonical definition lives here in ember-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub age: u32,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// A user as returned to clients — never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub age: u32,
    pub bio: Option<String>,
    pub is_admin: bool,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
    pub photos: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

// -- Profiles --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Serialize)]
pub struct PhotoUploadResponse {
    pub photo_url: String,
}

// -- Matching --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwipeRequest {
    pub target_user_id: Uuid,
    pub action: SwipeAction,
}

#[derive(Debug, Serialize)]
pub struct SwipeResponse {
    #[serde(rename = "match")]
    pub matched: bool,
}

/// Profile summary shown on discovery cards and in the match list.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileCard {
    pub id: Uuid,
    pub name: String,
    pub age: u32,
    pub bio: Option<String>,
    pub gender: Option<String>,
    pub photos: Vec<String>,
    pub is_online: bool,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub user: ProfileCard,
    pub last_message: Option<Message>,
    pub unread_count: u32,
}

// -- Admin video-call settings --

/// Provider configuration stored under the `video_call` settings key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoCallSettings {
    pub app_id: String,
    pub app_certificate: String,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateVideoSettingsRequest {
    pub app_id: String,
    pub app_certificate: String,
    #[serde(default)]
    pub token_ttl_secs: Option<u64>,
}

/// The certificate is write-only: it never appears in responses.
#[derive(Debug, Serialize)]
pub struct VideoSettingsResponse {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallTokenRequest {
    pub channel: String,
}

#[derive(Debug, Serialize)]
pub struct CallTokenResponse {
    pub app_id: String,
    pub token: String,
    pub channel: String,
    pub uid: Uuid,
    pub expires_at: DateTime<Utc>,
}
