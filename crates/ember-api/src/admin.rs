use axum::{Extension, Json, extract::State};
use anyhow::Context;
use chrono::{Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;

use ember_types::api::{
    CallTokenRequest, CallTokenResponse, Claims, UpdateVideoSettingsRequest, VideoCallSettings,
    VideoSettingsResponse,
};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

const VIDEO_SETTINGS_KEY: &str = "video_call";
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

async fn require_admin(state: &AppState, claims: &Claims) -> ApiResult<()> {
    let user = {
        let state = state.clone();
        let uid = claims.sub.to_string();
        tokio::task::spawn_blocking(move || state.db.get_user_by_id(&uid)).await??
    }
    .ok_or(ApiError::Unauthorized)?;

    if user.is_admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden("admin access required".into()))
    }
}

async fn load_settings(state: &AppState) -> ApiResult<Option<VideoCallSettings>> {
    let raw = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.db.get_setting(VIDEO_SETTINGS_KEY)).await??
    };

    match raw {
        Some(raw) => {
            let settings = serde_json::from_str(&raw)
                .context("corrupt video-call settings in database")
                .map_err(ApiError::Internal)?;
            Ok(Some(settings))
        }
        None => Ok(None),
    }
}

/// Current provider configuration. The certificate is write-only and is
/// never echoed back.
pub async fn get_video_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<VideoSettingsResponse>> {
    require_admin(&state, &claims).await?;

    let response = match load_settings(&state).await? {
        Some(settings) => VideoSettingsResponse {
            configured: true,
            app_id: Some(settings.app_id),
            token_ttl_secs: Some(settings.token_ttl_secs),
        },
        None => VideoSettingsResponse {
            configured: false,
            app_id: None,
            token_ttl_secs: None,
        },
    };

    Ok(Json(response))
}

pub async fn update_video_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateVideoSettingsRequest>,
) -> ApiResult<Json<VideoSettingsResponse>> {
    require_admin(&state, &claims).await?;

    if req.app_id.trim().is_empty() {
        return Err(ApiError::field("app_id", "app id is required"));
    }
    if req.app_certificate.trim().is_empty() {
        return Err(ApiError::field("app_certificate", "app certificate is required"));
    }

    let settings = VideoCallSettings {
        app_id: req.app_id,
        app_certificate: req.app_certificate,
        token_ttl_secs: req.token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
    };

    {
        let state = state.clone();
        let value = serde_json::to_string(&settings)
            .context("serialize video-call settings")
            .map_err(ApiError::Internal)?;
        tokio::task::spawn_blocking(move || state.db.set_setting(VIDEO_SETTINGS_KEY, &value))
            .await??;
    }

    Ok(Json(VideoSettingsResponse {
        configured: true,
        app_id: Some(settings.app_id),
        token_ttl_secs: Some(settings.token_ttl_secs),
    }))
}

/// Short-lived token for joining a call channel. Available to any
/// authenticated user once the provider is configured.
pub async fn call_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CallTokenRequest>,
) -> ApiResult<Json<CallTokenResponse>> {
    let channel = req.channel.trim().to_string();
    if channel.is_empty() {
        return Err(ApiError::field("channel", "channel name is required"));
    }

    let settings = load_settings(&state)
        .await?
        .ok_or_else(|| ApiError::NotFound("video calling is not configured".into()))?;

    let token: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    Ok(Json(CallTokenResponse {
        app_id: settings.app_id,
        token,
        channel,
        uid: claims.sub,
        expires_at: Utc::now() + Duration::seconds(settings.token_ttl_secs as i64),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{claims_for, test_state};
    use uuid::Uuid;

    fn add_user(state: &AppState, name: &str, is_admin: bool) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(
                &id.to_string(),
                &format!("{name}@example.com"),
                "$argon2id$test",
                name,
                30,
                None,
                is_admin,
            )
            .unwrap();
        id
    }

    fn settings_req() -> UpdateVideoSettingsRequest {
        UpdateVideoSettingsRequest {
            app_id: "app-123".into(),
            app_certificate: "cert-456".into(),
            token_ttl_secs: None,
        }
    }

    #[tokio::test]
    async fn settings_are_admin_only() {
        let state = test_state();
        let user = add_user(&state, "alice", false);

        let res = update_video_settings(
            State(state.clone()),
            Extension(claims_for(user, "alice")),
            Json(settings_req()),
        )
        .await;
        assert!(matches!(res.err().unwrap(), ApiError::Forbidden(_)));

        let res =
            get_video_settings(State(state), Extension(claims_for(user, "alice"))).await;
        assert!(matches!(res.err().unwrap(), ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn settings_round_trip_never_leaks_the_certificate() {
        let state = test_state();
        let admin = add_user(&state, "root", true);

        let res = get_video_settings(State(state.clone()), Extension(claims_for(admin, "root")))
            .await
            .unwrap()
            .0;
        assert!(!res.configured);

        update_video_settings(
            State(state.clone()),
            Extension(claims_for(admin, "root")),
            Json(settings_req()),
        )
        .await
        .unwrap();

        let res = get_video_settings(State(state.clone()), Extension(claims_for(admin, "root")))
            .await
            .unwrap()
            .0;
        assert!(res.configured);
        assert_eq!(res.app_id.as_deref(), Some("app-123"));
        assert_eq!(res.token_ttl_secs, Some(DEFAULT_TOKEN_TTL_SECS));

        let body = serde_json::to_value(&res).unwrap();
        assert!(body.get("app_certificate").is_none());
        assert!(!body.to_string().contains("cert-456"));
    }

    #[tokio::test]
    async fn call_tokens_require_configuration() {
        let state = test_state();
        let admin = add_user(&state, "root", true);
        let user = add_user(&state, "alice", false);

        let res = call_token(
            State(state.clone()),
            Extension(claims_for(user, "alice")),
            Json(CallTokenRequest {
                channel: "call_a_b".into(),
            }),
        )
        .await;
        assert!(matches!(res.err().unwrap(), ApiError::NotFound(_)));

        update_video_settings(
            State(state.clone()),
            Extension(claims_for(admin, "root")),
            Json(settings_req()),
        )
        .await
        .unwrap();

        let res = call_token(
            State(state.clone()),
            Extension(claims_for(user, "alice")),
            Json(CallTokenRequest {
                channel: "call_a_b".into(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(res.app_id, "app-123");
        assert_eq!(res.channel, "call_a_b");
        assert_eq!(res.uid, user);
        assert!(res.expires_at > Utc::now());
        assert_eq!(res.token.len(), 32);
    }

    #[tokio::test]
    async fn blank_channel_is_a_422() {
        let state = test_state();
        let user = add_user(&state, "alice", false);

        let res = call_token(
            State(state),
            Extension(claims_for(user, "alice")),
            Json(CallTokenRequest { channel: "  ".into() }),
        )
        .await;
        assert!(matches!(
            res.err().unwrap(),
            ApiError::Validation { field: Some(f), .. } if f == "channel"
        ));
    }
}
