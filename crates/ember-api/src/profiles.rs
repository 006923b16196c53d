use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use ember_types::api::{Claims, PhotoUploadResponse, UpdateProfileRequest};
use ember_types::models::Profile;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// Partial profile update: absent fields keep their stored values.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<Profile>> {
    if let Some(bio) = &req.bio {
        if bio.len() > 1000 {
            return Err(ApiError::field("bio", "bio must be at most 1000 characters"));
        }
    }
    if let Some(gender) = &req.gender {
        if gender.trim().is_empty() || gender.len() > 32 {
            return Err(ApiError::field("gender", "gender must be 1-32 characters"));
        }
    }
    if let Some(prefs) = &req.preferences {
        if prefs.age_min < 18 || prefs.age_min > prefs.age_max {
            return Err(ApiError::field(
                "preferences",
                "age range must start at 18 or above and not be inverted",
            ));
        }
    }

    let profile = {
        let state = state.clone();
        let uid = claims.sub.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Profile> {
            if let Some(bio) = &req.bio {
                state.db.update_bio(&uid, bio)?;
            }

            let preferences_json = match &req.preferences {
                Some(prefs) => Some(serde_json::to_string(prefs)?),
                None => None,
            };
            state
                .db
                .upsert_profile(&uid, req.gender.as_deref(), preferences_json.as_deref())?;

            let row = state
                .db
                .get_profile(&uid)?
                .ok_or_else(|| anyhow::anyhow!("profile row vanished after upsert"))?;
            let preferences = row.preferences();
            Ok(Profile {
                user_id: claims.sub,
                gender: row.gender,
                preferences,
            })
        })
        .await??
    };

    Ok(Json(profile))
}

/// Multipart photo upload. The file lands in the uploads directory under
/// a timestamped random name and is served back at /uploads/{name}.
pub async fn upload_photo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("photo") {
            continue;
        }

        let ext = field
            .file_name()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "jpg".into());

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("failed to read upload: {e}")))?;
        if data.is_empty() {
            return Err(ApiError::field("photo", "uploaded file is empty"));
        }

        let filename = format!(
            "{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            rand::random::<u32>(),
            ext
        );
        let path = state.uploads_dir.join(&filename);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to store photo: {e}")))?;

        let url = format!("/uploads/{filename}");
        let photo = {
            let state = state.clone();
            let uid = claims.sub.to_string();
            tokio::task::spawn_blocking(move || state.db.add_photo(&uid, &url)).await??
        };

        return Ok((
            StatusCode::CREATED,
            Json(PhotoUploadResponse {
                photo_url: photo.url,
            }),
        ));
    }

    Err(ApiError::field("photo", "multipart field 'photo' is required"))
}

/// Promote one of the caller's photos to primary.
pub async fn set_primary_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    ensure_photo_owner(&state, photo_id, claims.sub).await?;

    {
        let state = state.clone();
        let uid = claims.sub.to_string();
        tokio::task::spawn_blocking(move || state.db.set_primary_photo(&uid, photo_id)).await??;
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let photo = ensure_photo_owner(&state, photo_id, claims.sub).await?;

    {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.db.delete_photo(photo_id)).await??;
    }

    // Best effort: the row is gone either way.
    if let Some(filename) = photo.url.strip_prefix("/uploads/") {
        let path = state.uploads_dir.join(filename);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Could not remove photo file {}: {}", path.display(), e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_photo_owner(
    state: &AppState,
    photo_id: i64,
    user_id: Uuid,
) -> ApiResult<ember_db::models::PhotoRow> {
    let photo = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.db.get_photo(photo_id)).await??
    }
    .ok_or_else(|| ApiError::NotFound("photo not found".into()))?;

    if photo.user_id != user_id.to_string() {
        return Err(ApiError::Forbidden(
            "cannot modify another user's photo".into(),
        ));
    }
    Ok(photo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{claims_for, test_state};
    use ember_types::models::Preferences;

    fn add_user(state: &AppState, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(
                &id.to_string(),
                &format!("{name}@example.com"),
                "$argon2id$test",
                name,
                25,
                None,
                false,
            )
            .unwrap();
        id
    }

    #[tokio::test]
    async fn profile_update_is_partial() {
        let state = test_state();
        let a = add_user(&state, "alice");

        let profile = update_profile(
            State(state.clone()),
            Extension(claims_for(a, "alice")),
            Json(UpdateProfileRequest {
                bio: None,
                gender: Some("female".into()),
                preferences: Some(Preferences {
                    gender: Some("male".into()),
                    age_min: 21,
                    age_max: 35,
                }),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(profile.gender.as_deref(), Some("female"));
        assert_eq!(profile.preferences.age_min, 21);

        // A later update without gender keeps the stored one.
        let profile = update_profile(
            State(state.clone()),
            Extension(claims_for(a, "alice")),
            Json(UpdateProfileRequest {
                bio: Some("hi there".into()),
                gender: None,
                preferences: None,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(profile.gender.as_deref(), Some("female"));
        assert_eq!(profile.preferences.age_max, 35);
    }

    #[tokio::test]
    async fn inverted_age_window_is_rejected() {
        let state = test_state();
        let a = add_user(&state, "alice");

        let res = update_profile(
            State(state),
            Extension(claims_for(a, "alice")),
            Json(UpdateProfileRequest {
                bio: None,
                gender: None,
                preferences: Some(Preferences {
                    gender: None,
                    age_min: 40,
                    age_max: 20,
                }),
            }),
        )
        .await;
        assert!(matches!(
            res.err().unwrap(),
            ApiError::Validation { field: Some(f), .. } if f == "preferences"
        ));
    }

    #[tokio::test]
    async fn photos_are_owner_only() {
        let state = test_state();
        let a = add_user(&state, "alice");
        let b = add_user(&state, "bob");

        let photo = state
            .db
            .add_photo(&a.to_string(), "/uploads/test.jpg")
            .unwrap();

        let res = delete_photo(
            State(state.clone()),
            Path(photo.id),
            Extension(claims_for(b, "bob")),
        )
        .await;
        assert!(matches!(res.err().unwrap(), ApiError::Forbidden(_)));

        let res = delete_photo(
            State(state.clone()),
            Path(photo.id),
            Extension(claims_for(a, "alice")),
        )
        .await;
        assert!(res.is_ok());
        assert!(state.db.get_photo(photo.id).unwrap().is_none());
    }
}
