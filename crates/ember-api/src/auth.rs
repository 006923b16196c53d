use std::path::PathBuf;
use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use ember_db::Database;
use ember_db::models::UserRow;
use ember_gateway::dispatcher::Dispatcher;
use ember_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest, UserResponse};

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub uploads_dir: PathBuf,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    // Validate input
    if !req.email.contains('@') || req.email.len() > 255 {
        return Err(ApiError::field("email", "a valid email address is required"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::field(
            "password",
            "password must be at least 8 characters",
        ));
    }
    if req.name.trim().is_empty() || req.name.len() > 100 {
        return Err(ApiError::field("name", "name is required"));
    }
    if req.age < 18 {
        return Err(ApiError::field("age", "you must be at least 18"));
    }

    // Check if the email is taken
    if state
        .db
        .get_user_by_email(&req.email)?
        .is_some()
    {
        return Err(ApiError::Conflict("an account with this email already exists".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?
        .to_string();

    let user_id = Uuid::new_v4();

    state.db.create_user(
        &user_id.to_string(),
        &req.email,
        &password_hash,
        req.name.trim(),
        req.age,
        req.bio.as_deref(),
        false,
    )?;

    // Every account starts with an empty profile row
    state.db.upsert_profile(&user_id.to_string(), None, None)?;

    let token = create_token(&state.jwt_secret, user_id, req.name.trim())?;

    let user = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("freshly created user vanished")))?;
    let user = user_response(&state.db, user)?;

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .db
        .get_user_by_email(&req.email)?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {e}")))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id: {e}")))?;

    let token = create_token(&state.jwt_secret, user_id, &user.name)?;
    let user = user_response(&state.db, user)?;

    Ok(Json(AuthResponse { token, user }))
}

/// The authenticated user's own record.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    Ok(Json(user_response(&state.db, user)?))
}

pub(crate) fn user_response(db: &Database, row: UserRow) -> ApiResult<UserResponse> {
    let photos = db
        .photos_for_user(&row.id)?
        .into_iter()
        .map(|p| p.url)
        .collect();

    let user = row.into_user();
    Ok(UserResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        age: user.age,
        bio: user.bio,
        is_admin: user.is_admin,
        is_online: user.is_online,
        created_at: user.created_at,
        photos,
    })
}

fn create_token(secret: &str, user_id: Uuid, name: &str) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::Error::new(e)))?;

    Ok(token)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ember_gateway::presence::PresenceRegistry;

    pub(crate) fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(PresenceRegistry::new()),
            uploads_dir: std::env::temp_dir(),
        })
    }

    pub(crate) fn claims_for(user_id: Uuid, name: &str) -> Claims {
        Claims {
            sub: user_id,
            name: name.to_string(),
            exp: usize::MAX,
        }
    }

    fn register_req(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "hunter2hunter2".to_string(),
            name: "Alice".to_string(),
            age: 25,
            bio: None,
        }
    }

    #[tokio::test]
    async fn register_then_login_round_trip() {
        let state = test_state();

        let res = register(State(state.clone()), Json(register_req("a@example.com"))).await;
        assert!(res.is_ok());

        let res = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "a@example.com".into(),
                password: "hunter2hunter2".into(),
            }),
        )
        .await;
        assert!(res.is_ok());

        let res = login(
            State(state),
            Json(LoginRequest {
                email: "a@example.com".into(),
                password: "wrong-password".into(),
            }),
        )
        .await;
        assert!(matches!(res.err().unwrap(), ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let state = test_state();

        register(State(state.clone()), Json(register_req("a@example.com")))
            .await
            .ok()
            .unwrap();
        let res = register(State(state), Json(register_req("a@example.com"))).await;
        assert!(matches!(res.err().unwrap(), ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn underage_registration_is_rejected() {
        let state = test_state();
        let mut req = register_req("kid@example.com");
        req.age = 17;

        let res = register(State(state), Json(req)).await;
        match res.err().unwrap() {
            ApiError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("age")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
