use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use ember_db::models::{MessageRow, UserRow};
use ember_types::api::{Claims, ConversationSummary, SendMessageRequest};
use ember_types::chat::conversation_id;
use ember_types::events::GatewayEvent;
use ember_types::models::Message;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::matching::profile_cards;

const MAX_MESSAGE_LEN: usize = 1000;

/// Messaging requires a mutual match. This guard runs before any message
/// row is read or written.
async fn ensure_matched(state: &AppState, me: Uuid, other: Uuid) -> ApiResult<()> {
    let matched = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || {
            state.db.is_mutual_match(&me.to_string(), &other.to_string())
        })
        .await??
    };

    if matched {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "you must match with this user before messaging".into(),
        ))
    }
}

async fn ensure_user_exists(state: &AppState, user_id: Uuid) -> ApiResult<()> {
    let exists = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.db.get_user_by_id(&user_id.to_string()))
            .await??
            .is_some()
    };

    if exists {
        Ok(())
    } else {
        Err(ApiError::NotFound("user not found".into()))
    }
}

/// History with another user, oldest first. Fetching marks the caller's
/// incoming messages as read; the returned payload still shows the flags
/// as they were at read time.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Message>>> {
    ensure_user_exists(&state, user_id).await?;
    ensure_matched(&state, claims.sub, user_id).await?;

    let cid = conversation_id(claims.sub, user_id);
    let rows = {
        let state = state.clone();
        let cid = cid.clone();
        let me = claims.sub.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<MessageRow>> {
            let rows = state.db.messages_for_conversation(&cid)?;
            state.db.mark_read(&cid, &me)?;
            Ok(rows)
        })
        .await??
    };

    let messages = rows.into_iter().map(|row| row.into_message()).collect();
    Ok(Json(messages))
}

/// Send a message to a matched user. The stored message is also pushed
/// to the conversation's live broadcast group.
pub async fn send_message(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let body = req.body.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::field("body", "message body must not be empty"));
    }
    if body.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::field(
            "body",
            format!("message body must be at most {MAX_MESSAGE_LEN} characters"),
        ));
    }

    ensure_user_exists(&state, user_id).await?;
    ensure_matched(&state, claims.sub, user_id).await?;

    let message = Message {
        id: Uuid::new_v4(),
        conversation_id: conversation_id(claims.sub, user_id),
        sender_id: claims.sub,
        recipient_id: user_id,
        body,
        is_read: false,
        created_at: Utc::now(),
    };

    {
        let state = state.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || {
            state.db.insert_message(
                &message.id.to_string(),
                &message.conversation_id,
                &message.sender_id.to_string(),
                &message.recipient_id.to_string(),
                &message.body,
                &message.created_at.to_rfc3339(),
            )
        })
        .await??;
    }

    state
        .dispatcher
        .broadcast_chat(
            &message.conversation_id,
            GatewayEvent::NewMessage {
                message: message.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Flag everything the other user sent in this conversation as read.
/// Idempotent.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let cid = conversation_id(claims.sub, user_id);
    let updated = {
        let state = state.clone();
        let me = claims.sub.to_string();
        tokio::task::spawn_blocking(move || state.db.mark_read(&cid, &me)).await??
    };

    Ok(Json(json!({ "updated": updated })))
}

/// Everyone the caller has exchanged messages with, newest activity
/// first, with unread counts.
pub async fn conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let me = claims.sub;
    let raw = {
        let state = state.clone();
        tokio::task::spawn_blocking(
            move || -> anyhow::Result<Vec<(UserRow, Option<MessageRow>, u32)>> {
                let partners = state.db.conversation_partner_ids(&me.to_string())?;
                let mut out = Vec::with_capacity(partners.len());
                for pid in partners {
                    let Some(user) = state.db.get_user_by_id(&pid)? else {
                        continue;
                    };
                    let Ok(partner_id) = pid.parse::<Uuid>() else {
                        continue;
                    };
                    let cid = conversation_id(me, partner_id);
                    let last = state.db.last_message(&cid)?;
                    let unread = state.db.unread_count(&cid, &me.to_string())?;
                    out.push((user, last, unread));
                }
                Ok(out)
            },
        )
        .await??
    };

    let (users, meta): (Vec<UserRow>, Vec<(Option<MessageRow>, u32)>) = raw
        .into_iter()
        .map(|(user, last, unread)| (user, (last, unread)))
        .unzip();

    let cards = profile_cards(&state, users).await?;
    let mut summaries: Vec<ConversationSummary> = cards
        .into_iter()
        .zip(meta)
        .map(|(user, (last, unread_count))| ConversationSummary {
            user,
            last_message: last.map(|row| row.into_message()),
            unread_count,
        })
        .collect();

    summaries.sort_by(|x, y| {
        let x_at = x.last_message.as_ref().map(|m| m.created_at);
        let y_at = y.last_message.as_ref().map(|m| m.created_at);
        y_at.cmp(&x_at)
    });

    Ok(Json(summaries))
}
