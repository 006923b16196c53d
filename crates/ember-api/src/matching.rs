use std::collections::HashMap;

use axum::{Extension, Json, extract::State};
use uuid::Uuid;

use ember_db::models::UserRow;
use ember_db::queries::SwipeOutcome;
use ember_types::api::{Claims, ProfileCard, SwipeRequest, SwipeResponse};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// Discovery page size.
const PAGE_SIZE: u32 = 20;

/// Candidates for the caller to swipe on: never themselves, never anyone
/// they already swiped, filtered by their stored preferences.
pub async fn discover(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ProfileCard>>> {
    let rows = {
        let state = state.clone();
        let uid = claims.sub.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<UserRow>> {
            let prefs = state
                .db
                .get_profile(&uid)?
                .map(|p| p.preferences())
                .unwrap_or_default();
            state.db.candidates(
                &uid,
                prefs.gender.as_deref(),
                prefs.age_min,
                prefs.age_max,
                PAGE_SIZE,
            )
        })
        .await??
    };

    let cards = profile_cards(&state, rows).await?;
    Ok(Json(cards))
}

/// Record a swipe. A like that completes a mutual match notifies both
/// parties' live connections before the response is returned.
pub async fn swipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SwipeRequest>,
) -> ApiResult<Json<SwipeResponse>> {
    if req.target_user_id == claims.sub {
        return Err(ApiError::validation("you cannot swipe on yourself"));
    }

    let outcome = {
        let state = state.clone();
        let uid = claims.sub.to_string();
        let target = req.target_user_id.to_string();
        tokio::task::spawn_blocking(move || state.db.record_swipe(&uid, &target, req.action))
            .await??
    };

    let matched = match outcome {
        SwipeOutcome::TargetMissing => {
            return Err(ApiError::NotFound("user not found".into()));
        }
        SwipeOutcome::Recorded { matched } => matched,
    };

    if matched {
        state
            .dispatcher
            .notify_match(claims.sub, req.target_user_id)
            .await;
    }

    Ok(Json(SwipeResponse { matched }))
}

/// Everyone mutually matched with the caller. The online badge comes
/// from the live presence registry at read time, not the stored column.
pub async fn matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ProfileCard>>> {
    let rows = {
        let state = state.clone();
        let uid = claims.sub.to_string();
        tokio::task::spawn_blocking(move || state.db.mutual_matches(&uid)).await??
    };

    let cards = profile_cards(&state, rows).await?;
    Ok(Json(cards))
}

/// Decorate user rows with profile summary, photos, and live presence.
pub(crate) async fn profile_cards(
    state: &AppState,
    rows: Vec<UserRow>,
) -> ApiResult<Vec<ProfileCard>> {
    let assembled = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<(Uuid, ProfileCard)>> {
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

            let mut photo_map: HashMap<String, Vec<String>> = HashMap::new();
            for photo in state.db.photos_for_users(&ids)? {
                photo_map
                    .entry(photo.user_id.clone())
                    .or_default()
                    .push(photo.url);
            }

            let gender_map: HashMap<String, Option<String>> = state
                .db
                .profiles_for_users(&ids)?
                .into_iter()
                .map(|p| (p.user_id.clone(), p.gender))
                .collect();

            Ok(rows
                .into_iter()
                .map(|row| {
                    let photos = photo_map.remove(&row.id).unwrap_or_default();
                    let gender = gender_map.get(&row.id).cloned().flatten();
                    let user = row.into_user();
                    (
                        user.id,
                        ProfileCard {
                            id: user.id,
                            name: user.name,
                            age: user.age,
                            bio: user.bio,
                            gender,
                            photos,
                            is_online: false,
                        },
                    )
                })
                .collect())
        })
        .await??
    };

    let presence = state.dispatcher.presence();
    let mut cards = Vec::with_capacity(assembled.len());
    for (user_id, mut card) in assembled {
        card.is_online = presence.is_online(user_id).await;
        cards.push(card);
    }
    Ok(cards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{claims_for, test_state};
    use ember_types::events::GatewayEvent;
    use ember_types::models::SwipeAction;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn add_user(state: &AppState, name: &str, age: u32) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(
                &id.to_string(),
                &format!("{name}@example.com"),
                "$argon2id$test",
                name,
                age,
                None,
                false,
            )
            .unwrap();
        id
    }

    async fn connect(state: &AppState, user: Uuid) -> UnboundedReceiver<GatewayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.dispatcher.presence().set_online(user, tx).await;
        rx
    }

    async fn do_swipe(state: &AppState, from: Uuid, to: Uuid, action: SwipeAction) -> bool {
        swipe(
            State(state.clone()),
            Extension(claims_for(from, "test")),
            Json(SwipeRequest {
                target_user_id: to,
                action,
            }),
        )
        .await
        .unwrap()
        .0
        .matched
    }

    #[tokio::test]
    async fn mutual_like_notifies_both_live_connections() {
        let state = test_state();
        let a = add_user(&state, "alice", 25);
        let b = add_user(&state, "bob", 27);
        let mut rx_a = connect(&state, a).await;
        let mut rx_b = connect(&state, b).await;

        // First like is one-sided: no match, no events.
        assert!(!do_swipe(&state, a, b, SwipeAction::Like).await);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        // Reciprocal like completes the match and rings both sides.
        assert!(do_swipe(&state, b, a, SwipeAction::Like).await);
        assert!(matches!(
            rx_a.try_recv().unwrap(),
            GatewayEvent::NewMatch { user_id } if user_id == b
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            GatewayEvent::NewMatch { user_id } if user_id == a
        ));

        // A repeated like must not re-notify.
        assert!(!do_swipe(&state, b, a, SwipeAction::Like).await);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn swiping_an_unknown_user_is_a_404() {
        let state = test_state();
        let a = add_user(&state, "alice", 25);

        let res = swipe(
            State(state.clone()),
            Extension(claims_for(a, "alice")),
            Json(SwipeRequest {
                target_user_id: Uuid::new_v4(),
                action: SwipeAction::Like,
            }),
        )
        .await;
        assert!(matches!(res.err().unwrap(), ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn matches_report_live_presence() {
        let state = test_state();
        let a = add_user(&state, "alice", 25);
        let b = add_user(&state, "bob", 27);

        do_swipe(&state, a, b, SwipeAction::Like).await;
        do_swipe(&state, b, a, SwipeAction::Like).await;

        let cards = matches(State(state.clone()), Extension(claims_for(a, "alice")))
            .await
            .unwrap()
            .0;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, b);
        assert!(!cards[0].is_online);

        let _rx = connect(&state, b).await;
        let cards = matches(State(state.clone()), Extension(claims_for(a, "alice")))
            .await
            .unwrap()
            .0;
        assert!(cards[0].is_online);
    }
}
