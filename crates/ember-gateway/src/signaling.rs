//! Call-signaling relays: request, accept, reject, ICE, hang-up.
//!
//! The server holds no call state. Each relay is a point-to-point
//! forward gated by a presence lookup; when the target is absent the
//! event is dropped and the initiating side times out client-side.
//! Payloads are never interpreted — ICE candidates pass through verbatim.

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use ember_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;

/// Ring another user. The caller's identity was resolved from the user
/// directory when the connection announced itself.
pub async fn call_request(
    dispatcher: &Dispatcher,
    caller_id: Uuid,
    caller_name: &str,
    target_user_id: Uuid,
    channel: String,
) {
    info!("{} ({}) -> call request to {}", caller_name, caller_id, target_user_id);
    let delivered = dispatcher
        .send_to_user(
            target_user_id,
            GatewayEvent::IncomingCall {
                caller_id,
                caller_name: caller_name.to_string(),
                channel,
            },
        )
        .await;
    if !delivered {
        debug!("call request to offline user {} dropped", target_user_id);
    }
}

pub async fn call_accept(dispatcher: &Dispatcher, accepter_id: Uuid, caller_id: Uuid) {
    info!("{} -> call accepted, relaying to {}", accepter_id, caller_id);
    dispatcher
        .send_to_user(caller_id, GatewayEvent::CallAccepted { accepter_id })
        .await;
}

pub async fn call_reject(dispatcher: &Dispatcher, rejecter_id: Uuid, caller_id: Uuid) {
    info!("{} -> call rejected, relaying to {}", rejecter_id, caller_id);
    dispatcher
        .send_to_user(caller_id, GatewayEvent::CallRejected { rejecter_id })
        .await;
}

pub async fn ice_candidate(
    dispatcher: &Dispatcher,
    from_user_id: Uuid,
    target_user_id: Uuid,
    candidate: Value,
) {
    debug!("{} -> ice candidate to {}", from_user_id, target_user_id);
    dispatcher
        .send_to_user(target_user_id, GatewayEvent::IceCandidate { candidate })
        .await;
}

pub async fn call_end(dispatcher: &Dispatcher, from_user_id: Uuid, target_user_id: Uuid) {
    info!("{} -> hang up, relaying to {}", from_user_id, target_user_id);
    dispatcher
        .send_to_user(target_user_id, GatewayEvent::CallEnded)
        .await;
}
