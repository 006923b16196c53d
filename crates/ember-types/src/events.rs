use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::Message;

/// Commands sent FROM client TO server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Announce the connection's user. Must be the first command; the
    /// server registers presence and replies with Ready.
    UserOnline { user_id: Uuid },

    /// Subscribe this connection to a conversation's broadcast group.
    JoinChat { conversation_id: String },

    /// Persist a chat message and deliver it to the conversation group.
    SendMessage {
        conversation_id: String,
        sender_id: Uuid,
        body: String,
    },

    /// Request the full history of a conversation. The reply goes to the
    /// requesting connection only.
    GetMessages { conversation_id: String },

    /// Ask the server to ring another user.
    CallRequest { target_user_id: Uuid, channel: String },

    /// Accept an incoming call; relayed back to the caller.
    CallAccept { caller_id: Uuid },

    /// Reject an incoming call; relayed back to the caller.
    CallReject { caller_id: Uuid },

    /// Forward an ICE candidate to the peer. The payload is opaque.
    IceCandidate { target_user_id: Uuid, candidate: Value },

    /// Hang up; the peer tears down its media independently.
    CallEnd { target_user_id: Uuid },
}

/// Events sent FROM server TO clients over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// The announcement was accepted and presence is registered.
    Ready { user_id: Uuid },

    /// A message was stored and is being delivered to the conversation
    /// group, sender included.
    NewMessage { message: Message },

    /// Reply to GetMessages: the conversation history in send order.
    ChatMessages {
        conversation_id: String,
        messages: Vec<Message>,
    },

    /// A like just completed a mutual match with this user.
    NewMatch { user_id: Uuid },

    /// Another user is calling.
    IncomingCall {
        caller_id: Uuid,
        caller_name: String,
        channel: String,
    },

    /// The callee accepted; media setup may proceed.
    CallAccepted { accepter_id: Uuid },

    /// The callee declined.
    CallRejected { rejecter_id: Uuid },

    /// An ICE candidate from the peer, relayed verbatim.
    IceCandidate { candidate: Value },

    /// The peer hung up.
    CallEnded,
}
