use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ember_db::Database;
use ember_types::chat;
use ember_types::events::{GatewayCommand, GatewayEvent};
use ember_types::models::Message as ChatMessage;

use crate::dispatcher::Dispatcher;
use crate::signaling;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Chat bodies above this length are dropped on the realtime path.
const MAX_MESSAGE_LEN: usize = 1000;

/// Handle a single WebSocket connection: wait for the user-online
/// announcement, register presence, then run the event loop until either
/// side drops.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: wait for the UserOnline announcement
    let user_id = match wait_for_announcement(&mut receiver).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client never announced itself, closing");
            return;
        }
    };

    // Resolve the user; call relays ring with this name later.
    let name = {
        let db = db.clone();
        let uid = user_id.to_string();
        let lookup = tokio::task::spawn_blocking(move || db.get_user_by_id(&uid)).await;
        match lookup {
            Ok(Ok(Some(row))) => row.name,
            Ok(Ok(None)) => {
                warn!("Unknown user {} announced on gateway, closing", user_id);
                return;
            }
            Ok(Err(e)) => {
                warn!("User lookup failed for {}: {}", user_id, e);
                return;
            }
            Err(e) => {
                warn!("spawn_blocking join error: {}", e);
                return;
            }
        }
    };

    info!("{} ({}) connected to gateway", name, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready { user_id };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Register presence and mirror it into the durable online flag
    let (tx, mut user_rx) = tokio::sync::mpsc::unbounded_channel();
    let conn_id = dispatcher.presence().set_online(user_id, tx).await;
    set_online_flag(&db, user_id, true).await;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Spawn task to forward targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let db_recv = db.clone();
    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &db_recv, user_id, &name_recv, cmd)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Conn-id-guarded cleanup: if a newer connection displaced this one,
    // its presence, rooms, and online flag must stay untouched.
    if dispatcher.presence().clear(user_id, conn_id).await {
        dispatcher.leave_all(user_id).await;
        set_online_flag(&db, user_id, false).await;
    }
    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn wait_for_announcement(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<Uuid> {
    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::UserOnline { user_id }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return Some(user_id);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    name: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::UserOnline { .. } => {} // Already handled

        GatewayCommand::JoinChat { conversation_id } => {
            debug!("{} ({}) joining chat {}", name, user_id, conversation_id);
            dispatcher.join_chat(&conversation_id, user_id).await;
        }

        GatewayCommand::SendMessage {
            conversation_id,
            sender_id,
            body,
        } => {
            send_message(dispatcher, db, user_id, conversation_id, sender_id, body).await;
        }

        GatewayCommand::GetMessages { conversation_id } => {
            get_messages(dispatcher, db, user_id, conversation_id).await;
        }

        GatewayCommand::CallRequest {
            target_user_id,
            channel,
        } => {
            signaling::call_request(dispatcher, user_id, name, target_user_id, channel).await;
        }

        GatewayCommand::CallAccept { caller_id } => {
            signaling::call_accept(dispatcher, user_id, caller_id).await;
        }

        GatewayCommand::CallReject { caller_id } => {
            signaling::call_reject(dispatcher, user_id, caller_id).await;
        }

        GatewayCommand::IceCandidate {
            target_user_id,
            candidate,
        } => {
            signaling::ice_candidate(dispatcher, user_id, target_user_id, candidate).await;
        }

        GatewayCommand::CallEnd { target_user_id } => {
            signaling::call_end(dispatcher, user_id, target_user_id).await;
        }
    }
}

/// Persist a chat message, then deliver it to the conversation group.
/// Realtime-path violations are absorbed silently: the sender gets no
/// error frame and falls back to its own retry UX.
async fn send_message(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    conversation_id: String,
    sender_id: Uuid,
    body: String,
) {
    if sender_id != user_id {
        warn!(
            "{} sent a message claiming sender {}, dropping",
            user_id, sender_id
        );
        return;
    }

    let body = body.trim().to_string();
    if body.is_empty() || body.len() > MAX_MESSAGE_LEN {
        debug!(
            "{} message of {} chars in {} dropped",
            user_id,
            body.len(),
            conversation_id
        );
        return;
    }

    let recipient_id = match chat::counterpart(&conversation_id, user_id) {
        Some(id) => id,
        None => {
            debug!(
                "{} is not part of conversation {}, dropping message",
                user_id, conversation_id
            );
            return;
        }
    };

    let message = ChatMessage {
        id: Uuid::new_v4(),
        conversation_id: conversation_id.clone(),
        sender_id: user_id,
        recipient_id,
        body,
        is_read: false,
        created_at: Utc::now(),
    };

    let stored = {
        let db = db.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || {
            db.insert_message(
                &message.id.to_string(),
                &message.conversation_id,
                &message.sender_id.to_string(),
                &message.recipient_id.to_string(),
                &message.body,
                &message.created_at.to_rfc3339(),
            )
        })
        .await
    };

    match stored {
        Ok(Ok(())) => {
            dispatcher
                .broadcast_chat(&conversation_id, GatewayEvent::NewMessage { message })
                .await;
        }
        Ok(Err(e)) => warn!("Failed to store message in {}: {}", conversation_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}

/// Reply with the conversation history — to the requesting connection only.
async fn get_messages(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    conversation_id: String,
) {
    let rows = {
        let db = db.clone();
        let cid = conversation_id.clone();
        tokio::task::spawn_blocking(move || db.messages_for_conversation(&cid)).await
    };

    match rows {
        Ok(Ok(rows)) => {
            let messages = rows.into_iter().map(|row| row.into_message()).collect();
            dispatcher
                .send_to_user(
                    user_id,
                    GatewayEvent::ChatMessages {
                        conversation_id,
                        messages,
                    },
                )
                .await;
        }
        Ok(Err(e)) => warn!("Failed to load history for {}: {}", conversation_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}

async fn set_online_flag(db: &Arc<Database>, user_id: Uuid, online: bool) {
    let db = db.clone();
    let uid = user_id.to_string();
    let result = tokio::task::spawn_blocking(move || db.set_online(&uid, online)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to flip online flag for {}: {}", user_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}
