use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use ember_types::events::GatewayEvent;

use crate::presence::PresenceRegistry;

/// Routes events to connected clients: conversation broadcast groups for
/// chat, targeted delivery for signaling and notifications. All delivery
/// goes through the injected PresenceRegistry, so an event for a user
/// without a live connection is dropped silently.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    presence: PresenceRegistry,

    /// Broadcast groups: conversation id -> subscribed user ids.
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                presence,
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    /// Subscribe a user to a conversation's broadcast group.
    pub async fn join_chat(&self, conversation_id: &str, user_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id);
    }

    /// Drop a user from every broadcast group; called on disconnect.
    pub async fn leave_all(&self, user_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&user_id);
            !members.is_empty()
        });
    }

    /// Deliver an event to every subscriber of a conversation, the sender
    /// included (echo consistency). Events never cross conversations.
    pub async fn broadcast_chat(&self, conversation_id: &str, event: GatewayEvent) {
        let members: Vec<Uuid> = {
            let rooms = self.inner.rooms.read().await;
            match rooms.get(conversation_id) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };

        for user_id in members {
            self.inner.presence.send(user_id, event.clone()).await;
        }
    }

    /// Targeted delivery to one user. Returns whether a live connection
    /// accepted the event.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        self.inner.presence.send(user_id, event).await
    }

    /// A like just completed a mutual match: tell both parties, each
    /// about the other. Offline parties are skipped.
    pub async fn notify_match(&self, a: Uuid, b: Uuid) {
        self.send_to_user(a, GatewayEvent::NewMatch { user_id: b }).await;
        self.send_to_user(b, GatewayEvent::NewMatch { user_id: a }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    async fn connect(dispatcher: &Dispatcher, user: Uuid) -> UnboundedReceiver<GatewayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.presence().set_online(user, tx).await;
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn chat_broadcast_reaches_all_members_including_sender() {
        let dispatcher = Dispatcher::new(PresenceRegistry::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = connect(&dispatcher, a).await;
        let mut rx_b = connect(&dispatcher, b).await;

        dispatcher.join_chat("room", a).await;
        dispatcher.join_chat("room", b).await;

        dispatcher
            .broadcast_chat("room", GatewayEvent::CallEnded)
            .await;

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn events_do_not_leak_across_conversations() {
        let dispatcher = Dispatcher::new(PresenceRegistry::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = connect(&dispatcher, a).await;
        let mut rx_b = connect(&dispatcher, b).await;

        dispatcher.join_chat("room-1", a).await;
        dispatcher.join_chat("room-2", b).await;

        dispatcher
            .broadcast_chat("room-1", GatewayEvent::CallEnded)
            .await;

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn leave_all_unsubscribes_everywhere() {
        let dispatcher = Dispatcher::new(PresenceRegistry::new());
        let a = Uuid::new_v4();
        let mut rx_a = connect(&dispatcher, a).await;

        dispatcher.join_chat("room-1", a).await;
        dispatcher.join_chat("room-2", a).await;
        dispatcher.leave_all(a).await;

        dispatcher
            .broadcast_chat("room-1", GatewayEvent::CallEnded)
            .await;
        dispatcher
            .broadcast_chat("room-2", GatewayEvent::CallEnded)
            .await;

        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn offline_members_are_skipped_silently() {
        let dispatcher = Dispatcher::new(PresenceRegistry::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = connect(&dispatcher, a).await;
        // b joined the room earlier but has no live connection now.

        dispatcher.join_chat("room", a).await;
        dispatcher.join_chat("room", b).await;

        dispatcher
            .broadcast_chat("room", GatewayEvent::CallEnded)
            .await;
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[tokio::test]
    async fn match_notification_goes_to_both_parties() {
        let dispatcher = Dispatcher::new(PresenceRegistry::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = connect(&dispatcher, a).await;
        let mut rx_b = connect(&dispatcher, b).await;

        dispatcher.notify_match(a, b).await;

        match drain(&mut rx_a).as_slice() {
            [GatewayEvent::NewMatch { user_id }] => assert_eq!(*user_id, b),
            other => panic!("unexpected events for a: {other:?}"),
        }
        match drain(&mut rx_b).as_slice() {
            [GatewayEvent::NewMatch { user_id }] => assert_eq!(*user_id, a),
            other => panic!("unexpected events for b: {other:?}"),
        }
    }
}
