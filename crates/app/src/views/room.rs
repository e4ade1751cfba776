//! The active chat room

use std::collections::HashMap;

use campus_core::{
    sender_label, Error as CoreError, Message, MessageDisplay, Profile, RevealToggle, Room,
};
use campus_net::{ChangeEvent, EventKind, Row, Subscription, Topic};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::Result;
use crate::store::ClientStore;

/// A message as shown to one viewer
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub id: Uuid,
    pub sender_label: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_anonymous: bool,
    pub is_own: bool,
}

impl RenderedMessage {
    pub fn line(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.created_at.format("%H:%M"),
            self.sender_label,
            self.content
        )
    }
}

#[derive(Debug, Clone, Default)]
struct SenderInfo {
    name: Option<String>,
    credential: Option<String>,
}

pub struct RoomView {
    room: Room,
    viewer_id: Uuid,
    viewer_is_admin: bool,
    subscription: Subscription,
    reveal: RevealToggle,
    composer: String,
    /// Id and text of the last failed send, reused when the same text is
    /// sent again so a write that landed late is not stored twice
    unsent: Option<(Uuid, String)>,
    /// Sender fields seen at load time, for senders missing from the directory
    senders: HashMap<Uuid, SenderInfo>,
}

impl RoomView {
    /// Subscribe to the room, then load its recent window into `store`
    pub async fn open(
        backend: &Backend,
        store: &mut ClientStore,
        viewer: &Profile,
        room_id: Uuid,
        lookback: chrono::Duration,
    ) -> Result<Self> {
        let room = backend
            .find_room(room_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("room {}", room_id)))?;

        // Subscribed first so nothing sent during the load is missed
        let subscription = backend.subscribe(Topic::messages_in(room.id));
        let recent = backend.load_recent(room.id, lookback).await?;

        store.merge_room(EventKind::Update, room.clone());
        let mut senders = HashMap::new();
        for display in recent {
            senders.insert(
                display.message.sender_id,
                SenderInfo {
                    name: display.sender_name,
                    credential: display.sender_credential,
                },
            );
            store.merge_message(EventKind::Insert, display.message);
        }

        debug!(room_id = %room.id, "Opened room view");
        Ok(Self {
            room,
            viewer_id: viewer.id,
            viewer_is_admin: viewer.is_admin(),
            subscription,
            reveal: RevealToggle::default(),
            composer: String::new(),
            unsent: None,
            senders,
        })
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn reveal_on(&self) -> bool {
        self.reveal.is_on()
    }

    /// Flip the admin reveal toggle for this room
    pub fn toggle_reveal(&mut self) -> Result<bool> {
        Ok(self.reveal.toggle(self.viewer_is_admin, &self.room)?)
    }

    pub fn input(&self) -> &str {
        &self.composer
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.composer = text.into();
    }

    /// Send the pending input. On failure the input is put back.
    pub async fn send(&mut self, backend: &Backend, store: &mut ClientStore) -> Result<Message> {
        let text = std::mem::take(&mut self.composer);
        let message_id = match self.unsent.take() {
            Some((id, unsent)) if unsent == text => id,
            _ => Uuid::new_v4(),
        };

        match backend
            .send_message_with_id(message_id, self.room.id, self.viewer_id, &text)
            .await
        {
            Ok(message) => {
                store.merge_message(EventKind::Insert, message.clone());
                Ok(message)
            }
            Err(e) => {
                warn!(room_id = %self.room.id, error = %e, "Send failed, restoring input");
                self.unsent = Some((message_id, text.clone()));
                self.composer = text;
                Err(e)
            }
        }
    }

    /// Wait for the next event on this room's subscription
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.subscription.recv().await
    }

    /// Merge an event from this room's subscription. Events for other
    /// rooms are ignored.
    ///
    /// A failed sender lookup does not hold the message back; the sender
    /// stays uncached and renders as unknown until a later event retries.
    pub async fn apply(&mut self, backend: &Backend, store: &mut ClientStore, event: ChangeEvent) -> Result<bool> {
        let message = match event.row() {
            Some(Row::Message(m)) if m.room_id == self.room.id => m.clone(),
            _ => return Ok(false),
        };

        if event.kind == EventKind::Insert
            && store.profile(message.sender_id).is_none()
            && !self.senders.contains_key(&message.sender_id)
        {
            match backend.find_profile(message.sender_id).await {
                Ok(Some(p)) => {
                    self.senders.insert(
                        message.sender_id,
                        SenderInfo {
                            name: Some(p.name),
                            credential: Some(p.credential),
                        },
                    );
                }
                Ok(None) => {
                    self.senders.insert(message.sender_id, SenderInfo::default());
                }
                Err(e) => {
                    warn!(sender_id = %message.sender_id, error = %e, "Sender lookup failed, merging anyway");
                }
            }
        }

        Ok(store.apply(event))
    }

    pub fn render_message(&self, store: &ClientStore, message: &Message) -> RenderedMessage {
        let (name, credential) = match store.profile(message.sender_id) {
            Some(p) => (Some(p.name.clone()), Some(p.credential.clone())),
            None => self
                .senders
                .get(&message.sender_id)
                .map(|s| (s.name.clone(), s.credential.clone()))
                .unwrap_or_default(),
        };
        let display = MessageDisplay::new(message.clone(), name, credential);

        RenderedMessage {
            id: message.id,
            sender_label: sender_label(&display, self.viewer_is_admin, self.reveal.is_on()),
            content: message.content.clone(),
            created_at: message.created_at,
            is_anonymous: message.is_anonymous,
            is_own: message.sender_id == self.viewer_id,
        }
    }

    /// The room's messages, oldest first, as this viewer sees them
    pub fn render(&self, store: &ClientStore) -> Vec<RenderedMessage> {
        store
            .messages(self.room.id)
            .iter()
            .map(|m| self.render_message(store, m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::{hold_store, slow_backend, test_backend};
    use crate::error::ClientError;
    use std::time::Duration;
    use campus_core::{RoomKind, GHOST_USER};
    use campus_net::Table;

    async fn login(backend: &Backend, name: &str, credential: &str) -> Profile {
        backend.resolve_identity(name, credential).await.unwrap()
    }

    #[tokio::test]
    async fn test_anonymous_room_masks_sender_until_admin_reveals() {
        let (backend, _dir) = test_backend();
        let asha = login(&backend, "Asha", "9999999999").await;
        let admin = login(&backend, "Registrar", "admin123").await;
        let student = login(&backend, "Ravi", "8888888888").await;
        let confessions = backend
            .create_room("Confessions", RoomKind::Anonymous, None)
            .await
            .unwrap();

        let mut store = ClientStore::new();
        let mut author = RoomView::open(&backend, &mut store, &asha, confessions.id, chrono::Duration::days(2))
            .await
            .unwrap();
        author.set_input("hello");
        let sent = author.send(&backend, &mut store).await.unwrap();
        assert_eq!(sent.sender_id, asha.id);
        assert_eq!(sent.content, "hello");
        assert!(sent.is_anonymous);

        let mut student_store = ClientStore::new();
        let student_view =
            RoomView::open(&backend, &mut student_store, &student, confessions.id, chrono::Duration::days(2))
                .await
                .unwrap();
        assert_eq!(student_view.render(&student_store)[0].sender_label, GHOST_USER);

        let mut admin_store = ClientStore::new();
        let mut admin_view =
            RoomView::open(&backend, &mut admin_store, &admin, confessions.id, chrono::Duration::days(2))
                .await
                .unwrap();
        assert_eq!(admin_view.render(&admin_store)[0].sender_label, GHOST_USER);
        assert!(admin_view.toggle_reveal().unwrap());
        assert_eq!(admin_view.render(&admin_store)[0].sender_label, "Asha");
    }

    #[tokio::test]
    async fn test_student_cannot_toggle_reveal() {
        let (backend, _dir) = test_backend();
        let asha = login(&backend, "Asha", "9999999999").await;
        let room = backend.create_room("Confessions", RoomKind::Anonymous, None).await.unwrap();

        let mut store = ClientStore::new();
        let mut view = RoomView::open(&backend, &mut store, &asha, room.id, chrono::Duration::days(2))
            .await
            .unwrap();
        let err = view.toggle_reveal().unwrap_err();
        assert!(err.is_permission_denied());
        assert!(!view.reveal_on());
    }

    #[tokio::test]
    async fn test_failed_send_restores_input() {
        let (backend, _dir) = test_backend();
        let asha = login(&backend, "Asha", "9999999999").await;
        let room = backend.create_room("Lounge", RoomKind::Group, None).await.unwrap();

        let mut store = ClientStore::new();
        let mut view = RoomView::open(&backend, &mut store, &asha, room.id, chrono::Duration::days(2))
            .await
            .unwrap();
        backend.delete_room(room.id).await.unwrap();

        view.set_input("are you there?");
        let err = view.send(&backend, &mut store).await.unwrap_err();
        assert!(matches!(err, ClientError::Core(CoreError::NotFound(_))));
        assert_eq!(view.input(), "are you there?");
    }

    #[tokio::test]
    async fn test_retry_after_timeout_reuses_message_id() {
        let (backend, _dir) = slow_backend(100);
        let asha = login(&backend, "Asha", "9999999999").await;
        let room = backend.create_room("Lounge", RoomKind::Group, None).await.unwrap();

        let mut store = ClientStore::new();
        let mut view = RoomView::open(&backend, &mut store, &asha, room.id, chrono::Duration::days(2))
            .await
            .unwrap();

        let busy = hold_store(&backend, Duration::from_millis(300));
        view.set_input("hello");
        let err = view.send(&backend, &mut store).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        assert_eq!(view.input(), "hello");
        busy.join().unwrap();

        let sent = view.send(&backend, &mut store).await.unwrap();
        let late = tokio::time::timeout(Duration::from_secs(2), view.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.row().map(Row::id), Some(sent.id));

        assert_eq!(store.messages(room.id).len(), 1);
        let stored = backend.load_recent(room.id, chrono::Duration::days(1)).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_sender_lookup_failure_still_merges() {
        let (backend, _dir) = slow_backend(50);
        let asha = login(&backend, "Asha", "9999999999").await;
        let ravi = login(&backend, "Ravi", "8888888888").await;
        let room = backend.create_room("Lounge", RoomKind::Group, None).await.unwrap();

        let mut store = ClientStore::new();
        let mut view = RoomView::open(&backend, &mut store, &asha, room.id, chrono::Duration::days(2))
            .await
            .unwrap();

        let first = ChangeEvent::insert(Row::Message(Message::compose(&room, ravi.id, "one".into())));
        let busy = hold_store(&backend, Duration::from_millis(200));
        assert!(view.apply(&backend, &mut store, first).await.unwrap());
        busy.join().unwrap();

        assert_eq!(store.messages(room.id).len(), 1);
        assert_eq!(view.render(&store)[0].sender_label, campus_core::UNKNOWN_SENDER);

        // The next event from the same sender retries the lookup
        let second = ChangeEvent::insert(Row::Message(Message::compose(&room, ravi.id, "two".into())));
        assert!(view.apply(&backend, &mut store, second).await.unwrap());
        let labels: Vec<_> = view.render(&store).into_iter().map(|m| m.sender_label).collect();
        assert_eq!(labels, vec!["Ravi", "Ravi"]);
    }

    #[tokio::test]
    async fn test_live_messages_merge_once() {
        let (backend, _dir) = test_backend();
        let asha = login(&backend, "Asha", "9999999999").await;
        let ravi = login(&backend, "Ravi", "8888888888").await;
        let room = backend.create_room("Lounge", RoomKind::Group, None).await.unwrap();

        let mut store = ClientStore::new();
        let mut view = RoomView::open(&backend, &mut store, &asha, room.id, chrono::Duration::days(2))
            .await
            .unwrap();

        // Own message: local merge plus the feed echo
        view.set_input("mine");
        view.send(&backend, &mut store).await.unwrap();
        backend.send_message(room.id, ravi.id, "theirs").await.unwrap();

        let mut applied = 0;
        for _ in 0..2 {
            let event = view.next_event().await.unwrap();
            if view.apply(&backend, &mut store, event).await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);

        let rendered = view.render(&store);
        assert_eq!(rendered.len(), 2);
        assert!(rendered[0].is_own);
        assert_eq!(rendered[1].sender_label, "Ravi");
    }

    #[tokio::test]
    async fn test_switching_rooms_stops_old_deliveries() {
        let (backend, _dir) = test_backend();
        let asha = login(&backend, "Asha", "9999999999").await;
        let lounge = backend.create_room("Lounge", RoomKind::Group, None).await.unwrap();
        let study = backend.create_room("Study", RoomKind::Group, None).await.unwrap();

        let mut store = ClientStore::new();
        let first = RoomView::open(&backend, &mut store, &asha, lounge.id, chrono::Duration::days(2))
            .await
            .unwrap();
        let mut second = RoomView::open(&backend, &mut store, &asha, study.id, chrono::Duration::days(2))
            .await
            .unwrap();
        drop(first);

        backend.send_message(lounge.id, asha.id, "old room").await.unwrap();
        backend.send_message(study.id, asha.id, "new room").await.unwrap();

        let event = second.next_event().await.unwrap();
        assert!(second.apply(&backend, &mut store, event).await.unwrap());
        assert!(store.messages(lounge.id).is_empty());
        assert_eq!(second.render(&store)[0].content, "new room");
    }

    #[tokio::test]
    async fn test_foreign_room_event_ignored() {
        let (backend, _dir) = test_backend();
        let asha = login(&backend, "Asha", "9999999999").await;
        let lounge = backend.create_room("Lounge", RoomKind::Group, None).await.unwrap();
        let other = backend.create_room("Other", RoomKind::Group, None).await.unwrap();

        let mut store = ClientStore::new();
        let mut view = RoomView::open(&backend, &mut store, &asha, lounge.id, chrono::Duration::days(2))
            .await
            .unwrap();
        let stray = ChangeEvent::insert(Row::Message(Message::compose(&other, asha.id, "stray".into())));
        assert_eq!(stray.table, Table::Messages);

        assert!(!view.apply(&backend, &mut store, stray).await.unwrap());
        assert!(store.messages(other.id).is_empty());
    }

    #[tokio::test]
    async fn test_missing_sender_renders_unknown() {
        let (backend, _dir) = test_backend();
        let asha = login(&backend, "Asha", "9999999999").await;
        let room = backend.create_room("Lounge", RoomKind::Group, None).await.unwrap();
        backend.send_message(room.id, Uuid::new_v4(), "ghostly").await.unwrap();

        let mut store = ClientStore::new();
        let view = RoomView::open(&backend, &mut store, &asha, room.id, chrono::Duration::days(2))
            .await
            .unwrap();
        assert_eq!(view.render(&store)[0].sender_label, campus_core::UNKNOWN_SENDER);
    }
}
