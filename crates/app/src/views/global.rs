//! Portal-wide state: room list, student directory, notice board

use std::time::Duration;

use campus_core::{presence, Profile};
use campus_net::{ChangeEvent, EventKind, Subscription, Table, Topic};
use chrono::Utc;

use crate::backend::Backend;
use crate::error::Result;
use crate::store::ClientStore;

pub struct GlobalView {
    rooms: Subscription,
    profiles: Subscription,
    notices: Subscription,
}

impl GlobalView {
    pub async fn open(backend: &Backend, store: &mut ClientStore) -> Result<Self> {
        let rooms = backend.subscribe(Topic::all(Table::Rooms));
        let profiles = backend.subscribe(Topic::all(Table::Profiles));
        let notices = backend.subscribe(Topic::all(Table::Notices));

        for room in backend.list_rooms().await? {
            store.merge_room(EventKind::Update, room);
        }
        for profile in backend.list_profiles().await? {
            store.merge_profile(EventKind::Update, profile);
        }
        for notice in backend.list_notices().await? {
            store.merge_notice(EventKind::Update, notice);
        }

        Ok(Self {
            rooms,
            profiles,
            notices,
        })
    }

    /// Wait for the next event on any of the view's subscriptions
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        tokio::select! {
            Some(event) = self.rooms.recv() => Some(event),
            Some(event) = self.profiles.recv() => Some(event),
            Some(event) = self.notices.recv() => Some(event),
            else => None,
        }
    }

    /// Merge everything already delivered without waiting
    pub fn drain(&mut self, store: &mut ClientStore) -> usize {
        let mut changed = 0;
        for sub in [&mut self.rooms, &mut self.profiles, &mut self.notices] {
            while let Some(event) = sub.try_recv() {
                if store.apply(event) {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Profiles whose online flag is backed by a recent heartbeat
    pub fn online<'a>(store: &'a ClientStore, staleness: Duration) -> Vec<&'a Profile> {
        let now = Utc::now();
        store
            .profiles()
            .iter()
            .filter(|p| presence::is_effectively_online(p, now, staleness))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::test_backend;
    use campus_core::RoomKind;

    #[tokio::test]
    async fn test_open_loads_and_follows_changes() {
        let (backend, _dir) = test_backend();
        backend.ensure_default_rooms().await.unwrap();
        let admin = backend.resolve_identity("Registrar", "admin123").await.unwrap();

        let mut store = ClientStore::new();
        let mut view = GlobalView::open(&backend, &mut store).await.unwrap();
        assert_eq!(store.rooms().len(), 2);
        assert_eq!(store.profiles().len(), 1);

        let room = backend.create_room("Study", RoomKind::Group, None).await.unwrap();
        let notice = backend.post_notice(&admin, "Exams", "Next week").await.unwrap();
        backend.set_online(admin.id, true).await.unwrap();

        let mut seen = 0;
        while seen < 3 {
            let event = view.next_event().await.unwrap();
            store.apply(event);
            seen += 1;
        }

        assert!(store.room(room.id).is_some());
        assert_eq!(store.notices()[0].id, notice.id);
        assert!(store.profile(admin.id).unwrap().is_online);
        assert_eq!(GlobalView::online(&store, Duration::from_secs(120)).len(), 1);
    }

    #[tokio::test]
    async fn test_drain_applies_pending_events() {
        let (backend, _dir) = test_backend();
        let mut store = ClientStore::new();
        let mut view = GlobalView::open(&backend, &mut store).await.unwrap();

        backend.ensure_default_rooms().await.unwrap();
        // Forwarders run on the runtime; give them a moment
        for _ in 0..50 {
            view.drain(&mut store);
            if store.rooms().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.rooms().len(), 2);
    }
}
