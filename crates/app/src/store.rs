//! Client-side cache of rooms, messages, profiles, notices and materials
//!
//! Local writes and feed echoes of the same change both land here, so every
//! entity has exactly one merge entry point and all merges key on id.
//! Applying the same event twice leaves the store unchanged.

use std::cmp::Reverse;
use std::collections::HashMap;

use campus_core::{Material, Message, Notice, Profile, Room};
use campus_net::{ChangeEvent, EventKind, Row};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ClientStore {
    rooms: Vec<Room>,
    /// Per room, ascending by `(created_at, id)`
    messages: HashMap<Uuid, Vec<Message>>,
    /// Ordered by name
    profiles: Vec<Profile>,
    /// Newest first
    notices: Vec<Notice>,
    /// Per subject, newest first
    materials: HashMap<Uuid, Vec<Material>>,
}

impl ClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room(&self, room_id: Uuid) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    /// Case-insensitive lookup by display name
    pub fn room_named(&self, name: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn messages(&self, room_id: Uuid) -> &[Message] {
        self.messages.get(&room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn profile(&self, user_id: Uuid) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == user_id)
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn materials(&self, subject_id: Uuid) -> &[Material] {
        self.materials.get(&subject_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop everything, e.g. on logout
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Route a change event to its entity's merge. Returns whether anything
    /// changed.
    pub fn apply(&mut self, event: ChangeEvent) -> bool {
        let kind = event.kind;
        let row = match kind {
            EventKind::Delete => event.old.or(event.new),
            EventKind::Insert | EventKind::Update => event.new.or(event.old),
        };
        match row {
            Some(Row::Room(room)) => self.merge_room(kind, room),
            Some(Row::Message(message)) => self.merge_message(kind, message),
            Some(Row::Profile(profile)) => self.merge_profile(kind, profile),
            Some(Row::Notice(notice)) => self.merge_notice(kind, notice),
            Some(Row::Material(material)) => self.merge_material(kind, material),
            None => false,
        }
    }

    pub fn merge_room(&mut self, kind: EventKind, room: Room) -> bool {
        let existing = self.rooms.iter().position(|r| r.id == room.id);
        match (kind, existing) {
            (EventKind::Delete, Some(idx)) => {
                self.rooms.remove(idx);
                self.messages.remove(&room.id);
                true
            }
            (EventKind::Delete, None) => false,
            // Concurrent creators may both deliver the same insert
            (EventKind::Insert, Some(_)) => false,
            (EventKind::Update, Some(idx)) => replace(&mut self.rooms[idx], room),
            (_, None) => {
                self.rooms.push(room);
                true
            }
        }
    }

    pub fn merge_message(&mut self, kind: EventKind, message: Message) -> bool {
        if kind == EventKind::Delete {
            let Some(list) = self.messages.get_mut(&message.room_id) else {
                return false;
            };
            return match list.iter().position(|m| m.id == message.id) {
                Some(idx) => {
                    list.remove(idx);
                    true
                }
                None => false,
            };
        }

        let list = self.messages.entry(message.room_id).or_default();
        let existing = list.iter().position(|m| m.id == message.id);
        match (kind, existing) {
            (EventKind::Insert, Some(_)) | (EventKind::Delete, _) => false,
            (EventKind::Update, Some(idx)) => {
                list.remove(idx);
                insert_ordered(list, message);
                true
            }
            (_, None) => {
                insert_ordered(list, message);
                true
            }
        }
    }

    pub fn merge_profile(&mut self, kind: EventKind, profile: Profile) -> bool {
        let existing = self.profiles.iter().position(|p| p.id == profile.id);
        match (kind, existing) {
            (EventKind::Delete, Some(idx)) => {
                self.profiles.remove(idx);
                true
            }
            (EventKind::Delete, None) => false,
            // In place, so the directory doesn't reshuffle on presence changes
            (_, Some(idx)) => replace(&mut self.profiles[idx], profile),
            (_, None) => {
                let at = self
                    .profiles
                    .partition_point(|p| (&p.name, p.id) < (&profile.name, profile.id));
                self.profiles.insert(at, profile);
                true
            }
        }
    }

    pub fn merge_notice(&mut self, kind: EventKind, notice: Notice) -> bool {
        let existing = self.notices.iter().position(|n| n.id == notice.id);
        match (kind, existing) {
            (EventKind::Delete, Some(idx)) => {
                self.notices.remove(idx);
                true
            }
            (EventKind::Delete, None) | (EventKind::Insert, Some(_)) => false,
            (EventKind::Update, Some(idx)) => replace(&mut self.notices[idx], notice),
            (_, None) => {
                let key = Reverse((notice.created_at, notice.id));
                let at = self
                    .notices
                    .partition_point(|n| Reverse((n.created_at, n.id)) < key);
                self.notices.insert(at, notice);
                true
            }
        }
    }

    pub fn merge_material(&mut self, kind: EventKind, material: Material) -> bool {
        let list = self.materials.entry(material.subject_id).or_default();
        let existing = list.iter().position(|m| m.id == material.id);
        match (kind, existing) {
            (EventKind::Insert, Some(_)) | (EventKind::Delete, _) => false,
            (EventKind::Update, Some(idx)) => replace(&mut list[idx], material),
            (_, None) => {
                let key = Reverse((material.created_at, material.id));
                let at = list.partition_point(|m| Reverse((m.created_at, m.id)) < key);
                list.insert(at, material);
                true
            }
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Insert-in-position keeps display order independent of delivery order
fn insert_ordered(list: &mut Vec<Message>, message: Message) {
    let key = message.order_key();
    let at = list.partition_point(|m| m.order_key() < key);
    list.insert(at, message);
}
