//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use uuid::Uuid;

use crate::models::{Message, MessageDisplay, Room, RoomKind};

/// A room's kind, name and dm key agree with each other
pub fn assert_room_invariants(room: &Room) {
    debug_assert!(!room.name.trim().is_empty(), "Room {} has empty name", room.id);

    match room.kind {
        RoomKind::Dm => {
            debug_assert!(room.dm_key.is_some(), "Dm room {} has no dm key", room.id);
            debug_assert!(
                room.dm_key.map(|k| k.to_string()).as_deref() == Some(room.name.as_str()),
                "Dm room {} name {:?} does not match its key",
                room.id,
                room.name
            );
        }
        _ => {
            debug_assert!(
                room.dm_key.is_none(),
                "{:?} room {} carries a dm key",
                room.kind,
                room.id
            );
        }
    }
}

/// A message belongs to `room` and its anonymous flag was stamped from it
pub fn assert_message_stamped(message: &Message, room: &Room) {
    debug_assert!(message.room_id == room.id, "Message {} in wrong room", message.id);
    debug_assert!(
        message.sender_id != Uuid::nil(),
        "Message {} has nil sender",
        message.id
    );
    debug_assert!(
        message.is_anonymous == room.kind.stamps_anonymous(),
        "Message {} anonymous flag disagrees with room kind at send time",
        message.id
    );
}

/// Messages are in non-decreasing creation order
pub fn assert_messages_ordered(messages: &[MessageDisplay]) {
    debug_assert!(
        messages
            .windows(2)
            .all(|w| w[0].message.order_key() <= w[1].message.order_key()),
        "Message list is out of order"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DmKey;

    #[test]
    fn test_valid_rooms() {
        assert_room_invariants(&Room::new("Lounge".into(), RoomKind::Group));
        assert_room_invariants(&Room::direct(DmKey::new(Uuid::new_v4(), Uuid::new_v4())));
    }

    #[test]
    fn test_stamped_message() {
        let room = Room::new("Confessions".into(), RoomKind::Anonymous);
        let msg = Message::compose(&room, Uuid::new_v4(), "hi".into());
        assert_message_stamped(&msg, &room);
    }

    #[test]
    #[should_panic(expected = "carries a dm key")]
    fn test_group_room_with_key_panics() {
        let mut room = Room::new("Lounge".into(), RoomKind::Group);
        room.dm_key = Some(DmKey::new(Uuid::new_v4(), Uuid::new_v4()));
        assert_room_invariants(&room);
    }
}
