//! Message operations scoped to a room

use chrono::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants::{assert_message_stamped, assert_messages_ordered};
use crate::models::{now, Message, MessageDisplay};
use crate::storage::{MessageRepository, RoomRepository};

/// Upper bound on message length, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Default lookback for the initial load of a room
pub fn default_lookback() -> Duration {
    Duration::days(2)
}

/// Messages in `room_id` created within `lookback` of now, oldest first
#[instrument(skip(repo))]
pub fn load_recent<R: MessageRepository + ?Sized>(
    repo: &R,
    room_id: Uuid,
    lookback: Duration,
) -> Result<Vec<MessageDisplay>> {
    let messages = repo.list_messages_since(room_id, now() - lookback)?;
    assert_messages_ordered(&messages);
    Ok(messages)
}

/// Append a message to a room.
///
/// The anonymous flag is taken from the room's kind at this moment and is
/// never re-derived afterwards.
pub fn send<R>(repo: &R, room_id: Uuid, sender_id: Uuid, text: &str) -> Result<Message>
where
    R: RoomRepository + MessageRepository + ?Sized,
{
    send_with_id(repo, Uuid::new_v4(), room_id, sender_id, text)
}

/// Append a message under an id chosen by the caller.
///
/// Resending an id that already landed with the same room, sender and text
/// returns the stored message instead of a second row.
#[instrument(skip(repo, text))]
pub fn send_with_id<R>(repo: &R, message_id: Uuid, room_id: Uuid, sender_id: Uuid, text: &str) -> Result<Message>
where
    R: RoomRepository + MessageRepository + ?Sized,
{
    if text.trim().is_empty() {
        return Err(Error::Validation("message must not be empty".into()));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(Error::Validation(format!(
            "message longer than {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    let room = repo
        .find_room_by_id(room_id)?
        .ok_or_else(|| Error::NotFound(format!("room {}", room_id)))?;

    let mut message = Message::compose(&room, sender_id, text.to_string());
    message.id = message_id;
    assert_message_stamped(&message, &room);

    match repo.create_message(&message) {
        Ok(()) => Ok(message),
        Err(e) if e.is_conflict() => match repo.find_message_by_id(message_id)? {
            Some(existing)
                if existing.room_id == room_id
                    && existing.sender_id == sender_id
                    && existing.content == message.content =>
            {
                debug!(message_id = %message_id, "Message already stored, resend absorbed");
                Ok(existing)
            }
            _ => Err(e),
        },
        Err(e) => Err(e),
    }
}

/// Delete every message older than `max_age`, across all rooms
#[instrument(skip(repo))]
pub fn purge_older_than<R: MessageRepository + ?Sized>(repo: &R, max_age: Duration) -> Result<Vec<Message>> {
    let purged = repo.delete_messages_before(now() - max_age)?;
    info!(count = purged.len(), "Purged old messages");
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{create_room, ensure_default_rooms};
    use crate::models::RoomKind;
    use crate::storage::Database;

    fn backdate(db: &Database, msg: &Message, age: Duration) -> Message {
        let mut old = msg.clone();
        old.id = Uuid::new_v4();
        old.created_at = now() - age;
        db.messages().create(&old).unwrap();
        old
    }

    #[test]
    fn test_send_in_anonymous_room() {
        let db = Database::open_in_memory().unwrap();
        let rooms = ensure_default_rooms(&db).unwrap().rooms;
        let confessions = rooms.iter().find(|r| r.kind == RoomKind::Anonymous).unwrap();
        let u1 = Uuid::new_v4();

        let msg = send(&db, confessions.id, u1, "hello").unwrap();
        let stored = db.messages().find_by_id(msg.id).unwrap().unwrap();
        assert_eq!(stored.sender_id, u1);
        assert_eq!(stored.content, "hello");
        assert!(stored.is_anonymous);
    }

    #[test]
    fn test_send_rejects_blank_and_unknown_room() {
        let db = Database::open_in_memory().unwrap();
        let room = create_room(&db, "Lounge", RoomKind::Group, None).unwrap();
        assert!(matches!(send(&db, room.id, Uuid::new_v4(), "   "), Err(Error::Validation(_))));
        assert!(matches!(
            send(&db, Uuid::new_v4(), Uuid::new_v4(), "hi"),
            Err(Error::NotFound(_))
        ));
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(send(&db, room.id, Uuid::new_v4(), &long), Err(Error::Validation(_))));
    }

    #[test]
    fn test_resend_with_same_id_is_absorbed() {
        let db = Database::open_in_memory().unwrap();
        let room = create_room(&db, "Lounge", RoomKind::Group, None).unwrap();
        let (id, sender) = (Uuid::new_v4(), Uuid::new_v4());

        let first = send_with_id(&db, id, room.id, sender, "hello").unwrap();
        let again = send_with_id(&db, id, room.id, sender, "hello").unwrap();
        assert_eq!(again, first);
        assert_eq!(load_recent(&db, room.id, default_lookback()).unwrap().len(), 1);

        // Same id, different text is a real collision
        assert!(matches!(
            send_with_id(&db, id, room.id, sender, "other"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_load_recent_two_day_window() {
        let db = Database::open_in_memory().unwrap();
        let room = create_room(&db, "Lounge", RoomKind::Group, None).unwrap();
        let template = Message::compose(&room, Uuid::new_v4(), "x".into());

        let _three_days = backdate(&db, &template, Duration::days(3));
        let one_day = backdate(&db, &template, Duration::days(1));
        let one_hour = backdate(&db, &template, Duration::hours(1));

        let ids: Vec<_> = load_recent(&db, room.id, default_lookback())
            .unwrap()
            .into_iter()
            .map(|m| m.message.id)
            .collect();
        assert_eq!(ids, vec![one_day.id, one_hour.id]);
    }

    #[test]
    fn test_purge_leaves_newer_messages() {
        let db = Database::open_in_memory().unwrap();
        let room = create_room(&db, "Lounge", RoomKind::Group, None).unwrap();
        let template = Message::compose(&room, Uuid::new_v4(), "x".into());

        let stale = backdate(&db, &template, Duration::days(9));
        let recent = backdate(&db, &template, Duration::days(5));

        let purged = purge_older_than(&db, Duration::days(7)).unwrap();
        assert_eq!(purged, vec![stale]);
        assert!(db.messages().find_by_id(recent.id).unwrap().is_some());
    }
}
