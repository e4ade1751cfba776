//! Room directory: listing, bootstrap seeding and direct-message rooms

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants::assert_room_invariants;
use crate::models::{DmKey, Room, RoomKind};
use crate::storage::RoomRepository;

/// Name of the group room seeded into an empty directory
pub const DEFAULT_GROUP_ROOM: &str = "Campus Lounge";

/// Name of the anonymous room seeded into an empty directory
pub const DEFAULT_ANONYMOUS_ROOM: &str = "Confession Box";

/// Result of a find-or-create operation
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// An existing record was returned
    Found(T),
    /// A new record was inserted by this call
    Created(T),
}

impl<T> Lookup<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Lookup::Created(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Lookup::Found(v) | Lookup::Created(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Lookup::Found(v) | Lookup::Created(v) => v,
        }
    }
}

/// Outcome of [`ensure_default_rooms`]
#[derive(Debug, Clone, PartialEq)]
pub struct SeedOutcome {
    /// All rooms after the call
    pub rooms: Vec<Room>,
    /// True when the directory was empty and the defaults were inserted
    pub seeded: bool,
}

pub fn list_rooms<R: RoomRepository + ?Sized>(repo: &R) -> Result<Vec<Room>> {
    repo.list_rooms()
}

/// Seed one group and one anonymous room if the directory is empty.
///
/// Checks whether any room exists, not whether these names exist, so it
/// never re-creates defaults an admin has deleted or renamed.
#[instrument(skip(repo))]
pub fn ensure_default_rooms<R: RoomRepository + ?Sized>(repo: &R) -> Result<SeedOutcome> {
    if repo.count_rooms()? > 0 {
        return Ok(SeedOutcome {
            rooms: repo.list_rooms()?,
            seeded: false,
        });
    }

    let defaults = [
        Room::new(DEFAULT_GROUP_ROOM.to_string(), RoomKind::Group),
        Room::new(DEFAULT_ANONYMOUS_ROOM.to_string(), RoomKind::Anonymous),
    ];
    for room in &defaults {
        repo.create_room(room)?;
    }
    info!("Seeded default rooms");

    Ok(SeedOutcome {
        rooms: defaults.to_vec(),
        seeded: true,
    })
}

/// Find or create the dm room for a pair of identities.
///
/// The pair is canonicalised into a [`DmKey`], so argument order does not
/// matter. Losing an insert race to another session resolves to the room
/// that session created.
#[instrument(skip(repo))]
pub fn open_direct_message<R: RoomRepository + ?Sized>(
    repo: &R,
    self_id: Uuid,
    other_id: Uuid,
) -> Result<Lookup<Room>> {
    let key = DmKey::new(self_id, other_id);

    if let Some(room) = repo.find_room_by_dm_key(&key)? {
        debug!(room_id = %room.id, "Found existing dm room");
        return Ok(Lookup::Found(room));
    }

    let room = Room::direct(key);
    assert_room_invariants(&room);
    match repo.create_room(&room) {
        Ok(()) => {
            info!(room_id = %room.id, key = %key, "Created dm room");
            Ok(Lookup::Created(room))
        }
        Err(e) if e.is_conflict() => {
            warn!(key = %key, "Dm room insert conflicted, re-resolving");
            match repo.find_room_by_dm_key(&key)? {
                Some(existing) => Ok(Lookup::Found(existing)),
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Create a group or anonymous room. Dm rooms only come from
/// [`open_direct_message`].
#[instrument(skip(repo))]
pub fn create_room<R: RoomRepository + ?Sized>(
    repo: &R,
    name: &str,
    kind: RoomKind,
    subject_id: Option<Uuid>,
) -> Result<Room> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("room name must not be empty".into()));
    }
    if kind == RoomKind::Dm {
        return Err(Error::InvalidOperation(
            "dm rooms are opened between two identities".into(),
        ));
    }

    let room = match subject_id {
        Some(subject_id) => Room::new(name.to_string(), kind).with_subject(subject_id),
        None => Room::new(name.to_string(), kind),
    };
    repo.create_room(&room)?;
    Ok(room)
}

/// Delete a room; its messages go with it
pub fn delete_room<R: RoomRepository + ?Sized>(repo: &R, room_id: Uuid) -> Result<Room> {
    let room = repo
        .find_room_by_id(room_id)?
        .ok_or_else(|| Error::NotFound(format!("room {}", room_id)))?;
    repo.delete_room(room_id)?;
    info!(room_id = %room_id, "Deleted room");
    Ok(room)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_seed_only_into_empty_directory() {
        let db = Database::open_in_memory().unwrap();

        let first = ensure_default_rooms(&db).unwrap();
        assert!(first.seeded);
        let kinds: Vec<_> = first.rooms.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RoomKind::Group, RoomKind::Anonymous]);

        let second = ensure_default_rooms(&db).unwrap();
        assert!(!second.seeded);
        assert_eq!(second.rooms.len(), 2);
    }

    #[test]
    fn test_seed_checks_any_room_not_names() {
        let db = Database::open_in_memory().unwrap();
        create_room(&db, "Robotics Club", RoomKind::Group, None).unwrap();

        let outcome = ensure_default_rooms(&db).unwrap();
        assert!(!outcome.seeded);
        assert_eq!(outcome.rooms.len(), 1);
    }

    #[test]
    fn test_dm_room_idempotent_in_both_orders() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let ab = open_direct_message(&db, a, b).unwrap();
        assert!(ab.was_created());
        let ba = open_direct_message(&db, b, a).unwrap();
        assert!(!ba.was_created());
        let again = open_direct_message(&db, a, b).unwrap();

        assert_eq!(ab.get().id, ba.get().id);
        assert_eq!(ab.get().id, again.get().id);
        assert_eq!(db.count_rooms().unwrap(), 1);
        assert_eq!(ab.get().name, DmKey::new(a, b).to_string());
    }

    #[test]
    fn test_create_room_rules() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            create_room(&db, "  ", RoomKind::Group, None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            create_room(&db, "Chat", RoomKind::Dm, None),
            Err(Error::InvalidOperation(_))
        ));
        let subject = Uuid::new_v4();
        let room = create_room(&db, " CS101 doubts ", RoomKind::Group, Some(subject)).unwrap();
        assert_eq!(room.name, "CS101 doubts");
        assert_eq!(room.subject_id, Some(subject));
    }

    #[test]
    fn test_delete_room() {
        let db = Database::open_in_memory().unwrap();
        let room = create_room(&db, "Temp", RoomKind::Group, None).unwrap();
        assert_eq!(delete_room(&db, room.id).unwrap().id, room.id);
        assert!(matches!(delete_room(&db, room.id), Err(Error::NotFound(_))));
    }

    /// Another session creates the same dm room between our lookup and
    /// our insert
    struct LosesInsertRace {
        db: Database,
        rival: Room,
    }

    impl RoomRepository for LosesInsertRace {
        fn create_room(&self, room: &Room) -> Result<()> {
            self.db.create_room(&self.rival)?;
            self.db.create_room(room)
        }

        fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>> {
            self.db.find_room_by_id(id)
        }

        fn find_room_by_dm_key(&self, key: &DmKey) -> Result<Option<Room>> {
            self.db.find_room_by_dm_key(key)
        }

        fn list_rooms(&self) -> Result<Vec<Room>> {
            self.db.list_rooms()
        }

        fn count_rooms(&self) -> Result<u64> {
            self.db.count_rooms()
        }

        fn delete_room(&self, room_id: Uuid) -> Result<()> {
            self.db.delete_room(room_id)
        }
    }

    #[test]
    fn test_conflicting_dm_insert_resolves_to_winner() {
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let rival = Room::direct(DmKey::new(u2, u1));
        let repo = LosesInsertRace {
            db: Database::open_in_memory().unwrap(),
            rival: rival.clone(),
        };

        let lookup = open_direct_message(&repo, u1, u2).unwrap();
        assert!(!lookup.was_created());
        assert_eq!(lookup.into_inner().id, rival.id);
        assert_eq!(repo.count_rooms().unwrap(), 1);
    }
}
