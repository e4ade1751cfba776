//! Storage repository traits
//!
//! These traits are the logical query/insert/update/delete surface of the
//! portal backend. `Database` implements them over SQLite; tests and
//! alternative backends can supply their own.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    DmKey, Material, Message, MessageDisplay, Notice, Profile, Room, Subject,
};

/// Identity operations (`profiles` table)
pub trait ProfileRepository {
    /// Insert a profile; a taken credential or id yields `Error::Conflict`
    fn create_profile(&self, profile: &Profile) -> Result<()>;

    fn find_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>>;

    fn find_profile_by_credential(&self, credential: &str) -> Result<Option<Profile>>;

    /// All profiles, ordered by name
    fn list_profiles(&self) -> Result<Vec<Profile>>;

    /// Set the online flag; going online also refreshes `last_seen_at`
    fn set_online(&self, user_id: Uuid, is_online: bool) -> Result<()>;

    /// Refresh `last_seen_at` without touching the online flag
    fn touch_last_seen(&self, user_id: Uuid) -> Result<()>;

    fn delete_profile(&self, user_id: Uuid) -> Result<()>;
}

/// Room operations (`rooms` table)
pub trait RoomRepository {
    fn create_room(&self, room: &Room) -> Result<()>;

    fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>>;

    fn find_room_by_dm_key(&self, key: &DmKey) -> Result<Option<Room>>;

    /// All rooms, oldest first
    fn list_rooms(&self) -> Result<Vec<Room>>;

    fn count_rooms(&self) -> Result<u64>;

    /// Delete a room and, by cascade, its messages
    fn delete_room(&self, room_id: Uuid) -> Result<()>;
}

/// Message operations (`messages` table)
pub trait MessageRepository {
    fn create_message(&self, message: &Message) -> Result<()>;

    fn find_message_by_id(&self, id: Uuid) -> Result<Option<Message>>;

    /// Messages of a room created strictly after `since`, ascending,
    /// joined with sender name and credential where the sender still exists
    fn list_messages_since(&self, room_id: Uuid, since: DateTime<Utc>) -> Result<Vec<MessageDisplay>>;

    /// Delete every message created before `cutoff`; returns the deleted rows
    fn delete_messages_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>>;
}

/// Notice board operations (`notices` table)
pub trait NoticeRepository {
    fn create_notice(&self, notice: &Notice) -> Result<()>;

    fn update_notice(&self, notice: &Notice) -> Result<()>;

    fn delete_notice(&self, notice_id: Uuid) -> Result<()>;

    /// Newest first
    fn list_notices(&self) -> Result<Vec<Notice>>;
}

/// Subject and material catalog (`subjects`, `materials` tables)
pub trait CatalogRepository {
    fn create_subject(&self, subject: &Subject) -> Result<()>;

    fn list_subjects(&self) -> Result<Vec<Subject>>;

    fn create_material(&self, material: &Material) -> Result<()>;

    /// Newest first
    fn list_materials(&self, subject_id: Uuid) -> Result<Vec<Material>>;
}

/// Combined storage interface
pub trait Storage:
    ProfileRepository + RoomRepository + MessageRepository + NoticeRepository + CatalogRepository
{
}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where
    T: ProfileRepository + RoomRepository + MessageRepository + NoticeRepository + CatalogRepository
{
}
