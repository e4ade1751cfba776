//! SQLite storage layer for the campus portal

mod catalog;
mod messages;
mod migrations;
mod notices;
pub(crate) mod parse;
mod profiles;
mod rooms;
mod traits;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DmKey, Material, Message, MessageDisplay, Notice, Profile, Room, Subject};

pub use catalog::CatalogStore;
pub use messages::MessageStore;
pub use notices::NoticeStore;
pub use profiles::ProfileStore;
pub use rooms::RoomStore;
pub use traits::{
    CatalogRepository, MessageRepository, NoticeRepository, ProfileRepository, RoomRepository,
    Storage,
};

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        migrations::get_current_version(&self.conn).unwrap_or(0)
    }

    pub fn profiles(&self) -> ProfileStore<'_> {
        ProfileStore::new(&self.conn)
    }

    pub fn rooms(&self) -> RoomStore<'_> {
        RoomStore::new(&self.conn)
    }

    pub fn messages(&self) -> MessageStore<'_> {
        MessageStore::new(&self.conn)
    }

    pub fn notices(&self) -> NoticeStore<'_> {
        NoticeStore::new(&self.conn)
    }

    pub fn catalog(&self) -> CatalogStore<'_> {
        CatalogStore::new(&self.conn)
    }
}

// Implement repository traits for Database
// This enables using Database through the trait interface

impl ProfileRepository for Database {
    fn create_profile(&self, profile: &Profile) -> Result<()> {
        self.profiles().create(profile)
    }

    fn find_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>> {
        self.profiles().find_by_id(id)
    }

    fn find_profile_by_credential(&self, credential: &str) -> Result<Option<Profile>> {
        self.profiles().find_by_credential(credential)
    }

    fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.profiles().list()
    }

    fn set_online(&self, user_id: Uuid, is_online: bool) -> Result<()> {
        self.profiles().set_online(user_id, is_online)
    }

    fn touch_last_seen(&self, user_id: Uuid) -> Result<()> {
        self.profiles().touch_last_seen(user_id)
    }

    fn delete_profile(&self, user_id: Uuid) -> Result<()> {
        self.profiles().delete(user_id)
    }
}

impl RoomRepository for Database {
    fn create_room(&self, room: &Room) -> Result<()> {
        self.rooms().create(room)
    }

    fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        self.rooms().find_by_id(id)
    }

    fn find_room_by_dm_key(&self, key: &DmKey) -> Result<Option<Room>> {
        self.rooms().find_by_dm_key(key)
    }

    fn list_rooms(&self) -> Result<Vec<Room>> {
        self.rooms().list()
    }

    fn count_rooms(&self) -> Result<u64> {
        self.rooms().count()
    }

    fn delete_room(&self, room_id: Uuid) -> Result<()> {
        self.rooms().delete(room_id)
    }
}

impl MessageRepository for Database {
    fn create_message(&self, message: &Message) -> Result<()> {
        self.messages().create(message)
    }

    fn find_message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        self.messages().find_by_id(id)
    }

    fn list_messages_since(&self, room_id: Uuid, since: DateTime<Utc>) -> Result<Vec<MessageDisplay>> {
        self.messages().list_since(room_id, since)
    }

    fn delete_messages_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>> {
        self.messages().delete_before(cutoff)
    }
}

impl NoticeRepository for Database {
    fn create_notice(&self, notice: &Notice) -> Result<()> {
        self.notices().create(notice)
    }

    fn update_notice(&self, notice: &Notice) -> Result<()> {
        self.notices().update(notice)
    }

    fn delete_notice(&self, notice_id: Uuid) -> Result<()> {
        self.notices().delete(notice_id)
    }

    fn list_notices(&self) -> Result<Vec<Notice>> {
        self.notices().list()
    }
}

impl CatalogRepository for Database {
    fn create_subject(&self, subject: &Subject) -> Result<()> {
        self.catalog().create_subject(subject)
    }

    fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.catalog().list_subjects()
    }

    fn create_material(&self, material: &Material) -> Result<()> {
        self.catalog().create_material(material)
    }

    fn list_materials(&self, subject_id: Uuid) -> Result<Vec<Material>> {
        self.catalog().list_materials(subject_id)
    }
}
