//! Room storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    format_datetime, parse_datetime, parse_dm_key_opt, parse_room_kind, parse_uuid,
    parse_uuid_opt, OptionalExt,
};
use crate::error::Result;
use crate::models::{DmKey, Room};

const ROOM_COLUMNS: &str = "id, name, kind, subject_id, dm_key, created_at";

pub struct RoomStore<'a> {
    conn: &'a Connection,
}

impl<'a> RoomStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, room), fields(room_id = %room.id, kind = room.kind.as_str()))]
    pub fn create(&self, room: &Room) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rooms (id, name, kind, subject_id, dm_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                room.id.to_string(),
                room.name,
                room.kind.as_str(),
                room.subject_id.map(|s| s.to_string()),
                room.dm_key.map(|k| k.to_string()),
                format_datetime(&room.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        let sql = format!("SELECT {} FROM rooms WHERE id = ?1", ROOM_COLUMNS);
        let room = self
            .conn
            .query_row(&sql, params![id.to_string()], map_room)
            .optional()?;
        Ok(room)
    }

    #[instrument(skip(self), fields(key = %key))]
    pub fn find_by_dm_key(&self, key: &DmKey) -> Result<Option<Room>> {
        let sql = format!("SELECT {} FROM rooms WHERE dm_key = ?1", ROOM_COLUMNS);
        let room = self
            .conn
            .query_row(&sql, params![key.to_string()], map_room)
            .optional()?;
        Ok(room)
    }

    pub fn list(&self) -> Result<Vec<Room>> {
        let sql = format!("SELECT {} FROM rooms ORDER BY created_at, id", ROOM_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rooms = stmt
            .query_map([], map_room)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM rooms", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    #[instrument(skip(self))]
    pub fn delete(&self, room_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM rooms WHERE id = ?1",
            params![room_id.to_string()],
        )?;
        Ok(())
    }
}

fn map_room(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        kind: parse_room_kind(&row.get::<_, String>(2)?)?,
        subject_id: parse_uuid_opt(row.get::<_, Option<String>>(3)?)?,
        dm_key: parse_dm_key_opt(row.get::<_, Option<String>>(4)?)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?)?,
    })
}
