//! Message storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::parse::{format_datetime, parse_datetime, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{Message, MessageDisplay};

pub struct MessageStore<'a> {
    conn: &'a Connection,
}

impl<'a> MessageStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, message), fields(room_id = %message.room_id, anonymous = message.is_anonymous))]
    pub fn create(&self, message: &Message) -> Result<()> {
        self.conn.execute(
            "INSERT INTO messages (id, room_id, sender_id, content, is_anonymous, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.room_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                message.is_anonymous as i32,
                format_datetime(&message.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        let message = self
            .conn
            .query_row(
                "SELECT id, room_id, sender_id, content, is_anonymous, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                map_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Messages of a room created after `since`, oldest first, with sender info
    #[instrument(skip(self))]
    pub fn list_since(&self, room_id: Uuid, since: DateTime<Utc>) -> Result<Vec<MessageDisplay>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.room_id, m.sender_id, m.content, m.is_anonymous, m.created_at,
                    p.name, p.credential
             FROM messages m
             LEFT JOIN profiles p ON p.id = m.sender_id
             WHERE m.room_id = ?1 AND m.created_at > ?2
             ORDER BY m.created_at ASC, m.id ASC",
        )?;

        let messages = stmt
            .query_map(
                params![room_id.to_string(), format_datetime(&since)],
                |row| {
                    Ok(MessageDisplay {
                        message: map_message(row)?,
                        sender_name: row.get(6)?,
                        sender_credential: row.get(7)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    /// Delete all messages older than `cutoff`, in every room
    #[instrument(skip(self))]
    pub fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>> {
        let tx = self.conn.unchecked_transaction()?;
        let cutoff = format_datetime(&cutoff);

        let purged = {
            let mut stmt = tx.prepare(
                "SELECT id, room_id, sender_id, content, is_anonymous, created_at
                 FROM messages WHERE created_at < ?1",
            )?;
            let rows = stmt
                .query_map(params![cutoff], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute("DELETE FROM messages WHERE created_at < ?1", params![cutoff])?;
        tx.commit()?;

        debug!(count = purged.len(), "Purged messages");
        Ok(purged)
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        room_id: parse_uuid(&row.get::<_, String>(1)?)?,
        sender_id: parse_uuid(&row.get::<_, String>(2)?)?,
        content: row.get(3)?,
        is_anonymous: row.get::<_, i32>(4)? != 0,
        created_at: parse_datetime(&row.get::<_, String>(5)?)?,
    })
}
