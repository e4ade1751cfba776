//! Notice board storage operations

use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{format_datetime, parse_datetime, parse_uuid};
use crate::error::{Error, Result};
use crate::models::Notice;

pub struct NoticeStore<'a> {
    conn: &'a Connection,
}

impl<'a> NoticeStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, notice), fields(notice_id = %notice.id))]
    pub fn create(&self, notice: &Notice) -> Result<()> {
        self.conn.execute(
            "INSERT INTO notices (id, title, body, author_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                notice.id.to_string(),
                notice.title,
                notice.body,
                notice.author_id.to_string(),
                format_datetime(&notice.created_at),
            ],
        )?;
        Ok(())
    }

    /// Replace title and body of an existing notice
    #[instrument(skip(self, notice), fields(notice_id = %notice.id))]
    pub fn update(&self, notice: &Notice) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE notices SET title = ?1, body = ?2 WHERE id = ?3",
            params![notice.title, notice.body, notice.id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("notice {}", notice.id)));
        }
        Ok(())
    }

    pub fn delete(&self, notice_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM notices WHERE id = ?1",
            params![notice_id.to_string()],
        )?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Notice>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, body, author_id, created_at FROM notices ORDER BY created_at DESC, id DESC",
        )?;
        let notices = stmt
            .query_map([], |row| {
                Ok(Notice {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    title: row.get(1)?,
                    body: row.get(2)?,
                    author_id: parse_uuid(&row.get::<_, String>(3)?)?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notices)
    }
}
