//! Profile storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    format_datetime, parse_datetime, parse_datetime_opt, parse_role, parse_uuid, OptionalExt,
};
use crate::error::Result;
use crate::models::{now, Profile};

const PROFILE_COLUMNS: &str =
    "id, name, credential, role, is_online, last_seen_at, avatar_ref, created_at";

pub struct ProfileStore<'a> {
    conn: &'a Connection,
}

impl<'a> ProfileStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, profile), fields(profile_id = %profile.id))]
    pub fn create(&self, profile: &Profile) -> Result<()> {
        self.conn.execute(
            "INSERT INTO profiles (id, name, credential, role, is_online, last_seen_at, avatar_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                profile.id.to_string(),
                profile.name,
                profile.credential,
                profile.role.as_str(),
                profile.is_online as i32,
                profile.last_seen_at.as_ref().map(format_datetime),
                profile.avatar_ref,
                format_datetime(&profile.created_at),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS);
        let profile = self
            .conn
            .query_row(&sql, params![id.to_string()], map_profile)
            .optional()?;
        Ok(profile)
    }

    #[instrument(skip(self, credential))]
    pub fn find_by_credential(&self, credential: &str) -> Result<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE credential = ?1", PROFILE_COLUMNS);
        let profile = self
            .conn
            .query_row(&sql, params![credential], map_profile)
            .optional()?;
        Ok(profile)
    }

    pub fn list(&self) -> Result<Vec<Profile>> {
        let sql = format!("SELECT {} FROM profiles ORDER BY name, id", PROFILE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let profiles = stmt
            .query_map([], map_profile)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    #[instrument(skip(self))]
    pub fn set_online(&self, user_id: Uuid, is_online: bool) -> Result<()> {
        if is_online {
            self.conn.execute(
                "UPDATE profiles SET is_online = 1, last_seen_at = ?1 WHERE id = ?2",
                params![format_datetime(&now()), user_id.to_string()],
            )?;
        } else {
            self.conn.execute(
                "UPDATE profiles SET is_online = 0 WHERE id = ?1",
                params![user_id.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn touch_last_seen(&self, user_id: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE profiles SET last_seen_at = ?1 WHERE id = ?2",
            params![format_datetime(&now()), user_id.to_string()],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete(&self, user_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM profiles WHERE id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(())
    }
}

fn map_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        credential: row.get(2)?,
        role: parse_role(&row.get::<_, String>(3)?)?,
        is_online: row.get::<_, i32>(4)? != 0,
        last_seen_at: parse_datetime_opt(row.get::<_, Option<String>>(5)?)?,
        avatar_ref: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::models::{Profile, Role};
    use crate::storage::Database;
    use crate::Error;
    use uuid::Uuid;

    fn profile(credential: &str) -> Profile {
        Profile::new(Uuid::new_v4(), "Asha".into(), credential.into(), Role::Student)
    }

    #[test]
    fn test_create_and_find() {
        let db = Database::open_in_memory().unwrap();
        let p = profile("9999999999");
        db.profiles().create(&p).unwrap();

        assert_eq!(db.profiles().find_by_id(p.id).unwrap(), Some(p.clone()));
        assert_eq!(db.profiles().find_by_credential("9999999999").unwrap(), Some(p));
        assert!(db.profiles().find_by_credential("0000000000").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_credential_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.profiles().create(&profile("9999999999")).unwrap();
        let err = db.profiles().create(&profile("9999999999")).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "got {:?}", err);
    }

    #[test]
    fn test_online_flag_and_last_seen() {
        let db = Database::open_in_memory().unwrap();
        let p = profile("1234567890");
        db.profiles().create(&p).unwrap();

        db.profiles().set_online(p.id, true).unwrap();
        let stored = db.profiles().find_by_id(p.id).unwrap().unwrap();
        assert!(stored.is_online);
        assert!(stored.last_seen_at.is_some());

        db.profiles().set_online(p.id, false).unwrap();
        let stored = db.profiles().find_by_id(p.id).unwrap().unwrap();
        assert!(!stored.is_online);
        assert!(stored.last_seen_at.is_some());
    }
}
