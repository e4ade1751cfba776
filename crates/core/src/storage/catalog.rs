//! Subject and material storage operations

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::parse::{format_datetime, parse_datetime, parse_uuid};
use crate::error::Result;
use crate::models::{Material, Subject};

pub struct CatalogStore<'a> {
    conn: &'a Connection,
}

impl<'a> CatalogStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create_subject(&self, subject: &Subject) -> Result<()> {
        self.conn.execute(
            "INSERT INTO subjects (id, code, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                subject.id.to_string(),
                subject.code,
                subject.name,
                format_datetime(&subject.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_subjects(&self) -> Result<Vec<Subject>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, code, name, created_at FROM subjects ORDER BY code")?;
        let subjects = stmt
            .query_map([], |row| {
                Ok(Subject {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    pub fn create_material(&self, material: &Material) -> Result<()> {
        self.conn.execute(
            "INSERT INTO materials (id, subject_id, title, url, uploaded_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                material.id.to_string(),
                material.subject_id.to_string(),
                material.title,
                material.url,
                material.uploaded_by.to_string(),
                format_datetime(&material.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_materials(&self, subject_id: Uuid) -> Result<Vec<Material>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject_id, title, url, uploaded_by, created_at
             FROM materials WHERE subject_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let materials = stmt
            .query_map(params![subject_id.to_string()], |row| {
                Ok(Material {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    subject_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    title: row.get(2)?,
                    url: row.get(3)?,
                    uploaded_by: parse_uuid(&row.get::<_, String>(4)?)?,
                    created_at: parse_datetime(&row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(materials)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::models::{Material, Subject};
    use crate::storage::Database;
    use crate::Error;

    #[test]
    fn test_subject_code_unique() {
        let db = Database::open_in_memory().unwrap();
        db.catalog().create_subject(&Subject::new("CS101".into(), "Intro".into())).unwrap();
        let err = db
            .catalog()
            .create_subject(&Subject::new("CS101".into(), "Again".into()))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_material_requires_subject() {
        let db = Database::open_in_memory().unwrap();
        let orphan = Material::new(Uuid::new_v4(), "Notes".into(), "file:///x".into(), Uuid::new_v4());
        assert!(matches!(db.catalog().create_material(&orphan), Err(Error::Database(_))));
    }

    #[test]
    fn test_materials_scoped_to_subject() {
        let db = Database::open_in_memory().unwrap();
        let cs = Subject::new("CS101".into(), "Intro".into());
        let ma = Subject::new("MA101".into(), "Calculus".into());
        db.catalog().create_subject(&cs).unwrap();
        db.catalog().create_subject(&ma).unwrap();

        let notes = Material::new(cs.id, "Notes".into(), "file:///notes".into(), Uuid::new_v4());
        db.catalog().create_material(&notes).unwrap();

        assert_eq!(db.catalog().list_materials(cs.id).unwrap(), vec![notes]);
        assert!(db.catalog().list_materials(ma.id).unwrap().is_empty());
    }
}
