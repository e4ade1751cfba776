//! Application paths and the persisted session record

use std::path::{Path, PathBuf};

use campus_core::{Error, SessionRecord};
use directories::ProjectDirs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

const SESSION_FILE: &str = "session.json";

/// Where the client keeps its files
#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("edu", "campus", "campus-portal").ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine data directory",
            ))
        })?;
        Self::with_data_dir(dirs.data_dir())
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn session_file(&self) -> SessionFile {
        SessionFile {
            path: self.data_dir.join(SESSION_FILE),
        }
    }
}

/// Single-record session store, restored across restarts
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), "Saved session");
        Ok(())
    }

    /// Load a valid record. Unreadable or malformed records are removed.
    pub fn load(&self) -> Result<Option<(Uuid, SessionRecord)>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: SessionRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session record");
                self.clear()?;
                return Ok(None);
            }
        };

        match record.user_id() {
            Some(user_id) => Ok(Some((user_id, record))),
            None => {
                warn!(id = %record.id, "Discarding invalid session record");
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::{Profile, Role};
    use tempfile::tempdir;

    fn record() -> SessionRecord {
        let profile = Profile::new(Uuid::new_v4(), "Asha".into(), "9999999999".into(), Role::Student);
        SessionRecord::for_profile(&profile, "Asha Verma")
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();
        let record = record();

        file.save(&record).unwrap();
        let (user_id, loaded) = file.load().unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(user_id.to_string(), record.id);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();
        assert!(file.load().unwrap().is_none());
        file.clear().unwrap();
    }

    #[test]
    fn test_bad_id_is_discarded() {
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();
        let mut record = record();
        record.id = "not-a-uuid".into();
        file.save(&record).unwrap();

        assert!(file.load().unwrap().is_none());
        assert!(!file.path().exists());
    }

    #[test]
    fn test_garbage_is_discarded() {
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();
        std::fs::write(file.path(), b"{ not json").unwrap();

        assert!(file.load().unwrap().is_none());
        assert!(!file.path().exists());
    }
}
