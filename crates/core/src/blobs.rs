//! Local object storage for uploaded files
//!
//! Blobs live under `<data dir>/blobs/<bucket>/<path>` and are addressed by
//! `file://` URLs.

use std::fs;
use std::path::{Component, Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Blob store in the platform data directory
    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("edu", "campus", "campus-portal").ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine data directory",
            ))
        })?;
        Ok(Self::with_root(dirs.data_dir().join("blobs")))
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` at `bucket/path` and return its public URL
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn upload(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<String> {
        validate_segment(bucket)?;
        let relative = validate_path(path)?;

        let target = self.root.join(bucket).join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;

        let absolute = fs::canonicalize(&target)?;
        debug!(path = %absolute.display(), "Stored blob");
        Ok(format!("file://{}", absolute.display()))
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(Error::Validation(format!("invalid bucket name: {:?}", segment)));
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    if path.is_empty() || path.ends_with('/') {
        return Err(Error::Validation(format!("invalid blob path: {:?}", path)));
    }
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            _ => return Err(Error::Validation(format!("invalid blob path: {:?}", path))),
        }
    }
    Ok(clean)
}
