//! Subject and material catalog operations

use tracing::{info, instrument};
use uuid::Uuid;

use crate::blobs::BlobStore;
use crate::error::{Error, Result};
use crate::models::{Material, Subject};
use crate::storage::CatalogRepository;

/// Bucket holding uploaded study material
pub const MATERIALS_BUCKET: &str = "materials";

pub fn create_subject<R: CatalogRepository + ?Sized>(repo: &R, code: &str, name: &str) -> Result<Subject> {
    let (code, name) = (code.trim(), name.trim());
    if code.is_empty() || name.is_empty() {
        return Err(Error::Validation("subject code and name are required".into()));
    }
    let subject = Subject::new(code.to_uppercase(), name.to_string());
    repo.create_subject(&subject)?;
    Ok(subject)
}

/// Upload a file and record it as material of `subject_id`
#[instrument(skip(repo, blobs, bytes))]
pub fn add_material<R: CatalogRepository + ?Sized>(
    repo: &R,
    blobs: &BlobStore,
    subject_id: Uuid,
    title: &str,
    file_name: &str,
    bytes: &[u8],
    uploaded_by: Uuid,
) -> Result<Material> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::Validation("material title is required".into()));
    }
    if file_name.contains(['/', '\\']) {
        return Err(Error::Validation(format!("invalid file name: {:?}", file_name)));
    }

    let mut material = Material::new(subject_id, title.to_string(), String::new(), uploaded_by);
    let path = format!("{}/{}-{}", subject_id, material.id.simple(), file_name);
    material.url = blobs.upload(MATERIALS_BUCKET, &path, bytes)?;

    repo.create_material(&material)?;
    info!(material_id = %material.id, "Added material");
    Ok(material)
}
