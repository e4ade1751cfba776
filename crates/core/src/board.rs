//! Notice board operations
//!
//! Notices are posted and maintained by admins; everyone reads them newest
//! first.

use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Notice, Profile};
use crate::storage::NoticeRepository;

fn require_admin(profile: &Profile) -> Result<()> {
    if profile.is_admin() {
        Ok(())
    } else {
        Err(Error::PermissionDenied("only admins manage notices".into()))
    }
}

fn validate(title: &str, body: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::Validation("notice title is required".into()));
    }
    if body.trim().is_empty() {
        return Err(Error::Validation("notice body is required".into()));
    }
    Ok(())
}

pub fn list_notices<R: NoticeRepository + ?Sized>(repo: &R) -> Result<Vec<Notice>> {
    repo.list_notices()
}

#[instrument(skip(repo, author, body), fields(author_id = %author.id))]
pub fn post_notice<R: NoticeRepository + ?Sized>(
    repo: &R,
    author: &Profile,
    title: &str,
    body: &str,
) -> Result<Notice> {
    require_admin(author)?;
    validate(title, body)?;

    let notice = Notice::new(title.trim().to_string(), body.trim().to_string(), author.id);
    repo.create_notice(&notice)?;
    info!(notice_id = %notice.id, "Posted notice");
    Ok(notice)
}

/// Replace the title and body of an existing notice
#[instrument(skip(repo, editor, notice), fields(notice_id = %notice.id))]
pub fn update_notice<R: NoticeRepository + ?Sized>(
    repo: &R,
    editor: &Profile,
    notice: &Notice,
    title: &str,
    body: &str,
) -> Result<Notice> {
    require_admin(editor)?;
    validate(title, body)?;

    let updated = Notice {
        title: title.trim().to_string(),
        body: body.trim().to_string(),
        ..notice.clone()
    };
    repo.update_notice(&updated)?;
    Ok(updated)
}

#[instrument(skip(repo, editor))]
pub fn delete_notice<R: NoticeRepository + ?Sized>(repo: &R, editor: &Profile, notice_id: Uuid) -> Result<()> {
    require_admin(editor)?;
    repo.delete_notice(notice_id)
}
