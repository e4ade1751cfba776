//! Session lifecycle: login, restore, heartbeat, logout

use std::time::Duration;

use campus_core::{Error as CoreError, Profile, SessionRecord};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::Result;
use crate::state::SessionFile;

/// A logged-in user
pub struct Session {
    profile: Profile,
    /// Name supplied at login; may differ from the stored profile name
    display_name: String,
    heartbeat: Option<JoinHandle<()>>,
}

impl Session {
    /// Validate, resolve the identity, go online, seed rooms, persist.
    ///
    /// Input is validated before anything touches the backend.
    pub async fn login(
        backend: &Backend,
        file: &SessionFile,
        name: &str,
        credential: &str,
        heartbeat: Duration,
    ) -> Result<Self> {
        let credential = credential.trim();
        backend.policy().validate(name, credential)?;

        let profile = backend.resolve_identity(name, credential).await?;
        let display_name = name.trim().to_string();

        let session = Self::start(backend, profile, display_name, heartbeat).await?;
        file.save(&SessionRecord::for_profile(&session.profile, &session.display_name))?;
        info!(user_id = %session.user_id(), admin = session.is_admin(), "Logged in");
        Ok(session)
    }

    /// Resume a persisted session, if a valid one exists and its identity
    /// still does
    pub async fn restore(backend: &Backend, file: &SessionFile, heartbeat: Duration) -> Result<Option<Self>> {
        let Some((user_id, record)) = file.load()? else {
            return Ok(None);
        };

        match backend.find_profile(user_id).await? {
            Some(profile) if profile.credential == record.credential => {
                let session = Self::start(backend, profile, record.name, heartbeat).await?;
                info!(user_id = %user_id, "Session restored");
                Ok(Some(session))
            }
            _ => {
                warn!(user_id = %user_id, "Persisted session no longer matches an identity");
                file.clear()?;
                Ok(None)
            }
        }
    }

    async fn start(backend: &Backend, profile: Profile, display_name: String, heartbeat: Duration) -> Result<Self> {
        if let Err(e) = backend.set_online(profile.id, true).await {
            warn!(error = %e, "Failed to set presence");
        }
        backend.ensure_default_rooms().await?;

        let heartbeat = spawn_heartbeat(backend.clone(), profile.id, heartbeat);
        Ok(Self {
            profile,
            display_name,
            heartbeat: Some(heartbeat),
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn user_id(&self) -> Uuid {
        self.profile.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_admin(&self) -> bool {
        self.profile.is_admin()
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied("admin only".into()).into())
        }
    }

    /// Go offline (best effort) and forget the persisted record
    pub async fn logout(mut self, backend: &Backend, file: &SessionFile) {
        self.stop_heartbeat();
        if let Err(e) = backend.set_online(self.profile.id, false).await {
            warn!(error = %e, "Failed to clear presence on logout");
        }
        if let Err(e) = file.clear() {
            warn!(error = %e, "Failed to remove session record");
        }
        info!(user_id = %self.profile.id, "Logged out");
    }

    /// Go offline (best effort) but keep the record for the next start
    pub async fn suspend(mut self, backend: &Backend) {
        self.stop_heartbeat();
        if let Err(e) = backend.set_online(self.profile.id, false).await {
            warn!(error = %e, "Failed to clear presence on exit");
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

fn spawn_heartbeat(backend: Backend, user_id: Uuid, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick fires immediately; going online already counted
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match backend.touch(user_id).await {
                Ok(()) => debug!(user_id = %user_id, "Heartbeat"),
                Err(e) => warn!(user_id = %user_id, error = %e, "Heartbeat failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::test_backend;
    use crate::state::AppPaths;
    use campus_core::{derive_profile_id, Role};
    use tempfile::tempdir;

    const BEAT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_relogin_keeps_identity_and_uses_new_name() {
        let (backend, _blobs) = test_backend();
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();

        let first = Session::login(&backend, &file, "Asha", "9999999999", BEAT).await.unwrap();
        assert_eq!(first.user_id().to_string(), "39393939-3939-3939-3939-000000000000");
        assert_eq!(first.user_id(), derive_profile_id("9999999999"));
        assert_eq!(first.profile().role, Role::Student);
        first.logout(&backend, &file).await;

        let second = Session::login(&backend, &file, "Asha Verma", "9999999999", BEAT).await.unwrap();
        assert_eq!(second.user_id(), derive_profile_id("9999999999"));
        assert_eq!(second.display_name(), "Asha Verma");
        assert_eq!(second.profile().name, "Asha");
        assert_eq!(backend.list_profiles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_credential_skips_digit_check() {
        let (backend, _blobs) = test_backend();
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();

        let session = Session::login(&backend, &file, "Registrar", "admin123", BEAT).await.unwrap();
        assert!(session.is_admin());
        assert!(session.require_admin().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_credential_rejected_before_backend() {
        let (backend, _blobs) = test_backend();
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();

        let err = Session::login(&backend, &file, "Asha", "12345", BEAT).await.err().unwrap();
        assert!(err.is_validation());
        let err = Session::login(&backend, &file, "  ", "9999999999", BEAT).await.err().unwrap();
        assert!(err.is_validation());

        assert!(backend.list_profiles().await.unwrap().is_empty());
        assert!(backend.list_rooms().await.unwrap().is_empty());
        assert!(file.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_goes_online_and_seeds_rooms() {
        let (backend, _blobs) = test_backend();
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();

        let session = Session::login(&backend, &file, "Asha", "9999999999", BEAT).await.unwrap();
        let stored = backend.find_profile(session.user_id()).await.unwrap().unwrap();
        assert!(stored.is_online);

        let rooms = backend.list_rooms().await.unwrap();
        assert_eq!(rooms.len(), 2);
        assert!(session.require_admin().unwrap_err().is_permission_denied());
    }

    #[tokio::test]
    async fn test_restore_and_logout() {
        let (backend, _blobs) = test_backend();
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();

        let session = Session::login(&backend, &file, "Asha Verma", "9999999999", BEAT).await.unwrap();
        let user_id = session.user_id();
        session.suspend(&backend).await;
        assert!(!backend.find_profile(user_id).await.unwrap().unwrap().is_online);

        let restored = Session::restore(&backend, &file, BEAT).await.unwrap().unwrap();
        assert_eq!(restored.user_id(), user_id);
        assert_eq!(restored.display_name(), "Asha Verma");
        assert!(backend.find_profile(user_id).await.unwrap().unwrap().is_online);

        restored.logout(&backend, &file).await;
        assert!(!backend.find_profile(user_id).await.unwrap().unwrap().is_online);
        assert!(Session::restore(&backend, &file, BEAT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_discards_record_for_missing_identity() {
        let (backend, _blobs) = test_backend();
        let dir = tempdir().unwrap();
        let file = AppPaths::with_data_dir(dir.path()).unwrap().session_file();

        let ghost = Profile::new(Uuid::new_v4(), "Ghost".into(), "7777777777".into(), Role::Student);
        file.save(&SessionRecord::for_profile(&ghost, "Ghost")).unwrap();

        assert!(Session::restore(&backend, &file, BEAT).await.unwrap().is_none());
        assert!(!file.path().exists());
    }
}
