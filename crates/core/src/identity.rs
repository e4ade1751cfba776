//! Identity resolution
//!
//! There is no password store: a credential maps to exactly one identity,
//! whose id is derived from the credential itself so that repeated logins
//! land on the same record.

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::directory::Lookup;
use crate::error::{Error, Result};
use crate::models::{Profile, Role};
use crate::storage::ProfileRepository;

/// Number of digits a student credential must have
pub const STUDENT_CREDENTIAL_DIGITS: usize = 10;

/// Reserved credential granting the admin role unless configured otherwise
pub const DEFAULT_ADMIN_CREDENTIAL: &str = "admin123";

/// Rules applied to a login attempt before any store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPolicy {
    pub admin_credential: String,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            admin_credential: DEFAULT_ADMIN_CREDENTIAL.to_string(),
        }
    }
}

impl LoginPolicy {
    pub fn new(admin_credential: impl Into<String>) -> Self {
        Self {
            admin_credential: admin_credential.into(),
        }
    }

    pub fn is_admin_credential(&self, credential: &str) -> bool {
        credential == self.admin_credential
    }

    /// Validate name and credential. The admin credential is free-form;
    /// everything else must be exactly ten ASCII digits.
    pub fn validate(&self, name: &str, credential: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if credential.is_empty() {
            return Err(Error::Validation("credential must not be empty".into()));
        }
        if self.is_admin_credential(credential) {
            return Ok(());
        }
        if credential.len() != STUDENT_CREDENTIAL_DIGITS
            || !credential.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(Error::Validation(format!(
                "credential must be exactly {} digits",
                STUDENT_CREDENTIAL_DIGITS
            )));
        }
        Ok(())
    }

    pub fn role_for(&self, credential: &str) -> Role {
        if self.is_admin_credential(credential) {
            Role::Admin
        } else {
            Role::Student
        }
    }
}

/// Derive the stable identity id for a credential.
///
/// Each credential byte is hex encoded and the digits are concatenated,
/// then truncated or right-padded with `0` to the 32 hex digits of a UUID.
/// Hex-encoding a byte and parsing it back is the identity, so this is the
/// credential's first 16 bytes, zero padded.
pub fn derive_profile_id(credential: &str) -> Uuid {
    let mut bytes = [0u8; 16];
    for (slot, b) in bytes.iter_mut().zip(credential.bytes()) {
        *slot = b;
    }
    Uuid::from_bytes(bytes)
}

/// Map a login credential to its identity, creating it on first use.
///
/// An existing identity is returned unchanged; the display name in the
/// session may differ from the stored one. A conflicting insert (another
/// session created the same identity first) is settled by looking the
/// credential up again rather than retrying the insert.
#[instrument(skip(repo, policy, name, credential))]
pub fn resolve<R: ProfileRepository + ?Sized>(
    repo: &R,
    policy: &LoginPolicy,
    name: &str,
    credential: &str,
) -> Result<Lookup<Profile>> {
    policy.validate(name, credential)?;

    if let Some(existing) = repo.find_profile_by_credential(credential)? {
        debug!(profile_id = %existing.id, "Resolved existing identity");
        return Ok(Lookup::Found(existing));
    }

    let profile = Profile::new(
        derive_profile_id(credential),
        name.trim().to_string(),
        credential.to_string(),
        policy.role_for(credential),
    );

    match repo.create_profile(&profile) {
        Ok(()) => {
            info!(profile_id = %profile.id, role = profile.role.as_str(), "Created identity");
            Ok(Lookup::Created(profile))
        }
        Err(e) if e.is_conflict() => {
            warn!(profile_id = %profile.id, "Identity insert conflicted, re-resolving");
            match repo.find_profile_by_credential(credential)? {
                Some(existing) => Ok(Lookup::Found(existing)),
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_derived_id_is_hex_of_credential() {
        let id = derive_profile_id("9999999999");
        assert_eq!(id.to_string(), "39393939-3939-3939-3939-000000000000");
        assert_eq!(derive_profile_id("9999999999"), id);
        assert_ne!(derive_profile_id("9999999998"), id);
    }

    #[test]
    fn test_long_credentials_truncate() {
        let id = derive_profile_id("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(id.simple().to_string(), "6162636465666768696a6b6c6d6e6f70");
    }

    #[test]
    fn test_validation() {
        let policy = LoginPolicy::default();
        assert!(policy.validate("Asha", "9999999999").is_ok());
        assert!(policy.validate("Admin", "admin123").is_ok());
        assert!(matches!(policy.validate("", "9999999999"), Err(Error::Validation(_))));
        assert!(matches!(policy.validate("Asha", ""), Err(Error::Validation(_))));
        assert!(matches!(policy.validate("Asha", "12345"), Err(Error::Validation(_))));
        assert!(matches!(policy.validate("Asha", "12345abcde"), Err(Error::Validation(_))));
        assert!(matches!(policy.validate("Asha", "99999999999"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let db = Database::open_in_memory().unwrap();
        let policy = LoginPolicy::default();

        let first = resolve(&db, &policy, "Asha", "9999999999").unwrap();
        assert!(first.was_created());
        let first = first.into_inner();
        assert_eq!(first.id, derive_profile_id("9999999999"));
        assert_eq!(first.role, Role::Student);

        let second = resolve(&db, &policy, "Asha Verma", "9999999999").unwrap();
        assert!(!second.was_created());
        let second = second.into_inner();
        assert_eq!(second.id, first.id);
        // Stored record is returned unchanged
        assert_eq!(second.name, "Asha");
    }

    #[test]
    fn test_admin_credential_gets_admin_role() {
        let db = Database::open_in_memory().unwrap();
        let admin = resolve(&db, &LoginPolicy::default(), "Warden", "admin123")
            .unwrap()
            .into_inner();
        assert_eq!(admin.role, Role::Admin);
    }

    #[test]
    fn test_invalid_login_never_touches_store() {
        let db = Database::open_in_memory().unwrap();
        assert!(resolve(&db, &LoginPolicy::default(), "Asha", "123").is_err());
        assert!(db.profiles().list().unwrap().is_empty());
    }

    /// Another session inserts the same identity between our lookup and
    /// our insert
    struct LosesInsertRace {
        db: Database,
        rival: Profile,
    }

    impl ProfileRepository for LosesInsertRace {
        fn create_profile(&self, profile: &Profile) -> Result<()> {
            self.db.create_profile(&self.rival)?;
            self.db.create_profile(profile)
        }

        fn find_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>> {
            self.db.find_profile_by_id(id)
        }

        fn find_profile_by_credential(&self, credential: &str) -> Result<Option<Profile>> {
            self.db.find_profile_by_credential(credential)
        }

        fn list_profiles(&self) -> Result<Vec<Profile>> {
            self.db.list_profiles()
        }

        fn set_online(&self, user_id: Uuid, is_online: bool) -> Result<()> {
            self.db.set_online(user_id, is_online)
        }

        fn touch_last_seen(&self, user_id: Uuid) -> Result<()> {
            self.db.touch_last_seen(user_id)
        }

        fn delete_profile(&self, user_id: Uuid) -> Result<()> {
            self.db.delete_profile(user_id)
        }
    }

    #[test]
    fn test_conflicting_insert_resolves_to_winner() {
        let credential = "9999999999";
        let rival = Profile::new(
            derive_profile_id(credential),
            "Asha Verma".into(),
            credential.into(),
            Role::Student,
        );
        let repo = LosesInsertRace {
            db: Database::open_in_memory().unwrap(),
            rival: rival.clone(),
        };

        let lookup = resolve(&repo, &LoginPolicy::default(), "Asha", credential).unwrap();
        assert!(!lookup.was_created());
        let found = lookup.into_inner();
        assert_eq!(found.id, rival.id);
        assert_eq!(found.name, "Asha Verma");
        assert_eq!(repo.list_profiles().unwrap().len(), 1);
    }
}
