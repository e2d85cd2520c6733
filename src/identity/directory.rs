//! User lifecycle over the identity provider and the `users` collection.
//!
//! Neither backend is transactional. Registration compensates a failed local write by
//! deleting the identity it just created; deletion is best-effort on both sides and
//! reports what it could not remove.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::principal::{normalize_email, AccessLevel, NewUser, Principal, ProfilePatch, SubRole};
use super::provider::IdentityProvider;
use crate::error::{AuthError, AuthResult};
use crate::security;
use crate::storage::{self, DocumentStore, USERS};

#[derive(Clone)]
pub struct UserDirectory {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
}

impl UserDirectory {
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self { provider, store }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> { &self.provider }

    pub async fn list(&self) -> AuthResult<Vec<Principal>> {
        Ok(storage::read_collection(self.store.as_ref(), USERS).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> AuthResult<Option<Principal>> {
        let email = normalize_email(email);
        Ok(self.list().await?.into_iter().find(|u| u.email.eq_ignore_ascii_case(&email)))
    }

    pub async fn find_by_id(&self, id: &str) -> AuthResult<Option<Principal>> {
        Ok(self.list().await?.into_iter().find(|u| u.id == id))
    }

    /// Append a local record. The very first record in an empty collection becomes Admin;
    /// every later one is forced to User.
    pub(crate) async fn insert(&self, mut principal: Principal) -> AuthResult<Principal> {
        storage::update_collection(self.store.as_ref(), USERS, move |users: &mut Vec<Principal>| {
            if users.iter().any(|u| u.email.eq_ignore_ascii_case(&principal.email)) {
                return Err(AuthError::EmailAlreadyExists);
            }
            principal.access_level = if users.is_empty() { AccessLevel::Admin } else { AccessLevel::User };
            users.push(principal.clone());
            Ok(principal)
        })
        .await
    }

    /// Apply `edit` to the record with this id and return the updated copy.
    async fn modify<F>(&self, id: &str, edit: F) -> AuthResult<Principal>
    where
        F: FnOnce(&mut Principal) + Send,
    {
        storage::update_collection(self.store.as_ref(), USERS, |users: &mut Vec<Principal>| -> AuthResult<Principal> {
            let user = users.iter_mut().find(|u| u.id == id).ok_or(AuthError::UserNotFound)?;
            edit(user);
            Ok(user.clone())
        })
        .await
    }

    /// Self-service registration. Access level and sub-role are never taken from the
    /// request; both are granted by an admin afterwards.
    pub async fn register(&self, new: NewUser) -> AuthResult<Principal> {
        let email = normalize_email(&new.email);
        if !security::is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if !security::is_strong_enough(&new.password) {
            return Err(AuthError::WeakPassword { min: security::MIN_PASSWORD_LEN });
        }
        if self.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }
        if new.sub_role.is_some() {
            warn!(email = %email, "user.register ignoring requested sub_role");
        }

        let identity = self.provider.create_user(&email, &new.password).await?;
        let principal = Principal {
            id: identity.uid.clone(),
            email,
            name: new.name.trim().to_string(),
            role: new.role,
            sub_role: None,
            location: new.location,
            access_level: AccessLevel::User,
            avatar_color: new.avatar_color,
            birthdate: new.birthdate,
            created_at: identity.created_at,
        };

        match self.insert(principal).await {
            Ok(saved) => {
                info!(user_id = %saved.id, access_level = ?saved.access_level, "user.register");
                Ok(saved)
            }
            Err(e) => {
                // Undo the identity so the email is not left half-registered
                if let Err(undo) = self.provider.delete_user(&identity.uid).await {
                    error!(uid = %identity.uid, error = %undo, "user.register compensation failed; orphan identity left behind");
                } else {
                    warn!(uid = %identity.uid, error = %e, "user.register rolled back identity");
                }
                Err(e)
            }
        }
    }

    pub async fn update_profile(&self, id: &str, patch: &ProfilePatch) -> AuthResult<Principal> {
        self.modify(id, |user| user.apply_patch(patch)).await
    }

    pub async fn set_access_level(&self, id: &str, level: AccessLevel) -> AuthResult<Principal> {
        let updated = self.modify(id, |user| user.access_level = level).await?;
        info!(user_id = id, access_level = ?level, "user.access_level");
        Ok(updated)
    }

    pub async fn set_sub_role(&self, id: &str, sub_role: Option<SubRole>) -> AuthResult<Principal> {
        let updated = self.modify(id, |user| user.sub_role = sub_role).await?;
        info!(user_id = id, sub_role = ?sub_role, "user.sub_role");
        Ok(updated)
    }

    /// Remove the local record, then the identity. Whatever was removed stays removed.
    pub async fn delete(&self, id: &str) -> AuthResult<()> {
        let local = storage::update_collection(self.store.as_ref(), USERS, |users: &mut Vec<Principal>| {
            let before = users.len();
            users.retain(|u| u.id != id);
            if users.len() == before { Err(AuthError::UserNotFound) } else { Ok(()) }
        })
        .await;
        let local_removed = match local {
            Ok(()) => true,
            Err(AuthError::UserNotFound) => false,
            Err(e) => return Err(e),
        };

        let outcome = self.provider.delete_user(id).await;
        let identity_removed = outcome.is_ok();
        match (local_removed, outcome) {
            (true, Ok(())) => {
                info!(user_id = id, "user.delete");
                Ok(())
            }
            (false, Err(AuthError::UserNotFound)) => Err(AuthError::UserNotFound),
            // Nothing was removed on either side
            (false, Err(e)) => {
                warn!(user_id = id, error = %e, "user.delete identity provider failed");
                Err(match e {
                    AuthError::ExternalServiceFailure(_) => e,
                    other => AuthError::ExternalServiceFailure(other.to_string()),
                })
            }
            (local_removed, outcome) => {
                let detail = match outcome {
                    Ok(()) => "local record not found".to_string(),
                    Err(e) => e.to_string(),
                };
                warn!(user_id = id, local_removed, identity_removed, detail = %detail, "user.delete partial");
                Err(AuthError::PartialDeletionFailure {
                    user_id: id.to_string(),
                    local_removed,
                    identity_removed,
                    detail,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::principal::{Location, Role};
    use crate::identity::provider::{IdentityRecord, LocalIdentityProvider, LogMailer};
    use crate::storage::{MemoryDocumentStore, RawUpdate, IDENTITIES};
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password: "segredo1".into(),
            name: "Teste".into(),
            role: Role::Pharmacist,
            sub_role: None,
            location: Location::Caf,
            avatar_color: None,
            birthdate: None,
        }
    }

    fn directory_over(store: Arc<dyn DocumentStore>) -> UserDirectory {
        let provider = Arc::new(LocalIdentityProvider::new(store.clone(), Arc::new(LogMailer)));
        UserDirectory::new(provider, store)
    }

    #[tokio::test]
    async fn first_registration_is_admin_rest_are_users() {
        let dir = directory_over(Arc::new(MemoryDocumentStore::new()));
        let first = dir.register(new_user("a@caf.test")).await.unwrap();
        let second = dir.register(new_user("b@caf.test")).await.unwrap();
        assert_eq!(first.access_level, AccessLevel::Admin);
        assert_eq!(second.access_level, AccessLevel::User);
        assert_eq!(dir.list().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_registrations_keep_every_account_usable() {
        let store = Arc::new(MemoryDocumentStore::new());
        let dir = directory_over(store.clone());
        let mut handles = Vec::new();
        for i in 0..8 {
            let dir = dir.clone();
            handles.push(tokio::spawn(async move { dir.register(new_user(&format!("u{i}@caf.test"))).await }));
        }
        let mut admins = 0;
        for h in handles {
            if h.await.unwrap().unwrap().is_admin() {
                admins += 1;
            }
        }
        assert_eq!(admins, 1);
        assert_eq!(dir.list().await.unwrap().len(), 8);
        assert_eq!(store.read_raw(IDENTITIES).await.unwrap().len(), 8);
        for i in 0..8 {
            assert!(dir.provider().verify_password(&format!("u{i}@caf.test"), "segredo1").await.unwrap(), "u{}", i);
        }
    }

    #[tokio::test]
    async fn requested_sub_role_is_ignored_until_an_admin_grants_it() {
        let dir = directory_over(Arc::new(MemoryDocumentStore::new()));
        dir.register(new_user("admin@caf.test")).await.unwrap();
        let mut wants_coordination = new_user("coord@hosp.test");
        wants_coordination.sub_role = Some(SubRole::Coordinator);
        wants_coordination.location = Location::Hospital;

        let p = dir.register(wants_coordination).await.unwrap();
        assert!(!p.is_coordinator());
        assert_eq!(p.access_level, AccessLevel::User);
        assert!(!dir.find_by_id(&p.id).await.unwrap().unwrap().is_coordinator());

        let granted = dir.set_sub_role(&p.id, Some(SubRole::Coordinator)).await.unwrap();
        assert!(granted.is_coordinator());
        assert_eq!(granted.location, Location::Hospital);
        assert!(matches!(dir.set_sub_role("missing", None).await, Err(AuthError::UserNotFound)));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_before_touching_the_provider() {
        let dir = directory_over(Arc::new(MemoryDocumentStore::new()));
        dir.register(new_user("a@caf.test")).await.unwrap();
        assert!(matches!(dir.register(new_user("A@CAF.test")).await, Err(AuthError::EmailAlreadyExists)));
    }

    /// Store whose writes to `users` always fail.
    struct BrokenUsers(MemoryDocumentStore);

    #[async_trait]
    impl DocumentStore for BrokenUsers {
        async fn read_raw(&self, collection: &str) -> anyhow::Result<Vec<JsonValue>> {
            self.0.read_raw(collection).await
        }
        async fn write_raw(&self, collection: &str, docs: Vec<JsonValue>) -> anyhow::Result<()> {
            if collection == USERS {
                anyhow::bail!("disk full");
            }
            self.0.write_raw(collection, docs).await
        }
        async fn update_raw(&self, collection: &str, apply: RawUpdate<'_>) -> anyhow::Result<()> {
            if collection == USERS {
                anyhow::bail!("disk full");
            }
            self.0.update_raw(collection, apply).await
        }
    }

    /// Local provider whose deletions always fail, as during an outage.
    struct UndeletableIdentities(LocalIdentityProvider);

    #[async_trait]
    impl IdentityProvider for UndeletableIdentities {
        async fn verify_password(&self, email: &str, password: &str) -> AuthResult<bool> {
            self.0.verify_password(email, password).await
        }
        async fn get_user_by_email(&self, email: &str) -> AuthResult<Option<IdentityRecord>> {
            self.0.get_user_by_email(email).await
        }
        async fn create_user(&self, email: &str, password: &str) -> AuthResult<IdentityRecord> {
            self.0.create_user(email, password).await
        }
        async fn delete_user(&self, _uid: &str) -> AuthResult<()> {
            Err(AuthError::ExternalServiceFailure("identity service unreachable".into()))
        }
        async fn send_password_reset(&self, email: &str) -> AuthResult<()> {
            self.0.send_password_reset(email).await
        }
        async fn reset_password(&self, code: &str, new_password: &str) -> AuthResult<()> {
            self.0.reset_password(code, new_password).await
        }
    }

    fn undeletable_over(store: Arc<dyn DocumentStore>) -> UserDirectory {
        let inner = LocalIdentityProvider::new(store.clone(), Arc::new(LogMailer));
        UserDirectory::new(Arc::new(UndeletableIdentities(inner)), store)
    }

    #[tokio::test]
    async fn failed_compensation_returns_the_original_error_and_leaves_the_identity() {
        let dir = undeletable_over(Arc::new(BrokenUsers(MemoryDocumentStore::new())));
        let err = dir.register(new_user("a@caf.test")).await.unwrap_err();
        match err {
            AuthError::ExternalServiceFailure(msg) => assert!(msg.contains("disk full"), "{}", msg),
            other => panic!("expected the local write failure, got {:?}", other),
        }
        assert!(dir.provider().get_user_by_email("a@caf.test").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_during_provider_outage_without_local_record_is_a_service_failure() {
        let dir = undeletable_over(Arc::new(MemoryDocumentStore::new()));
        let orphan = dir.provider().create_user("ghost@caf.test", "segredo1").await.unwrap();
        assert!(matches!(dir.delete(&orphan.uid).await, Err(AuthError::ExternalServiceFailure(_))));
    }

    #[tokio::test]
    async fn failed_local_write_deletes_the_new_identity() {
        let dir = directory_over(Arc::new(BrokenUsers(MemoryDocumentStore::new())));
        let err = dir.register(new_user("a@caf.test")).await.unwrap_err();
        assert!(matches!(err, AuthError::ExternalServiceFailure(_)));
        assert!(dir.provider().get_user_by_email("a@caf.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_profile_merges_patch() {
        let dir = directory_over(Arc::new(MemoryDocumentStore::new()));
        let p = dir.register(new_user("a@caf.test")).await.unwrap();
        let patch = ProfilePatch { name: None, birthdate: None, avatar_color: Some("#00ff00".into()) };
        let updated = dir.update_profile(&p.id, &patch).await.unwrap();
        assert_eq!(updated.name, "Teste");
        assert_eq!(updated.avatar_color.as_deref(), Some("#00ff00"));
        assert!(matches!(dir.update_profile("missing", &patch).await, Err(AuthError::UserNotFound)));
    }

    #[tokio::test]
    async fn delete_cascades_and_reports_partial_failures() {
        let dir = directory_over(Arc::new(MemoryDocumentStore::new()));
        let a = dir.register(new_user("a@caf.test")).await.unwrap();
        let b = dir.register(new_user("b@caf.test")).await.unwrap();

        dir.delete(&a.id).await.unwrap();
        assert!(dir.find_by_id(&a.id).await.unwrap().is_none());
        assert!(dir.provider().get_user_by_email("a@caf.test").await.unwrap().is_none());

        // identity already gone: local record still removed, failure reported
        dir.provider().delete_user(&b.id).await.unwrap();
        match dir.delete(&b.id).await {
            Err(AuthError::PartialDeletionFailure { local_removed, identity_removed, .. }) => {
                assert!(local_removed);
                assert!(!identity_removed);
            }
            other => panic!("expected partial deletion, got {:?}", other),
        }
        assert!(dir.find_by_id(&b.id).await.unwrap().is_none());

        assert!(matches!(dir.delete("nobody").await, Err(AuthError::UserNotFound)));
    }

    #[tokio::test]
    async fn orphan_identity_is_removed_and_reported() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let dir = directory_over(store);
        let orphan = dir.provider().create_user("ghost@caf.test", "segredo1").await.unwrap();
        match dir.delete(&orphan.uid).await {
            Err(AuthError::PartialDeletionFailure { local_removed, identity_removed, .. }) => {
                assert!(!local_removed);
                assert!(identity_removed);
            }
            other => panic!("expected partial deletion, got {:?}", other),
        }
    }
}
