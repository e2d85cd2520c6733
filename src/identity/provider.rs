use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::principal::normalize_email;
use crate::error::{AuthError, AuthResult};
use crate::security;
use crate::storage::{self, DocumentStore, IDENTITIES, PASSWORD_RESETS};

/// Public view of an identity. The password hash never leaves the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub uid: String,
    pub email: String,
    pub created_at: i64,
}

/// The credential authority. Owns password hashes and reset flows; knows nothing
/// about roles or locations.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_password(&self, email: &str, password: &str) -> AuthResult<bool>;
    async fn get_user_by_email(&self, email: &str) -> AuthResult<Option<IdentityRecord>>;
    /// Fails with `EmailAlreadyExists`, `InvalidEmail` or `WeakPassword`.
    async fn create_user(&self, email: &str, password: &str) -> AuthResult<IdentityRecord>;
    /// Fails with `UserNotFound` when no identity has this uid.
    async fn delete_user(&self, uid: &str) -> AuthResult<()>;
    /// Succeeds silently for unknown emails.
    async fn send_password_reset(&self, email: &str) -> AuthResult<()>;
    async fn reset_password(&self, code: &str, new_password: &str) -> AuthResult<()>;
}

/// Delivery channel for password reset codes.
#[async_trait]
pub trait ResetMailer: Send + Sync {
    async fn deliver(&self, email: &str, code: &str) -> AuthResult<()>;
}

/// Writes reset codes to the log. Stand-in for a real mail relay.
pub struct LogMailer;

#[async_trait]
impl ResetMailer for LogMailer {
    async fn deliver(&self, email: &str, code: &str) -> AuthResult<()> {
        info!(target: "mail", email = email, code = code, "password reset code issued");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredIdentity {
    uid: String,
    email: String,
    password_hash: String,
    created_at: i64,
}

impl StoredIdentity {
    fn public(&self) -> IdentityRecord {
        IdentityRecord { uid: self.uid.clone(), email: self.email.clone(), created_at: self.created_at }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PasswordReset {
    code: String,
    email: String,
    /// Epoch milliseconds.
    expires_at: i64,
}

/// Identity provider keeping Argon2 hashes in the document store.
pub struct LocalIdentityProvider {
    store: Arc<dyn DocumentStore>,
    mailer: Arc<dyn ResetMailer>,
    reset_ttl: Duration,
}

impl LocalIdentityProvider {
    pub fn new(store: Arc<dyn DocumentStore>, mailer: Arc<dyn ResetMailer>) -> Self {
        Self { store, mailer, reset_ttl: Duration::from_secs(3600) }
    }

    pub fn with_reset_ttl(mut self, ttl: Duration) -> Self {
        self.reset_ttl = ttl;
        self
    }

    async fn find(&self, email: &str) -> AuthResult<Option<StoredIdentity>> {
        let email = normalize_email(email);
        let all: Vec<StoredIdentity> = storage::read_collection(self.store.as_ref(), IDENTITIES).await?;
        Ok(all.into_iter().find(|i| i.email == email))
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn verify_password(&self, email: &str, password: &str) -> AuthResult<bool> {
        match self.find(email).await? {
            Some(identity) => Ok(security::verify_password(&identity.password_hash, password)),
            None => {
                security::burn_verify(password);
                Ok(false)
            }
        }
    }

    async fn get_user_by_email(&self, email: &str) -> AuthResult<Option<IdentityRecord>> {
        Ok(self.find(email).await?.map(|i| i.public()))
    }

    async fn create_user(&self, email: &str, password: &str) -> AuthResult<IdentityRecord> {
        let email = normalize_email(email);
        if !security::is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if !security::is_strong_enough(password) {
            return Err(AuthError::WeakPassword { min: security::MIN_PASSWORD_LEN });
        }
        // Hash outside the store lock
        let identity = StoredIdentity {
            uid: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash: security::hash_password(password)?,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let public = identity.public();
        storage::update_collection(self.store.as_ref(), IDENTITIES, move |all: &mut Vec<StoredIdentity>| {
            if all.iter().any(|i| i.email == identity.email) {
                return Err(AuthError::EmailAlreadyExists);
            }
            all.push(identity);
            Ok(())
        })
        .await?;
        debug!(uid = %public.uid, "identity.create");
        Ok(public)
    }

    async fn delete_user(&self, uid: &str) -> AuthResult<()> {
        storage::update_collection(self.store.as_ref(), IDENTITIES, |all: &mut Vec<StoredIdentity>| {
            let before = all.len();
            all.retain(|i| i.uid != uid);
            if all.len() == before { Err(AuthError::UserNotFound) } else { Ok(()) }
        })
        .await?;
        debug!(uid = uid, "identity.delete");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> AuthResult<()> {
        let Some(identity) = self.find(email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };
        let now = chrono::Utc::now().timestamp_millis();
        let code = security::random_token()?;
        let reset = PasswordReset {
            code: code.clone(),
            email: identity.email.clone(),
            expires_at: now.saturating_add(i64::try_from(self.reset_ttl.as_millis()).unwrap_or(i64::MAX)),
        };
        storage::update_collection(self.store.as_ref(), PASSWORD_RESETS, move |resets: &mut Vec<PasswordReset>| -> AuthResult<()> {
            resets.retain(|r| r.expires_at > now);
            resets.push(reset);
            Ok(())
        })
        .await?;
        self.mailer.deliver(&identity.email, &code).await
    }

    async fn reset_password(&self, code: &str, new_password: &str) -> AuthResult<()> {
        if !security::is_strong_enough(new_password) {
            return Err(AuthError::WeakPassword { min: security::MIN_PASSWORD_LEN });
        }
        let now = chrono::Utc::now().timestamp_millis();
        // Consume the code before touching the hash so a failed write cannot replay it
        let reset = storage::update_collection(self.store.as_ref(), PASSWORD_RESETS, |resets: &mut Vec<PasswordReset>| -> AuthResult<PasswordReset> {
            let idx = resets
                .iter()
                .position(|r| r.code == code && r.expires_at > now)
                .ok_or(AuthError::InvalidResetCode)?;
            let reset = resets.remove(idx);
            resets.retain(|r| r.expires_at > now);
            Ok(reset)
        })
        .await?;

        let password_hash = security::hash_password(new_password)?;
        storage::update_collection(self.store.as_ref(), IDENTITIES, |all: &mut Vec<StoredIdentity>| -> AuthResult<()> {
            let identity = all.iter_mut().find(|i| i.email == reset.email).ok_or(AuthError::UserNotFound)?;
            identity.password_hash = password_hash;
            Ok(())
        })
        .await?;
        info!(email = %reset.email, "password reset completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResetMailer for CapturingMailer {
        async fn deliver(&self, email: &str, code: &str) -> AuthResult<()> {
            self.sent.lock().push((email.to_string(), code.to_string()));
            Ok(())
        }
    }

    fn provider() -> (LocalIdentityProvider, Arc<CapturingMailer>, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let mailer = Arc::new(CapturingMailer::default());
        (LocalIdentityProvider::new(store.clone(), mailer.clone()), mailer, store)
    }

    #[tokio::test]
    async fn create_then_verify() {
        let (p, _, store) = provider();
        let rec = p.create_user(" Ana@Caf.Test ", "segredo1").await.unwrap();
        assert_eq!(rec.email, "ana@caf.test");
        assert!(p.verify_password("ana@caf.test", "segredo1").await.unwrap());
        assert!(p.verify_password("ANA@caf.test", "segredo1").await.unwrap());
        assert!(!p.verify_password("ana@caf.test", "segredo2").await.unwrap());
        assert!(!p.verify_password("nobody@caf.test", "segredo1").await.unwrap());

        let raw = store.read_raw(IDENTITIES).await.unwrap();
        let hash = raw[0]["password_hash"].as_str().unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(!hash.contains("segredo1"));
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_bad_input() {
        let (p, _, _) = provider();
        p.create_user("ana@caf.test", "segredo1").await.unwrap();
        assert!(matches!(p.create_user("ANA@caf.test", "outra123").await, Err(AuthError::EmailAlreadyExists)));
        assert!(matches!(p.create_user("ana", "segredo1").await, Err(AuthError::InvalidEmail)));
        assert!(matches!(p.create_user("bia@caf.test", "123").await, Err(AuthError::WeakPassword { min: 6 })));
    }

    #[tokio::test]
    async fn delete_unknown_uid_is_not_found() {
        let (p, _, _) = provider();
        let rec = p.create_user("ana@caf.test", "segredo1").await.unwrap();
        p.delete_user(&rec.uid).await.unwrap();
        assert!(p.get_user_by_email("ana@caf.test").await.unwrap().is_none());
        assert!(matches!(p.delete_user(&rec.uid).await, Err(AuthError::UserNotFound)));
    }

    #[tokio::test]
    async fn reset_code_is_single_use() {
        let (p, mailer, _) = provider();
        p.create_user("ana@caf.test", "segredo1").await.unwrap();
        p.send_password_reset("ana@caf.test").await.unwrap();
        let code = mailer.sent.lock()[0].1.clone();

        assert!(matches!(p.reset_password(&code, "123").await, Err(AuthError::WeakPassword { .. })));
        p.reset_password(&code, "novasenha").await.unwrap();
        assert!(p.verify_password("ana@caf.test", "novasenha").await.unwrap());
        assert!(!p.verify_password("ana@caf.test", "segredo1").await.unwrap());
        assert!(matches!(p.reset_password(&code, "outrasenha").await, Err(AuthError::InvalidResetCode)));
    }

    #[tokio::test]
    async fn reset_for_unknown_email_sends_nothing() {
        let (p, mailer, _) = provider();
        p.send_password_reset("ghost@caf.test").await.unwrap();
        assert!(mailer.sent.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_creates_keep_every_identity() {
        let (p, _, _) = provider();
        let p = Arc::new(p);
        let mut handles = Vec::new();
        for i in 0..8 {
            let p = p.clone();
            handles.push(tokio::spawn(async move { p.create_user(&format!("u{i}@caf.test"), "segredo1").await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        for i in 0..8 {
            assert!(p.verify_password(&format!("u{i}@caf.test"), "segredo1").await.unwrap(), "u{}", i);
        }
    }

    #[tokio::test]
    async fn expired_reset_code_is_rejected() {
        let (p, mailer, _) = provider();
        let p = p.with_reset_ttl(Duration::from_millis(0));
        p.create_user("ana@caf.test", "segredo1").await.unwrap();
        p.send_password_reset("ana@caf.test").await.unwrap();
        let code = mailer.sent.lock()[0].1.clone();
        assert!(matches!(p.reset_password(&code, "novasenha").await, Err(AuthError::InvalidResetCode)));
    }
}
