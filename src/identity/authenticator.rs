use tracing::{info, warn};

use super::directory::UserDirectory;
use super::principal::{normalize_email, AccessLevel, Location, Principal, Role};
use crate::error::{AuthError, AuthResult};

/// What to do when the identity provider accepts a password but no local user record exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingPrincipalPolicy {
    /// Refuse the login with `PrincipalNotFound`.
    #[default]
    Reject,
    /// Create a default Pharmacist/CAF record and let the login through.
    Provision,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub ip: Option<String>,
}

pub struct CredentialAuthenticator {
    directory: UserDirectory,
    policy: MissingPrincipalPolicy,
}

impl CredentialAuthenticator {
    pub fn new(directory: UserDirectory, policy: MissingPrincipalPolicy) -> Self {
        Self { directory, policy }
    }

    /// Password first, local record second. The error never says which of the two failed
    /// once it reaches the HTTP layer.
    pub async fn authenticate(&self, req: &LoginRequest) -> AuthResult<Principal> {
        let email = normalize_email(&req.email);
        if !self.directory.provider().verify_password(&email, &req.password).await? {
            return Err(AuthError::InvalidCredentials);
        }
        if let Some(principal) = self.directory.find_by_email(&email).await? {
            info!(user_id = %principal.id, ip = ?req.ip, "auth.login");
            return Ok(principal);
        }
        match self.policy {
            MissingPrincipalPolicy::Reject => {
                warn!(email = %email, "auth.login identity has no local user record");
                Err(AuthError::PrincipalNotFound { email })
            }
            MissingPrincipalPolicy::Provision => {
                let principal = self.provision(&email).await?;
                warn!(user_id = %principal.id, "auth.login provisioned default user record");
                Ok(principal)
            }
        }
    }

    async fn provision(&self, email: &str) -> AuthResult<Principal> {
        let identity = self.directory.provider().get_user_by_email(email).await?;
        let (id, created_at) = match identity {
            Some(i) => (i.uid, i.created_at),
            None => (uuid::Uuid::new_v4().to_string(), chrono::Utc::now().timestamp_millis()),
        };
        let name = email.split('@').next().unwrap_or(email).to_string();
        let principal = Principal {
            id,
            email: email.to_string(),
            name,
            role: Role::Pharmacist,
            sub_role: None,
            location: Location::Caf,
            access_level: AccessLevel::User,
            avatar_color: None,
            birthdate: None,
            created_at,
        };
        self.directory.insert(principal).await
    }
}
