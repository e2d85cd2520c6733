//! Stateless session tokens.
//!
//! A token is `base64url(json claims) "." base64url(hmac_sha256(payload))`. The claims
//! are a point-in-time copy of the principal: they change only when a new token is
//! issued at login or re-issued through [`SessionIssuer::refresh`].

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::principal::{AccessLevel, Location, Principal, ProfilePatch, Role, SubRole};

type HmacSha256 = Hmac<Sha256>;

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Principal id.
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_role: Option<SubRole>,
    pub location: Location,
    pub access_level: AccessLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<NaiveDate>,
    /// Issued-at, epoch seconds.
    pub iat: i64,
    /// Expiry, epoch seconds.
    pub exp: i64,
}

impl SessionClaims {
    pub fn is_coordinator(&self) -> bool { self.sub_role == Some(SubRole::Coordinator) }
    pub fn is_admin(&self) -> bool { self.access_level == AccessLevel::Admin }

    /// Seconds left before `exp`, zero once expired.
    pub fn remaining_secs_at(&self, now: i64) -> u64 {
        u64::try_from(self.exp.saturating_sub(now)).unwrap_or(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed session token")]
    Malformed,
    #[error("session token signature mismatch")]
    BadSignature,
    #[error("session token expired")]
    Expired,
    #[error("session token encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("session secret must be at least 16 bytes")]
pub struct WeakSecret;

/// Issues, refreshes, signs and verifies session tokens.
#[derive(Clone)]
pub struct SessionIssuer {
    mac: HmacSha256,
    max_age: Duration,
}

impl std::fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIssuer").field("max_age", &self.max_age).finish_non_exhaustive()
    }
}

impl SessionIssuer {
    pub fn new(secret: &[u8], max_age: Duration) -> Result<Self, WeakSecret> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(WeakSecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| WeakSecret)?;
        Ok(Self { mac, max_age })
    }

    pub fn issue(&self, principal: &Principal) -> SessionClaims {
        self.issue_at(principal, now_secs())
    }

    pub fn issue_at(&self, principal: &Principal, now: i64) -> SessionClaims {
        SessionClaims {
            sub: principal.id.clone(),
            email: principal.email.clone(),
            name: principal.name.clone(),
            role: principal.role,
            sub_role: principal.sub_role,
            location: principal.location,
            access_level: principal.access_level,
            avatar_color: principal.avatar_color.clone(),
            birthdate: principal.birthdate,
            iat: now,
            exp: now.saturating_add(i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX)),
        }
    }

    /// Re-issue `claims` with the profile fields present in `patch` merged in.
    /// Everything else, including the expiry window, is carried over.
    pub fn refresh(&self, claims: &SessionClaims, patch: &ProfilePatch) -> SessionClaims {
        let mut next = claims.clone();
        if let Some(name) = patch.name.as_ref() { next.name = name.clone(); }
        if let Some(date) = patch.birthdate { next.birthdate = Some(date); }
        if let Some(color) = patch.avatar_color.as_ref() { next.avatar_color = Some(color.clone()); }
        next
    }

    pub fn encode(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", payload, sig))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, now_secs())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<SessionClaims, TokenError> {
        let (payload, sig) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;
        let raw = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: SessionClaims = serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Random signing secret for servers started without one. Tokens die with the process.
pub fn ephemeral_secret() -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow::anyhow!("generating session secret: {}", e))?;
    Ok(buf)
}

fn now_secs() -> i64 { chrono::Utc::now().timestamp() }
