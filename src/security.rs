use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::Engine;
use once_cell::sync::Lazy;
use password_hash::{PasswordHash, SaltString};

/// Minimum password length accepted at registration and reset.
pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

// Hash checked when an email has no identity, so unknown accounts cost the same as wrong passwords
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("nexusfarma-timing-pad").ok());

pub fn burn_verify(password: &str) {
    if let Some(h) = DUMMY_HASH.as_deref() {
        let _ = verify_password(h, password);
    }
}

/// 256-bit random token, base64url without padding.
pub fn random_token() -> Result<String> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow!(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Loose shape check: one '@', non-empty local part, a dot in the domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) { return false; }
    let Some((local, domain)) = email.split_once('@') else { return false; };
    if local.is_empty() || domain.contains('@') { return false; }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

pub fn is_strong_enough(password: &str) -> bool { password.chars().count() >= MIN_PASSWORD_LEN }
