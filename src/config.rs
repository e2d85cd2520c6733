//! Server configuration.
//!
//! Every setting resolves as: command-line flag, then environment variable, then default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::clients::StoreBackend;
use crate::identity::{MissingPrincipalPolicy, MIN_SECRET_LEN};

pub const DEFAULT_HTTP_PORT: u16 = 7880;
pub const DEFAULT_DATA_FOLDER: &str = "data";
pub const DEFAULT_SESSION_DAYS: u64 = 30;

pub const ENV_HTTP_PORT: &str = "NEXUSFARMA_HTTP_PORT";
pub const ENV_DATA_FOLDER: &str = "NEXUSFARMA_DATA_FOLDER";
pub const ENV_SESSION_SECRET: &str = "NEXUSFARMA_SESSION_SECRET";
pub const ENV_SESSION_DAYS: &str = "NEXUSFARMA_SESSION_MAX_AGE_DAYS";
pub const ENV_SECURE_COOKIE: &str = "NEXUSFARMA_SECURE_COOKIE";
pub const ENV_PROVISION_MISSING: &str = "NEXUSFARMA_PROVISION_MISSING";

pub const USAGE: &str = "NexusFarma access server

USAGE:
  nexusfarma_server [--http-port N] [--data-folder PATH | --in-memory] [--session-days N]
                    [--secure-cookie [bool]] [--provision-missing [bool]]

OPTIONS:
  --http-port N            HTTP port (env: NEXUSFARMA_HTTP_PORT, default 7880)
  --data-folder PATH       Folder holding the JSON collections (env: NEXUSFARMA_DATA_FOLDER, default data)
  --in-memory              Keep everything in memory; nothing is written to disk
  --session-days N         Session cookie lifetime in days (env: NEXUSFARMA_SESSION_MAX_AGE_DAYS, default 30)
  --secure-cookie [bool]   Mark the session cookie Secure (env: NEXUSFARMA_SECURE_COOKIE, default false)
  --provision-missing [b]  Create a default user record when a valid identity has none
                           (env: NEXUSFARMA_PROVISION_MISSING, default false)

The signing secret is read from NEXUSFARMA_SESSION_SECRET only. Without it a random
secret is generated and sessions do not survive a restart.
";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub backend: StoreBackend,
    pub session_secret: Option<Vec<u8>>,
    pub session_max_age: Duration,
    pub secure_cookie: bool,
    pub missing_principal: MissingPrincipalPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            backend: StoreBackend::File(PathBuf::from(DEFAULT_DATA_FOLDER)),
            session_secret: None,
            session_max_age: Duration::from_secs(DEFAULT_SESSION_DAYS * 24 * 3600),
            secure_cookie: false,
            missing_principal: MissingPrincipalPolicy::Reject,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

/// `--flag` alone means true; `--flag false` (or another bool word) sets it explicitly.
fn arg_bool(args: &[String], flag: &str) -> Option<bool> {
    let pos = args.iter().position(|a| a == flag)?;
    match args.get(pos + 1) {
        Some(next) if !next.starts_with('-') => Some(parse_bool(next).unwrap_or(true)),
        _ => Some(true),
    }
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

impl ServerConfig {
    /// Resolve from process arguments and the real environment.
    pub fn from_args(args: &[String]) -> Result<Self> {
        Self::resolve(args, |name| std::env::var(name).ok())
    }

    /// Resolve from `args` with `env` standing in for the environment.
    pub fn resolve<F>(args: &[String], env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = arg_value(args, "--http-port").map(str::to_string).or_else(|| env(ENV_HTTP_PORT)) {
            cfg.http_port = raw.parse::<u16>().map_err(|_| anyhow!("invalid http port: {}", raw))?;
        }

        if has_flag(args, "--in-memory") {
            cfg.backend = StoreBackend::Memory;
        } else if let Some(folder) = arg_value(args, "--data-folder").map(str::to_string).or_else(|| env(ENV_DATA_FOLDER)) {
            cfg.backend = StoreBackend::File(PathBuf::from(folder));
        }

        if let Some(raw) = arg_value(args, "--session-days").map(str::to_string).or_else(|| env(ENV_SESSION_DAYS)) {
            let days = raw.parse::<u64>().map_err(|_| anyhow!("invalid session lifetime: {}", raw))?;
            if days == 0 {
                bail!("session lifetime must be at least one day");
            }
            let secs = days
                .checked_mul(24 * 3600)
                .filter(|s| i64::try_from(*s).is_ok())
                .ok_or_else(|| anyhow!("session lifetime too large: {} days", days))?;
            cfg.session_max_age = Duration::from_secs(secs);
        }

        if let Some(secret) = env(ENV_SESSION_SECRET) {
            if secret.len() < MIN_SECRET_LEN {
                bail!("{} must be at least {} bytes", ENV_SESSION_SECRET, MIN_SECRET_LEN);
            }
            cfg.session_secret = Some(secret.into_bytes());
        }

        if let Some(b) = arg_bool(args, "--secure-cookie").or_else(|| env(ENV_SECURE_COOKIE).and_then(|v| parse_bool(&v))) {
            cfg.secure_cookie = b;
        }

        let provision = arg_bool(args, "--provision-missing")
            .or_else(|| env(ENV_PROVISION_MISSING).and_then(|v| parse_bool(&v)))
            .unwrap_or(false);
        cfg.missing_principal = if provision { MissingPrincipalPolicy::Provision } else { MissingPrincipalPolicy::Reject };

        Ok(cfg)
    }
}
