//! Single login gate: bcrypt password hashes and an HMAC-signed, expiring session file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{AuthConfig, UserConfig};

type HmacSha256 = Hmac<Sha256>;

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("auth.cookie_key is not configured; set it in the config file or DASHBOARD_COOKIE_KEY")]
    MissingCookieKey,

    #[error("not logged in; run `dealer-insights login` first")]
    NoSession,

    #[error("session expired at {0}; log in again")]
    Expired(DateTime<Utc>),

    #[error("session signature does not verify")]
    Tampered,

    #[error("user `{0}` is not configured")]
    UnknownUser(String),

    #[error("stored password hash for `{0}` is malformed")]
    MalformedHash(String),

    #[error("auth.expiry_days = {0} puts the session expiry out of range")]
    ExpiryOutOfRange(i64),

    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    #[error("session file {path}: {details}")]
    SessionFile { path: PathBuf, details: String },
}

/// Returns a `$2b$` bcrypt hash with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, HASH_COST)?)
}

/// `None` when `stored` is not a bcrypt hash.
pub fn verify_password(stored: &str, password: &str) -> Option<bool> {
    bcrypt::verify(password, stored).ok()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
}

pub struct Gate<'a> {
    config: &'a AuthConfig,
}

impl<'a> Gate<'a> {
    pub fn new(config: &'a AuthConfig) -> Self {
        Self { config }
    }

    fn cookie_key(&self) -> Result<&str, AuthError> {
        self.config
            .cookie_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(AuthError::MissingCookieKey)
    }

    pub fn login(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let key = self.cookie_key()?;
        let Some(user) = self.config.users.get(username) else {
            tracing::warn!(username, "login attempt for unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        match verify_password(&user.password_hash, password) {
            Some(true) => {}
            Some(false) => {
                tracing::warn!(username, "login attempt with wrong password");
                return Err(AuthError::InvalidCredentials);
            }
            None => return Err(AuthError::MalformedHash(username.to_string())),
        }

        let expires_at = TimeDelta::try_days(self.config.expiry_days)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(AuthError::ExpiryOutOfRange(self.config.expiry_days))?;
        let token = Uuid::new_v4();
        let signature = sign(key, username, token, expires_at)?;
        tracing::info!(username, %expires_at, "session issued");
        Ok(Session {
            username: username.to_string(),
            token,
            expires_at,
            signature,
        })
    }

    pub fn verify(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<&'a UserConfig, AuthError> {
        let key = self.cookie_key()?;
        let expected = sign(key, &session.username, session.token, session.expires_at)?;
        if !constant_time_eq(expected.as_bytes(), session.signature.as_bytes()) {
            return Err(AuthError::Tampered);
        }
        if session.expires_at <= now {
            return Err(AuthError::Expired(session.expires_at));
        }
        self.config
            .users
            .get(&session.username)
            .ok_or_else(|| AuthError::UnknownUser(session.username.clone()))
    }
}

/// Hex HMAC-SHA256 over the session fields, one per line.
fn sign(
    key: &str,
    username: &str,
    token: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<String, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| AuthError::MissingCookieKey)?;
    let token = token.to_string();
    let expires_at = expires_at.to_rfc3339();
    for part in [username, token.as_str(), expires_at.as_str()] {
        mac.update(part.as_bytes());
        mac.update(b"\n");
    }
    Ok(format!("{:x}", mac.finalize().into_bytes()))
}

pub fn save_session(path: &Path, session: &Session) -> Result<(), AuthError> {
    let file_error = |details: String| AuthError::SessionFile {
        path: path.to_path_buf(),
        details,
    };
    let body = serde_json::to_string_pretty(session).map_err(|err| file_error(err.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| file_error(err.to_string()))?;
    }
    fs::write(path, body).map_err(|err| file_error(err.to_string()))
}

pub fn load_session(path: &Path) -> Result<Session, AuthError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(AuthError::NoSession),
        Err(err) => {
            return Err(AuthError::SessionFile {
                path: path.to_path_buf(),
                details: err.to_string(),
            })
        }
    };
    serde_json::from_str(&raw).map_err(|err| AuthError::SessionFile {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

/// Removes the session file; `false` when there was none.
pub fn clear_session(path: &Path) -> Result<bool, AuthError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(AuthError::SessionFile {
            path: path.to_path_buf(),
            details: err.to_string(),
        }),
    }
}

/// Loads and verifies the stored session for report commands.
pub fn require_session(config: &AuthConfig) -> Result<Session, AuthError> {
    let session = load_session(&config.session_path())?;
    Gate::new(config).verify(&session, Utc::now())?;
    tracing::debug!(username = %session.username, "session verified");
    Ok(session)
}
