use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{MutexGuard, PoisonError};
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use log::{info, warn};

use crate::log_store::write_atomic;

pub mod mailer;

pub const OTP_DIGITS: u32 = 6;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("PIN must be 4 to 12 digits")]
    InvalidPin,

    #[error("No one-time password has been requested")]
    NoActiveOtp,

    #[error("The one-time password has expired")]
    OtpExpired,

    #[error("The one-time password does not match")]
    OtpMismatch,

    #[error("Auth store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OtpEntry {
    otp: String,
    issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthFile {
    pin_hash: String,
    salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    otp: Option<OtpEntry>,
}

pub fn validate_pin(pin: &str) -> Result<(), AuthError> {
    let ok = (4..=12).contains(&pin.len()) && pin.chars().all(|c| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(AuthError::InvalidPin)
    }
}

fn hash_pin(salt: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pin.as_bytes());
    BASE64.encode(hasher.finalize())
}

fn new_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

fn new_otp() -> String {
    let n = rand::thread_rng().gen_range(0..10u32.pow(OTP_DIGITS));
    format!("{:0width$}", n, width = OTP_DIGITS as usize)
}

fn hashed(pin: &str) -> AuthFile {
    let salt = new_salt();
    AuthFile {
        pin_hash: hash_pin(&salt, pin),
        salt,
        otp: None,
    }
}

/// File-backed PIN and one-time-password state.
pub struct AuthStore {
    path: PathBuf,
    otp_ttl: Duration,
    lock: Mutex<()>,
}

impl AuthStore {
    /// Opens the store, seeding it with `default_pin` on first use.
    pub async fn open(path: impl Into<PathBuf>, default_pin: &str, otp_ttl_secs: i64) -> Result<Self, AuthError> {
        let store = AuthStore {
            path: path.into(),
            otp_ttl: Duration::seconds(otp_ttl_secs),
            lock: Mutex::new(()),
        };
        match fs::metadata(&store.path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                validate_pin(default_pin)?;
                store.write(&hashed(default_pin)).await?;
                info!("-- seeded PIN store at {}", store.path.display());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Cannot stat {}", store.path.display()))
                    .into())
            }
        }
        Ok(store)
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read(&self) -> anyhow::Result<AuthFile> {
        let data = fs::read(&self.path)
            .await
            .with_context(|| format!("Cannot read {}", self.path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("Malformed auth file {}", self.path.display()))
    }

    async fn write(&self, file: &AuthFile) -> anyhow::Result<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(file)?).await
    }

    pub async fn verify_pin(&self, pin: &str) -> Result<bool, AuthError> {
        let file = self.read().await?;
        Ok(hash_pin(&file.salt, pin) == file.pin_hash)
    }

    pub async fn set_pin(&self, pin: &str) -> Result<(), AuthError> {
        validate_pin(pin)?;
        let _guard = self.lock.lock().await;
        self.write(&hashed(pin)).await?;
        Ok(())
    }

    pub async fn issue_otp(&self) -> Result<String, AuthError> {
        self.issue_otp_at(Utc::now()).await
    }

    /// Replaces any outstanding one-time password with a fresh one.
    pub async fn issue_otp_at(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let otp = new_otp();
        file.otp = Some(OtpEntry { otp: otp.clone(), issued_at: now });
        self.write(&file).await?;
        Ok(otp)
    }

    pub async fn reset_pin(&self, otp: &str, new_pin: &str) -> Result<(), AuthError> {
        self.reset_pin_at(otp, new_pin, Utc::now()).await
    }

    pub async fn reset_pin_at(&self, otp: &str, new_pin: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        validate_pin(new_pin)?;
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;

        let entry = file.otp.clone().ok_or(AuthError::NoActiveOtp)?;
        if now - entry.issued_at > self.otp_ttl {
            file.otp = None;
            self.write(&file).await?;
            warn!("Expired one-time password presented");
            return Err(AuthError::OtpExpired);
        }
        if entry.otp != otp.trim() {
            return Err(AuthError::OtpMismatch);
        }

        self.write(&hashed(new_pin)).await?;
        info!("-- PIN reset via one-time password");
        Ok(())
    }
}

/// In-memory dashboard sessions keyed by cookie token.
pub struct SessionStore {
    ttl: Duration,
    sessions: std::sync::Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SessionStore {
    pub fn new(ttl_secs: i64) -> Self {
        SessionStore {
            ttl: Duration::seconds(ttl_secs),
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    // A panic while holding the map leaves it usable; entries are independent
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.sessions.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("Session store lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    pub fn create(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        let now = Utc::now();
        let mut sessions = self.sessions();
        sessions.retain(|_, exp| *exp > now);
        sessions.insert(token.clone(), now + self.ttl);
        token
    }

    pub fn is_valid(&self, token: &str) -> bool {
        let mut sessions = self.sessions();
        match sessions.get(token) {
            Some(exp) if *exp > Utc::now() => true,
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn remove(&self, token: &str) {
        self.sessions().remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dir: &tempfile::TempDir) -> AuthStore {
        AuthStore::open(dir.path().join("auth.json"), "1234", 300).await.unwrap()
    }

    #[tokio::test]
    async fn default_pin_is_seeded_and_not_stored_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        assert!(store.verify_pin("1234").await.unwrap());
        assert!(!store.verify_pin("4321").await.unwrap());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("1234"));
    }

    #[tokio::test]
    async fn existing_store_is_not_reseeded() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir).await.set_pin("987654").await.unwrap();
        let reopened = store(&dir).await;
        assert!(reopened.verify_pin("987654").await.unwrap());
    }

    #[tokio::test]
    async fn otp_resets_pin_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let otp = store.issue_otp().await.unwrap();
        assert_eq!(otp.len(), OTP_DIGITS as usize);

        store.reset_pin(&otp, "5555").await.unwrap();
        assert!(store.verify_pin("5555").await.unwrap());
        assert!(matches!(store.reset_pin(&otp, "6666").await, Err(AuthError::NoActiveOtp)));
    }

    #[tokio::test]
    async fn stale_otp_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let issued = Utc::now();
        let otp = store.issue_otp_at(issued).await.unwrap();

        let later = issued + Duration::seconds(301);
        assert!(matches!(store.reset_pin_at(&otp, "5555", later).await, Err(AuthError::OtpExpired)));
        assert!(store.verify_pin("1234").await.unwrap());
    }

    #[tokio::test]
    async fn wrong_otp_and_bad_pin_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let otp = store.issue_otp().await.unwrap();
        let wrong = if otp == "000000" { "111111" } else { "000000" };

        assert!(matches!(store.reset_pin(wrong, "5555").await, Err(AuthError::OtpMismatch)));
        assert!(matches!(store.reset_pin(&otp, "12ab").await, Err(AuthError::InvalidPin)));
        store.reset_pin(&otp, "5555").await.unwrap();
    }

    #[tokio::test]
    async fn reissue_replaces_previous_otp() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let first = store.issue_otp().await.unwrap();
        let second = loop {
            let otp = store.issue_otp().await.unwrap();
            if otp != first {
                break otp;
            }
        };
        assert!(matches!(store.reset_pin(&first, "5555").await, Err(AuthError::OtpMismatch)));
        store.reset_pin(&second, "5555").await.unwrap();
    }

    #[tokio::test]
    async fn unreadable_store_location_is_not_reseeded() {
        let dir = tempfile::tempdir().unwrap();
        // A path under a regular file fails with NotADirectory, not NotFound
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let result = AuthStore::open(blocker.join("auth.json"), "1234", 300).await;
        assert!(matches!(result, Err(AuthError::Store(_))));
    }

    #[tokio::test]
    async fn concurrent_pin_checks_never_see_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(store(&dir).await);

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    store.issue_otp().await.unwrap();
                }
            })
        };
        for _ in 0..50 {
            assert!(store.verify_pin("1234").await.unwrap());
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn poisoned_session_lock_still_stores_tokens() {
        let sessions = std::sync::Arc::new(SessionStore::new(3600));
        let poisoner = sessions.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.sessions.lock().unwrap();
            panic!("poison the session lock");
        })
        .join();
        assert!(sessions.sessions.is_poisoned());

        let token = sessions.create();
        assert!(sessions.is_valid(&token));
        sessions.remove(&token);
        assert!(!sessions.is_valid(&token));
    }

    #[test]
    fn pin_validation() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("123").is_err());
        assert!(validate_pin("1234567890123").is_err());
        assert!(validate_pin("12a4").is_err());
    }

    #[test]
    fn sessions_expire_and_log_out() {
        let sessions = SessionStore::new(3600);
        let token = sessions.create();
        assert!(sessions.is_valid(&token));
        sessions.remove(&token);
        assert!(!sessions.is_valid(&token));

        let expired = SessionStore::new(-1);
        let token = expired.create();
        assert!(!expired.is_valid(&token));
        assert!(!expired.is_valid("unknown"));
    }
}
