use anyhow::{anyhow, bail, Result};
use std::fs;
use std::path::{Path, PathBuf};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::info;
use rand::RngCore;

use crate::settings::Config;

const PASSWORD_FILE: &str = ".encrypted_password";
const KEY_FILE: &str = ".encryption_key";
const NONCE_LEN: usize = 12;

/// Encrypted-at-rest storage for the IMAP app password.
pub struct SecretStore {
    password_path: PathBuf,
    key_path: PathBuf,
}

impl SecretStore {
    pub fn new(dir: &Path) -> Self {
        SecretStore {
            password_path: dir.join(PASSWORD_FILE),
            key_path: dir.join(KEY_FILE),
        }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        let key = if self.key_path.exists() {
            // Read existing key
            let key_bytes = fs::read(&self.key_path)?;
            Aes256Gcm::new_from_slice(&key_bytes)
                .map_err(|e| anyhow!("Failed to create cipher from key: {}", e))?
        } else {
            // Generate new key
            let mut key_bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key_bytes);
            if let Some(parent) = self.key_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.key_path, key_bytes)?;
            Aes256Gcm::new_from_slice(&key_bytes)
                .map_err(|e| anyhow!("Failed to create cipher from new key: {}", e))?
        };
        Ok(key)
    }

    pub fn encrypt(&self, secret: &str) -> Result<String> {
        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|e| anyhow!("Failed to encrypt password: {}", e))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let cipher = self.cipher()?;
        let combined = BASE64
            .decode(encrypted.trim())
            .map_err(|e| anyhow!("Failed to decode base64: {}", e))?;

        if combined.len() <= NONCE_LEN {
            bail!("Stored password is truncated");
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow!("Failed to decrypt password: {}", e))?;

        String::from_utf8(plaintext)
            .map_err(|e| anyhow!("Failed to convert decrypted bytes to string: {}", e))
    }

    pub fn store_password(&self, password: &str) -> Result<()> {
        let encrypted = self.encrypt(password)?;
        fs::write(&self.password_path, encrypted)?;
        info!("-- app password stored in {}", self.password_path.display());
        Ok(())
    }

    pub fn stored_password(&self) -> Result<Option<String>> {
        if !self.password_path.exists() {
            return Ok(None);
        }
        let encrypted = fs::read_to_string(&self.password_path)?;
        self.decrypt(&encrypted).map(Some)
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

pub fn prompt_and_store(store: &SecretStore) -> Result<String> {
    let password = rpassword::prompt_password("Enter your Gmail app password: ")?;
    if password.trim().is_empty() {
        bail!("Empty app password");
    }
    store.store_password(&password)?;
    Ok(password)
}

/// Config or env first, then the encrypted file, then an interactive prompt.
pub fn get_credentials(config: &Config) -> Result<Credentials> {
    let username = config.imap.username.clone();
    if let Some(password) = config.imap.password.clone().filter(|p| !p.is_empty()) {
        return Ok(Credentials { username, password });
    }

    let store = SecretStore::new(&config.storage.secret_dir);
    let password = match store.stored_password()? {
        Some(password) => password,
        None => prompt_and_store(&store)?,
    };

    Ok(Credentials { username, password })
}
