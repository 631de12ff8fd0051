//! File-backed credential vault.
//!
//! Values live in `.vault/tokens.json`, each encrypted with AES-256-GCM and
//! wrapped as `<encrypted v="1">BASE64(nonce||ciphertext)</encrypted>`. The
//! key comes from `VAULT_KEY` (hex or base64) or from `.vault/key`, which is
//! generated on first use. Read-modify-write cycles hold an exclusive lock on
//! `.vault/.lock`.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use fs2::FileExt;
use rand::RngCore;

use super::CredentialVault;
use crate::error::{read_error, FlowError, Result};
use crate::status::{read_json, write_json};

/// Key length in bytes (256 bits for AES-256)
const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

const ENCRYPTION_VERSION: &str = "1";
const ENCRYPTED_PREFIX: &str = "<encrypted v=\"";
const ENCRYPTED_SUFFIX: &str = "</encrypted>";

const TOKENS_FILE: &str = "tokens.json";
const KEY_FILE: &str = "key";
const LOCK_FILE: &str = ".lock";

pub struct FileVault {
    dir: PathBuf,
    key: [u8; KEY_LENGTH],
}

impl FileVault {
    /// Open the vault in `dir`, using `key` if given.
    pub fn open(dir: impl Into<PathBuf>, key: Option<&str>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| FlowError::io(format!("Failed to create {}", dir.display()), e))?;
        let key = match key {
            Some(key) => parse_key(key)?,
            None => load_or_create_key(&dir.join(KEY_FILE))?,
        };
        Ok(Self { dir, key })
    }

    fn tokens_path(&self) -> PathBuf {
        self.dir.join(TOKENS_FILE)
    }

    fn lock(&self) -> Result<File> {
        let path = self.dir.join(LOCK_FILE);
        let file = File::create(&path)
            .map_err(|e| FlowError::io(format!("Failed to open {}", path.display()), e))?;
        file.lock_exclusive()
            .map_err(|e| FlowError::UnusableVault(format!("cannot lock vault: {}", e)))?;
        Ok(file)
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match read_json(&self.tokens_path()) {
            Ok(values) => Ok(values),
            Err(FlowError::FileNotFound(_)) => Ok(BTreeMap::new()),
            Err(FlowError::Decode { .. }) => {
                Err(FlowError::UnusableVault("token file is corrupt".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn modify(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> Result<()>) -> Result<()> {
        let lock = self.lock()?;
        let mut values = self.load()?;
        f(&mut values)?;
        let written = write_json(&self.tokens_path(), &values);
        // Unlock errors are harmless; the lock also drops with the file.
        let _ = lock.unlock();
        written
    }
}

impl CredentialVault for FileVault {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.load()?;
        values
            .get(key)
            .map(|v| decrypt_value(&self.key, v))
            .transpose()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let encrypted = encrypt_value(&self.key, value)?;
        self.modify(|values| {
            values.insert(key.to_string(), encrypted);
            Ok(())
        })?;
        tracing::debug!(key = %key, "Stored credential");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.modify(|values| {
            values.remove(key);
            Ok(())
        })?;
        tracing::debug!(key = %key, "Removed credential");
        Ok(())
    }
}

fn encrypt_value(key: &[u8; KEY_LENGTH], plaintext: &str) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| FlowError::UnusableVault(format!("Failed to create cipher: {}", e)))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| FlowError::UnusableVault(format!("Encryption failed: {}", e)))?;

    let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!(
        "{}{}\">{}{}",
        ENCRYPTED_PREFIX,
        ENCRYPTION_VERSION,
        BASE64.encode(&combined),
        ENCRYPTED_SUFFIX
    ))
}

fn decrypt_value(key: &[u8; KEY_LENGTH], value: &str) -> Result<String> {
    let unusable = |msg: &str| FlowError::UnusableVault(msg.to_string());

    let payload = value
        .trim()
        .strip_prefix(ENCRYPTED_PREFIX)
        .and_then(|rest| rest.strip_suffix(ENCRYPTED_SUFFIX))
        .and_then(|rest| rest.strip_prefix(ENCRYPTION_VERSION))
        .and_then(|rest| rest.strip_prefix("\">"))
        .ok_or_else(|| unusable("unrecognised value format"))?;

    let combined = BASE64
        .decode(payload)
        .map_err(|_| unusable("Failed to decode encrypted value"))?;
    if combined.len() < NONCE_LENGTH {
        return Err(unusable("Encrypted value too short"));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| FlowError::UnusableVault(format!("Failed to create cipher: {}", e)))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| unusable("Decryption failed: invalid key or corrupted data"))?;
    String::from_utf8(plaintext).map_err(|_| unusable("Decrypted value is not valid UTF-8"))
}

/// Parse a key from hex or base64 format.
fn parse_key(key_str: &str) -> Result<[u8; KEY_LENGTH]> {
    let trimmed = key_str.trim();

    let bytes = if trimmed.len() == KEY_LENGTH * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(trimmed).map_err(|_| FlowError::UnusableVault("Invalid hex key".to_string()))?
    } else {
        BASE64.decode(trimmed).map_err(|_| {
            FlowError::UnusableVault("Key is neither valid hex nor base64".to_string())
        })?
    };

    if bytes.len() != KEY_LENGTH {
        return Err(FlowError::UnusableVault(format!(
            "Key must be {} bytes, got {} bytes",
            KEY_LENGTH,
            bytes.len()
        )));
    }
    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LENGTH]> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_key(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut key = [0u8; KEY_LENGTH];
            rand::thread_rng().fill_bytes(&mut key);
            crate::status::write_atomic(path, hex::encode(key).as_bytes())?;
            tracing::info!(path = %path.display(), "Generated credential vault key");
            Ok(key)
        }
        Err(e) => Err(read_error(path, e)),
    }
}
