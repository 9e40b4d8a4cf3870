//! Persistence backends for the credential store.
//!
//! Every backend is a flat string key/value map. Individual operations are
//! atomic; nothing above this layer needs read-modify-write.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use keyring::Entry;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::debug;

const SERVICE_NAME: &str = "gymbook";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub trait SecureStorage: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

// ============================================================================
// OS keychain
// ============================================================================

/// Stores each key as a separate entry in the OS keychain.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureStorage for KeyringStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}

// ============================================================================
// Encrypted file
// ============================================================================

/// A single file holding the whole map, sealed with ChaCha20-Poly1305.
///
/// Layout: `salt (16) | nonce (12) | ciphertext`. The key is derived from a
/// passphrase with Argon2 once at open time; every write uses a fresh nonce
/// and replaces the file through a rename.
pub struct EncryptedFileStorage {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    lock: Mutex<()>,
}

impl EncryptedFileStorage {
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        let path = path.into();
        let mut salt = [0u8; SALT_LEN];

        if path.exists() {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read credential file {}", path.display()))?;
            if bytes.len() < SALT_LEN + NONCE_LEN {
                anyhow::bail!("Credential file is truncated");
            }
            salt.copy_from_slice(&bytes[..SALT_LEN]);
        } else {
            rand::thread_rng().fill_bytes(&mut salt);
        }

        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| anyhow::anyhow!("Failed to derive storage key: {}", e))?;

        Ok(Self {
            path,
            salt,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&self.path).context("Failed to read credential file")?;
        if bytes.len() < SALT_LEN + NONCE_LEN {
            anyhow::bail!("Credential file is truncated");
        }
        let nonce = Nonce::from_slice(&bytes[SALT_LEN..SALT_LEN + NONCE_LEN]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &bytes[SALT_LEN + NONCE_LEN..])
            .map_err(|_| anyhow::anyhow!("Failed to decrypt credential file"))?;
        serde_json::from_slice(&plaintext).context("Failed to parse credential file")
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let plaintext = serde_json::to_vec(entries)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| anyhow::anyhow!("Failed to encrypt credential file"))?;

        let mut contents = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        contents.extend_from_slice(&self.salt);
        contents.extend_from_slice(&nonce);
        contents.extend_from_slice(&ciphertext);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents).context("Failed to write credential file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace credential file")?;
        debug!(path = %self.path.display(), entries = entries.len(), "Credential file written");
        Ok(())
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-lifetime storage with no persistence.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SecureStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
