//! Durable storage for session credentials.
//!
//! Every backend stores the same two slots, `accessCredential` and
//! `renewalCredential`. Backends report failures; deciding what to do about
//! them is up to `CredentialStore`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use keyring::Entry;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::SessionTokens;

/// Keychain service name
pub const SERVICE_NAME: &str = "refshop";

pub const ACCESS_SLOT: &str = "accessCredential";
pub const RENEWAL_SLOT: &str = "renewalCredential";

/// Encrypted session file name in cache directory
pub const SESSION_FILE: &str = "session.bin";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const ENVELOPE_VERSION: u32 = 1;

pub trait TokenBackend: Send + Sync {
    /// Short name for log messages
    fn name(&self) -> &'static str;

    /// Read whatever credentials were persisted. Missing slots are `None`.
    fn load(&self) -> Result<SessionTokens>;

    /// Replace the persisted credentials
    fn save(&self, tokens: &SessionTokens) -> Result<()>;

    /// Remove every persisted credential
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// OS keychain
// ============================================================================

pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, slot: &str) -> Result<Entry> {
        Entry::new(&self.service, slot).context("Failed to create keyring entry")
    }

    fn read_slot(&self, slot: &str) -> Result<Option<String>> {
        match self.entry(slot)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {} from keychain", slot)),
        }
    }

    fn write_slot(&self, slot: &str, value: Option<&str>) -> Result<()> {
        let entry = self.entry(slot)?;
        match value {
            Some(value) => entry
                .set_password(value)
                .with_context(|| format!("Failed to store {} in keychain", slot)),
            None => match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => {
                    Err(e).with_context(|| format!("Failed to delete {} from keychain", slot))
                }
            },
        }
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn load(&self) -> Result<SessionTokens> {
        Ok(SessionTokens {
            access: self.read_slot(ACCESS_SLOT)?,
            renewal: self.read_slot(RENEWAL_SLOT)?,
            ..Default::default()
        })
    }

    fn save(&self, tokens: &SessionTokens) -> Result<()> {
        self.write_slot(ACCESS_SLOT, tokens.access.as_deref())?;
        self.write_slot(RENEWAL_SLOT, tokens.renewal.as_deref())
    }

    fn clear(&self) -> Result<()> {
        self.write_slot(ACCESS_SLOT, None)?;
        self.write_slot(RENEWAL_SLOT, None)
    }
}

// ============================================================================
// Encrypted file
// ============================================================================

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Session file encrypted with ChaCha20-Poly1305 under an Argon2id-derived key.
pub struct EncryptedFileBackend {
    path: PathBuf,
    passphrase: String,
    /// Salt and derived key of the current file, so saves skip key derivation
    key: Mutex<Option<([u8; SALT_LEN], [u8; KEY_LEN])>>,
}

impl EncryptedFileBackend {
    pub fn new(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
            key: Mutex::new(None),
        }
    }

    /// Backend storing `session.bin` inside `dir`
    pub fn in_dir(dir: &Path, passphrase: impl Into<String>) -> Self {
        Self::new(dir.join(SESSION_FILE), passphrase)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| anyhow::anyhow!("Failed to derive session key: {}", e))?;
        Ok(key)
    }

    fn current_key(&self) -> Result<([u8; SALT_LEN], [u8; KEY_LEN])> {
        let mut cached = self.key.lock();
        if let Some(pair) = *cached {
            return Ok(pair);
        }
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let pair = (salt, self.derive_key(&salt)?);
        *cached = Some(pair);
        Ok(pair)
    }

    fn decode_field(value: &str, field: &str) -> Result<Vec<u8>> {
        STANDARD
            .decode(value)
            .with_context(|| format!("Session file has an invalid {}", field))
    }
}

impl TokenBackend for EncryptedFileBackend {
    fn name(&self) -> &'static str {
        "encrypted-file"
    }

    fn load(&self) -> Result<SessionTokens> {
        if !self.path.exists() {
            return Ok(SessionTokens::default());
        }
        let contents = std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        let envelope: Envelope =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        if envelope.version != ENVELOPE_VERSION {
            anyhow::bail!("Unsupported session file version {}", envelope.version);
        }

        let salt = Self::decode_field(&envelope.salt, "salt")?;
        let nonce = Self::decode_field(&envelope.nonce, "nonce")?;
        let ciphertext = Self::decode_field(&envelope.ciphertext, "ciphertext")?;
        let salt: [u8; SALT_LEN] = salt
            .try_into()
            .map_err(|_| anyhow::anyhow!("Session file salt has the wrong length"))?;
        if nonce.len() != NONCE_LEN {
            anyhow::bail!("Session file nonce has the wrong length");
        }

        let key = self.derive_key(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| anyhow::anyhow!("Failed to decrypt session file (wrong passphrase?)"))?;
        let tokens: SessionTokens =
            serde_json::from_slice(&plaintext).context("Failed to parse decrypted session")?;

        *self.key.lock() = Some((salt, key));
        Ok(tokens)
    }

    fn save(&self, tokens: &SessionTokens) -> Result<()> {
        let (salt, key) = self.current_key()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let plaintext = serde_json::to_vec(tokens)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| anyhow::anyhow!("Failed to encrypt session"))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(&envelope)?)
            .context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        *self.key.lock() = None;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local backend. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    tokens: Mutex<SessionTokens>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with credentials, as if persisted by a previous run
    pub fn with_tokens(tokens: SessionTokens) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

impl TokenBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Result<SessionTokens> {
        Ok(self.tokens.lock().clone())
    }

    fn save(&self, tokens: &SessionTokens) -> Result<()> {
        *self.tokens.lock() = tokens.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tokens.lock() = SessionTokens::default();
        Ok(())
    }
}
