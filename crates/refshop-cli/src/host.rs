//! Wiring the session client to the configured credential storage.

use std::sync::Arc;

use anyhow::Result;
use refshop_core::auth::{
    EncryptedFileBackend, KeyringBackend, MemoryBackend, SessionObserver, TokenBackend,
};
use refshop_core::api::RestoreOutcome;
use refshop_core::{Config, CredentialStore, SessionClient, StorageKind};
use tracing::{debug, warn};

/// Environment variable holding the passphrase for encrypted file storage
const PASSPHRASE_ENV: &str = "REFSHOP_STORE_PASSPHRASE";

/// Reports a lost session to the terminal user
struct TerminalObserver;

impl SessionObserver for TerminalObserver {
    fn on_session_lost(&self, redirect_to: &str) {
        eprintln!("Session expired. Please log in again (returning to {}).", redirect_to);
    }
}

pub struct Host {
    pub client: SessionClient,
    pub storage_label: &'static str,
}

impl Host {
    /// `ephemeral` keeps credentials in memory whatever the config says
    pub fn new(config: &Config, ephemeral: bool) -> Result<Self> {
        let backend = Self::backend(config, ephemeral)?;
        let storage_label = backend.name();
        let client = SessionClient::http(config.client_config(), CredentialStore::new(backend))?;
        client.set_observer(Arc::new(TerminalObserver));

        let outcome = client.restore();
        debug!(?outcome, storage = storage_label, "Session restored");
        if outcome == RestoreOutcome::RenewalOnly {
            debug!("Access credential will be renewed on first request");
        }

        Ok(Self {
            client,
            storage_label,
        })
    }

    fn backend(config: &Config, ephemeral: bool) -> Result<Box<dyn TokenBackend>> {
        if ephemeral {
            return Ok(Box::new(MemoryBackend::new()));
        }
        let backend: Box<dyn TokenBackend> = match config.storage {
            StorageKind::Keyring => Box::new(KeyringBackend::new()),
            StorageKind::EncryptedFile => match std::env::var(PASSPHRASE_ENV) {
                Ok(passphrase) if !passphrase.is_empty() => {
                    Box::new(EncryptedFileBackend::in_dir(&config.cache_dir()?, passphrase))
                }
                _ => {
                    warn!(
                        env = PASSPHRASE_ENV,
                        "No passphrase for encrypted session file, session will not persist"
                    );
                    Box::new(MemoryBackend::new())
                }
            },
            StorageKind::Memory => Box::new(MemoryBackend::new()),
        };
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_overrides_configured_storage() {
        let config = Config {
            storage: StorageKind::Keyring,
            ..Default::default()
        };
        let backend = Host::backend(&config, true).expect("backend");
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_memory_storage_from_config() {
        let config = Config {
            storage: StorageKind::Memory,
            ..Default::default()
        };
        let backend = Host::backend(&config, false).expect("backend");
        assert_eq!(backend.name(), "memory");
    }
}
