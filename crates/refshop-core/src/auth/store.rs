use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::{MemoryBackend, TokenBackend};

/// Snapshot of the credentials held by a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionTokens {
    pub access: Option<String>,
    pub renewal: Option<String>,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub renewed_at: Option<DateTime<Utc>>,
}

impl SessionTokens {
    pub fn new(access: impl Into<String>, renewal: impl Into<String>) -> Self {
        Self {
            access: Some(access.into()),
            renewal: Some(renewal.into()),
            issued_at: Some(Utc::now()),
            renewed_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.renewal.is_none()
    }

    /// Access credential, ignoring empty strings
    pub fn access(&self) -> Option<&str> {
        self.access.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Renewal credential, ignoring empty strings
    pub fn renewal(&self) -> Option<&str> {
        self.renewal.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Current credentials and a counter bumped on every change
#[derive(Default)]
struct Slot {
    tokens: SessionTokens,
    version: u64,
}

/// In-memory credential holder mirrored to a durable backend.
///
/// Reads never touch the backend. Writes update the in-memory copy under a
/// lock first and then persist it; if the backend fails the store keeps
/// working in memory and reports itself as degraded.
///
/// Callers holding the session's renewal lock only stage changes
/// (`stage_*`) and call [`persist`](Self::persist) once the lock is
/// released, so backend I/O never runs under that lock.
pub struct CredentialStore {
    slot: Mutex<Slot>,
    /// Version last written to the backend; held for the whole write
    persisted: Mutex<u64>,
    backend: Box<dyn TokenBackend>,
    degraded: AtomicBool,
}

impl CredentialStore {
    pub fn new(backend: Box<dyn TokenBackend>) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            persisted: Mutex::new(0),
            backend,
            degraded: AtomicBool::new(false),
        }
    }

    /// Store that only lives for the duration of the process
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Read persisted credentials into memory, replacing the current ones.
    pub fn load(&self) -> SessionTokens {
        let loaded = match self.backend.load() {
            Ok(tokens) => tokens,
            Err(e) => {
                self.mark_degraded("load", &e);
                SessionTokens::default()
            }
        };
        debug!(
            backend = self.backend.name(),
            has_access = loaded.access().is_some(),
            has_renewal = loaded.renewal().is_some(),
            "Loaded persisted credentials"
        );
        let mut persisted = self.persisted.lock();
        let mut slot = self.slot.lock();
        slot.tokens = loaded.clone();
        slot.version += 1;
        *persisted = slot.version;
        loaded
    }

    pub fn get(&self) -> SessionTokens {
        self.slot.lock().tokens.clone()
    }

    pub fn access(&self) -> Option<String> {
        self.slot.lock().tokens.access().map(str::to_string)
    }

    pub fn renewal(&self) -> Option<String> {
        self.slot.lock().tokens.renewal().map(str::to_string)
    }

    pub fn set_access(&self, token: impl Into<String>) {
        self.set_renewed(token, None);
    }

    pub fn set_renewal(&self, token: impl Into<String>) {
        self.update(|tokens| tokens.renewal = Some(token.into()));
    }

    /// Replace both credentials, as after a credential exchange
    pub fn set_pair(&self, access: impl Into<String>, renewal: impl Into<String>) {
        let fresh = SessionTokens::new(access, renewal);
        self.update(|tokens| *tokens = fresh);
    }

    /// Replace everything, as after a credential exchange that may omit the
    /// renewal credential
    pub fn replace(&self, fresh: SessionTokens) {
        self.update(|tokens| *tokens = fresh);
    }

    /// Store the result of a renewal. A rotated renewal credential replaces
    /// the old one in the same write.
    pub fn set_renewed(&self, access: impl Into<String>, renewal: Option<String>) {
        self.stage_renewed(access, renewal);
        self.persist();
    }

    /// Keep the renewal credential but forget the access credential
    pub fn drop_access(&self) {
        self.update(|tokens| tokens.access = None);
    }

    pub fn clear(&self) {
        self.stage_clear();
        self.persist();
    }

    pub(crate) fn stage_replace(&self, fresh: SessionTokens) {
        self.stage(|tokens| *tokens = fresh);
    }

    pub(crate) fn stage_renewed(&self, access: impl Into<String>, renewal: Option<String>) {
        self.stage(|tokens| {
            tokens.access = Some(access.into());
            if let Some(renewal) = renewal {
                tokens.renewal = Some(renewal);
            }
            tokens.renewed_at = Some(Utc::now());
        });
    }

    pub(crate) fn stage_clear(&self) {
        self.stage(|tokens| *tokens = SessionTokens::default());
    }

    /// Write the latest staged credentials to the backend.
    ///
    /// Writes are serialized and a write never replaces a newer one, so the
    /// backend always ends up with the most recent snapshot.
    pub(crate) fn persist(&self) {
        let mut persisted = self.persisted.lock();
        let (snapshot, version) = {
            let slot = self.slot.lock();
            (slot.tokens.clone(), slot.version)
        };
        if version == *persisted {
            return;
        }

        let (operation, result) = if snapshot.is_empty() {
            ("clear", self.backend.clear())
        } else {
            ("save", self.backend.save(&snapshot))
        };
        if let Err(e) = result {
            self.mark_degraded(operation, &e);
        }
        *persisted = version;
    }

    /// True once the backend has failed and credentials live only in memory
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn stage(&self, apply: impl FnOnce(&mut SessionTokens)) {
        let mut slot = self.slot.lock();
        apply(&mut slot.tokens);
        slot.version += 1;
    }

    fn update(&self, apply: impl FnOnce(&mut SessionTokens)) {
        self.stage(apply);
        self.persist();
    }

    fn mark_degraded(&self, operation: &str, error: &anyhow::Error) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                backend = self.backend.name(),
                operation,
                error = %error,
                "Credential storage unavailable, continuing in memory"
            );
        } else {
            debug!(backend = self.backend.name(), operation, error = %error, "Credential storage still unavailable");
        }
    }
}
