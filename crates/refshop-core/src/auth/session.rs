use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::api::RenewalError;
use crate::utils::normalize_path;

use super::{CredentialStore, CredentialValidator, SessionTokens, TokenClaims};

/// Receives the one signal the session core sends to its host.
pub trait SessionObserver: Send + Sync {
    /// The session is gone; the host should navigate to `redirect_to`
    fn on_session_lost(&self, redirect_to: &str);
}

impl<F> SessionObserver for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_session_lost(&self, redirect_to: &str) {
        self(redirect_to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RenewalState {
    Idle,
    /// Exactly one renewal call is outstanding
    Refreshing,
    /// Renewal failed or the session was closed; only a new login recovers
    Failed,
}

/// A queued caller is released with its position in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub position: usize,
}

pub(crate) type WaiterOutcome = Result<Released, RenewalError>;
pub(crate) type Waiter = oneshot::Sender<WaiterOutcome>;

pub(crate) struct RenewalInner {
    pub(crate) state: RenewalState,
    pub(crate) waiters: VecDeque<Waiter>,
    /// A session was established and has not been torn down yet
    pub(crate) active: bool,
    /// Bumped on every establish/teardown so late renewal results are ignored
    pub(crate) epoch: u64,
}

/// Shared state of one authenticated session.
///
/// Owned by `Arc` and handed to the authenticator, the coordinator and the
/// teardown handle. Two locks exist: `renewal` guards the state machine and
/// waiter queue, and the credential store guards the tokens. When both are
/// needed `renewal` is always taken first.
pub struct Session {
    store: CredentialStore,
    pub(crate) renewal: Mutex<RenewalInner>,
    location: Mutex<Option<String>>,
    observer: Mutex<Option<Arc<dyn SessionObserver>>>,
    entry_surfaces: Vec<String>,
    redirect_to: String,
}

impl Session {
    pub fn new(
        store: CredentialStore,
        entry_surfaces: Vec<String>,
        redirect_to: impl Into<String>,
    ) -> Self {
        Self {
            store,
            renewal: Mutex::new(RenewalInner {
                state: RenewalState::Idle,
                waiters: VecDeque::new(),
                active: false,
                epoch: 0,
            }),
            location: Mutex::new(None),
            observer: Mutex::new(None),
            entry_surfaces: entry_surfaces
                .iter()
                .map(|s| normalize_path(s).to_string())
                .collect(),
            redirect_to: redirect_to.into(),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        *self.observer.lock() = Some(observer);
    }

    /// Record the host's current navigation context
    pub fn set_location(&self, location: impl Into<String>) {
        *self.location.lock() = Some(location.into());
    }

    /// True while the host is showing an unauthenticated entry surface
    pub fn on_entry_surface(&self) -> bool {
        match self.location.lock().as_deref() {
            Some(location) => {
                let location = normalize_path(location);
                self.entry_surfaces.iter().any(|s| s == location)
            }
            None => false,
        }
    }

    pub fn state(&self) -> RenewalState {
        self.renewal.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.renewal.lock().active
    }

    pub fn pending_waiters(&self) -> usize {
        self.renewal.lock().waiters.len()
    }

    /// Install freshly exchanged credentials and reset the state machine.
    ///
    /// Callers still queued on an older renewal are released and will
    /// replay with the new credential.
    pub fn establish(&self, tokens: SessionTokens) {
        let waiters = {
            let mut inner = self.renewal.lock();
            self.store.stage_replace(tokens);
            inner.state = RenewalState::Idle;
            inner.active = true;
            inner.epoch += 1;
            std::mem::take(&mut inner.waiters)
        };
        self.store.persist();
        info!(released = waiters.len(), "Session established");
        for (position, waiter) in waiters.into_iter().enumerate() {
            let _ = waiter.send(Ok(Released { position }));
        }
    }

    /// Mark credentials already present in the store (loaded from disk) as
    /// the current session
    pub(crate) fn activate(&self) {
        let mut inner = self.renewal.lock();
        inner.state = RenewalState::Idle;
        inner.active = true;
        inner.epoch += 1;
        debug!(epoch = inner.epoch, "Session restored");
    }

    pub(crate) fn notify_session_lost(&self) {
        let observer = self.observer.lock().clone();
        info!(redirect_to = %self.redirect_to, "Session lost");
        if let Some(observer) = observer {
            observer.on_session_lost(&self.redirect_to);
        }
    }

    pub fn status(&self) -> SessionStatus {
        let (state, active, pending_waiters) = {
            let inner = self.renewal.lock();
            (inner.state, inner.active, inner.waiters.len())
        };
        let tokens = self.store.get();
        SessionStatus {
            state,
            active,
            has_access: tokens.access().is_some(),
            has_renewal: tokens.renewal().is_some(),
            pending_waiters,
            degraded_storage: self.store.is_degraded(),
            issued_at: tokens.issued_at,
            renewed_at: tokens.renewed_at,
            claims: tokens.access().and_then(CredentialValidator::decode_claims),
        }
    }
}

/// Point-in-time view of a session for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionStatus {
    pub state: RenewalState,
    pub active: bool,
    pub has_access: bool,
    pub has_renewal: bool,
    pub pending_waiters: usize,
    pub degraded_storage: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub claims: Option<TokenClaims>,
}
