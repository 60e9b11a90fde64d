//! Ending a session, either on request (logout) or after a failed renewal.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::RenewalError;

use super::session::{RenewalInner, RenewalState, Waiter};
use super::Session;

/// Work left over after the session was closed under its lock: waiters to
/// reject and whether the host must be told.
pub(crate) struct Closed {
    waiters: Vec<Waiter>,
    was_active: bool,
}

/// Clear credentials and the waiter queue together. Must be called with the
/// renewal lock held so no request observes a partially cleared session.
/// The backend is cleared later, by [`Closed::finish`].
pub(crate) fn close_locked(session: &Session, inner: &mut RenewalInner) -> Closed {
    session.store().stage_clear();
    inner.state = RenewalState::Failed;
    inner.epoch += 1;
    let was_active = std::mem::replace(&mut inner.active, false);
    Closed {
        waiters: inner.waiters.drain(..).collect(),
        was_active,
    }
}

impl Closed {
    /// Reject leftover waiters with `error` and signal the host. Runs after
    /// the lock is released so observers may call back into the session.
    pub(crate) fn finish(self, session: &Session, error: RenewalError) -> bool {
        session.store().persist();
        if !self.waiters.is_empty() {
            debug!(count = self.waiters.len(), error = %error, "Rejecting queued requests");
        }
        for waiter in self.waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        if self.was_active {
            session.notify_session_lost();
        }
        self.was_active
    }
}

/// Close the session, failing any queued requests with `error`.
pub(crate) fn teardown_with(session: &Session, error: RenewalError) -> bool {
    let closed = {
        let mut inner = session.renewal.lock();
        close_locked(session, &mut inner)
    };
    closed.finish(session, error)
}

/// Handle the host uses to end the session (logout).
#[derive(Clone)]
pub struct SessionTeardown {
    session: Arc<Session>,
}

impl SessionTeardown {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Clear credentials, reject stragglers and signal the host.
    ///
    /// Idempotent: the host is signalled only on the first call after a
    /// session was established. Returns whether this call ended a session.
    pub fn teardown(&self) -> bool {
        let ended = teardown_with(&self.session, RenewalError::SessionLost);
        if !ended {
            warn!("Teardown requested without an active session");
        }
        ended
    }
}
