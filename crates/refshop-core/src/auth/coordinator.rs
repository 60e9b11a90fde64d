//! Single-flight credential renewal.
//!
//! The first caller to see a 401 while the session is `Idle` starts exactly
//! one renewal call and is queued as waiter 0. Callers arriving while the
//! renewal is in flight are appended to the same queue. When the call
//! finishes the queue is drained once: every waiter is released in FIFO order
//! on success, or rejected with the renewal error on failure, in which case
//! the session is torn down.
//!
//! The renewal runs on its own task, so it completes even when the caller
//! that started it is dropped.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::{ApiError, RenewalError, RequestDescriptor, Transport};
use crate::utils::mask_token;

use super::session::{Released, RenewalState, WaiterOutcome};
use super::teardown::close_locked;
use super::Session;

#[derive(Debug, Serialize)]
struct RenewalRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenewalGrant {
    access: String,
    /// Present when the server rotates renewal credentials
    #[serde(default)]
    refresh: Option<String>,
}

/// Place in line for the outcome of a renewal.
#[derive(Debug)]
pub enum RenewalTicket {
    /// Outcome known without waiting (missing credential, failed session)
    Ready(Result<Released, RenewalError>),
    Pending(oneshot::Receiver<WaiterOutcome>),
}

impl RenewalTicket {
    /// Suspend until the renewal this ticket belongs to resolves
    pub async fn wait(self) -> Result<Released, RenewalError> {
        match self {
            RenewalTicket::Ready(outcome) => outcome,
            // Sender dropped without an answer: the renewal task is gone
            RenewalTicket::Pending(rx) => rx.await.unwrap_or(Err(RenewalError::SessionLost)),
        }
    }
}

pub struct RenewalCoordinator {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    renewal_path: String,
    timeout: Duration,
}

impl RenewalCoordinator {
    pub fn new(
        session: Arc<Session>,
        transport: Arc<dyn Transport>,
        renewal_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            transport,
            renewal_path: renewal_path.into(),
            timeout,
        }
    }

    /// Join the current renewal, starting one if none is in flight.
    ///
    /// `carried` is the access credential the rejected request was sent
    /// with. If the store already holds a different one, the rejection is
    /// stale and the ticket is ready at once without a renewal call.
    ///
    /// Must be called from within a tokio runtime.
    pub fn join(&self, carried: Option<&str>) -> RenewalTicket {
        let mut inner = self.session.renewal.lock();
        let state = inner.state;
        match state {
            RenewalState::Failed => RenewalTicket::Ready(Err(RenewalError::SessionLost)),
            RenewalState::Idle if self.is_stale(carried) => {
                debug!("Credential changed while request was in flight, replaying");
                RenewalTicket::Ready(Ok(Released { position: 0 }))
            }
            RenewalState::Refreshing => {
                let (tx, rx) = oneshot::channel();
                inner.waiters.push_back(tx);
                debug!(queued = inner.waiters.len(), "Renewal in flight, request queued");
                RenewalTicket::Pending(rx)
            }
            RenewalState::Idle => {
                let Some(renewal) = self.session.store().renewal() else {
                    warn!("Access credential rejected and no renewal credential available");
                    let closed = close_locked(&self.session, &mut inner);
                    drop(inner);
                    closed.finish(&self.session, RenewalError::MissingRenewalCredential);
                    return RenewalTicket::Ready(Err(RenewalError::MissingRenewalCredential));
                };

                let (tx, rx) = oneshot::channel();
                inner.state = RenewalState::Refreshing;
                inner.waiters.push_back(tx);
                let epoch = inner.epoch;
                drop(inner);

                info!(renewal = %mask_token(&renewal), "Access credential rejected, renewing");
                let task = RenewalTask {
                    session: self.session.clone(),
                    transport: self.transport.clone(),
                    path: self.renewal_path.clone(),
                    timeout: self.timeout,
                    epoch,
                };
                tokio::spawn(task.run(renewal));
                RenewalTicket::Pending(rx)
            }
        }
    }

    /// Join the current renewal and wait for its outcome
    pub async fn renew(&self, carried: Option<&str>) -> Result<Released, RenewalError> {
        self.join(carried).wait().await
    }

    fn is_stale(&self, carried: Option<&str>) -> bool {
        match self.session.store().access() {
            Some(current) => carried != Some(current.as_str()),
            None => false,
        }
    }
}

struct RenewalTask {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    path: String,
    timeout: Duration,
    epoch: u64,
}

impl RenewalTask {
    async fn run(self, renewal: String) {
        let outcome = match tokio::time::timeout(self.timeout, self.request(&renewal)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RenewalError::TimedOut(self.timeout)),
        };
        self.complete(outcome);
    }

    async fn request(&self, renewal: &str) -> Result<RenewalGrant, RenewalError> {
        let request = RequestDescriptor::post(self.path.as_str())
            .json(&RenewalRequest { refresh: renewal })
            .map_err(|e| RenewalError::Transport(e.to_string()))?;

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| RenewalError::Transport(e.to_string()))?;

        if !response.is_success() {
            return Err(RenewalError::Rejected {
                status: response.status.as_u16(),
                body: ApiError::truncate_body(&response.body),
            });
        }

        let grant: RenewalGrant = serde_json::from_str(&response.body)
            .map_err(|e| RenewalError::MalformedResponse(e.to_string()))?;
        if grant.access.trim().is_empty() {
            return Err(RenewalError::MalformedResponse(
                "empty access credential".to_string(),
            ));
        }
        Ok(grant)
    }

    fn complete(self, outcome: Result<RenewalGrant, RenewalError>) {
        let mut inner = self.session.renewal.lock();
        if inner.epoch != self.epoch || inner.state != RenewalState::Refreshing {
            debug!(
                epoch = self.epoch,
                current = inner.epoch,
                "Session changed during renewal, discarding result"
            );
            return;
        }

        match outcome {
            Ok(grant) => {
                self.session.store().stage_renewed(grant.access, grant.refresh);
                inner.state = RenewalState::Idle;
                let waiters = std::mem::take(&mut inner.waiters);
                drop(inner);
                self.session.store().persist();

                info!(released = waiters.len(), "Access credential renewed");
                for (position, waiter) in waiters.into_iter().enumerate() {
                    // A dropped receiver means the caller lost interest
                    let _ = waiter.send(Ok(Released { position }));
                }
            }
            Err(error) => {
                warn!(error = %error, queued = inner.waiters.len(), "Renewal failed, closing session");
                let closed = close_locked(&self.session, &mut inner);
                drop(inner);
                closed.finish(&self.session, error);
            }
        }
    }
}
