//! In-process fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde_json::json;

use crate::api::{ApiResponse, RequestDescriptor, SessionClient, Transport, TransportError};
use crate::auth::{Session, SessionTokens, TokenBackend};
use crate::utils::normalize_path;

/// Build a JWT-shaped access credential for `generation`
pub fn make_access_token(generation: usize) -> String {
    crate::auth::validator::tests::make_token(&json!({
        "user_id": FakeApi::USER_ID,
        "username": "alice",
        "generation": generation,
    }))
}

/// Fake backend implementing the credential exchange, renewal and
/// protected endpoints.
///
/// Protected endpoints accept only the most recently minted access
/// credential and echo it back as `{"path", "token"}`.
pub struct FakeApi {
    current: Mutex<String>,
    generation: AtomicUsize,
    renewal_delay: Duration,
    renewal_network_error: AtomicBool,
    reject_protected: AtomicBool,
    /// Password of the last registered account, accepted at login too
    registered_password: Mutex<Option<String>>,
    requests: Mutex<Vec<RequestDescriptor>>,
    pub renewal_calls: AtomicUsize,
}

impl FakeApi {
    pub const PASSWORD: &'static str = "hunter2";
    pub const RENEWAL: &'static str = "renewal-credential";
    pub const USER_ID: i64 = 42;

    pub fn new() -> Arc<Self> {
        Self::with_renewal_delay(Duration::ZERO)
    }

    pub fn with_renewal_delay(renewal_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(make_access_token(1)),
            generation: AtomicUsize::new(1),
            renewal_delay,
            renewal_network_error: AtomicBool::new(false),
            reject_protected: AtomicBool::new(false),
            registered_password: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            renewal_calls: AtomicUsize::new(0),
        })
    }

    pub fn current_token(&self) -> String {
        self.current.lock().clone()
    }

    /// Credentials whose access part the server no longer accepts
    pub fn expired_session(&self) -> SessionTokens {
        SessionTokens::new(make_access_token(0), Self::RENEWAL)
    }

    pub fn valid_session(&self) -> SessionTokens {
        SessionTokens::new(self.current_token(), Self::RENEWAL)
    }

    pub fn fail_renewal_with_network_error(&self) {
        self.renewal_network_error.store(true, Ordering::SeqCst);
    }

    /// Protected endpoints answer 401 even to fresh credentials
    pub fn reject_everything(&self) {
        self.reject_protected.store(true, Ordering::SeqCst);
    }

    pub fn last_request_to(&self, path: &str) -> Option<RequestDescriptor> {
        let wanted = normalize_path(path);
        self.requests
            .lock()
            .iter()
            .rev()
            .find(|r| normalize_path(&r.path) == wanted)
            .cloned()
    }

    fn body_str<'a>(request: &'a RequestDescriptor, field: &str) -> Option<&'a str> {
        request.body.as_ref().and_then(|b| b.get(field)).and_then(|v| v.as_str())
    }

    fn login(&self, request: &RequestDescriptor) -> ApiResponse {
        let password = Self::body_str(request, "password");
        let registered = self.registered_password.lock().clone();
        if password == Some(Self::PASSWORD) || (password.is_some() && password == registered.as_deref()) {
            let body = json!({"access": self.current_token(), "refresh": Self::RENEWAL});
            ApiResponse::new(StatusCode::OK, body.to_string())
        } else {
            let body = json!({"detail": "Invalid credentials. Please check your email/phone and password."});
            ApiResponse::new(StatusCode::UNAUTHORIZED, body.to_string())
        }
    }

    async fn renew(&self, request: &RequestDescriptor) -> Result<ApiResponse, TransportError> {
        self.renewal_calls.fetch_add(1, Ordering::SeqCst);
        if !self.renewal_delay.is_zero() {
            tokio::time::sleep(self.renewal_delay).await;
        }
        if self.renewal_network_error.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("connection reset".to_string()));
        }
        if Self::body_str(request, "refresh") != Some(Self::RENEWAL) {
            let body = json!({"detail": "Token is invalid or expired"});
            return Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, body.to_string()));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = make_access_token(generation);
        *self.current.lock() = token.clone();
        Ok(ApiResponse::new(StatusCode::OK, json!({"access": token}).to_string()))
    }

    fn protected(&self, request: &RequestDescriptor) -> ApiResponse {
        let current = self.current_token();
        if !self.reject_protected.load(Ordering::SeqCst) && request.bearer_token() == Some(current.as_str()) {
            let body = json!({"path": request.path, "token": current});
            ApiResponse::new(StatusCode::OK, body.to_string())
        } else {
            let body = json!({"detail": "Given token not valid for any token type"});
            ApiResponse::new(StatusCode::UNAUTHORIZED, body.to_string())
        }
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn send(&self, request: &RequestDescriptor) -> Result<ApiResponse, TransportError> {
        self.requests.lock().push(request.clone());
        match (&request.method, normalize_path(&request.path)) {
            (&Method::POST, "/api/users/login") => Ok(self.login(request)),
            (&Method::POST, "/api/users/register") => {
                *self.registered_password.lock() = Self::body_str(request, "password").map(str::to_string);
                let body = json!({
                    "user_id": 9,
                    "username": Self::body_str(request, "username"),
                    "email": Self::body_str(request, "email"),
                    "referral_code": "REF123",
                });
                Ok(ApiResponse::new(StatusCode::CREATED, body.to_string()))
            }
            (&Method::POST, "/api/token/refresh") => self.renew(request).await,
            _ => Ok(self.protected(request)),
        }
    }
}

/// Observer counting `on_session_lost` calls
#[derive(Clone, Default)]
pub struct SessionLostCounter {
    calls: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<String>>>,
}

impl SessionLostCounter {
    pub fn attach(client: &SessionClient) -> Self {
        let counter = Self::default();
        let observer = counter.clone();
        client.set_observer(Arc::new(move |redirect: &str| {
            observer.calls.fetch_add(1, Ordering::SeqCst);
            *observer.last.lock() = Some(redirect.to_string());
        }));
        counter
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_redirect(&self) -> Option<String> {
        self.last.lock().clone()
    }
}

/// Backend counting writes, and how many of them happened while the
/// watched session's renewal lock was held
#[derive(Clone, Default)]
pub struct LockAudit {
    session: Arc<OnceLock<Weak<Session>>>,
    writes: Arc<AtomicUsize>,
    under_lock: Arc<AtomicUsize>,
}

impl LockAudit {
    pub fn backend(&self) -> Box<dyn TokenBackend> {
        Box::new(self.clone())
    }

    pub fn watch(&self, session: &Arc<Session>) {
        let _ = self.session.set(Arc::downgrade(session));
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn writes_under_lock(&self) -> usize {
        self.under_lock.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = self.session.get().and_then(Weak::upgrade) {
            if session.renewal.try_lock().is_none() {
                self.under_lock.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl TokenBackend for LockAudit {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn load(&self) -> anyhow::Result<SessionTokens> {
        Ok(SessionTokens::default())
    }

    fn save(&self, _tokens: &SessionTokens) -> anyhow::Result<()> {
        self.record();
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.record();
        Ok(())
    }
}
