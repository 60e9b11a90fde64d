//! API client wrapping every call in the session lifecycle.
//!
//! `SessionClient` owns the wiring between the shared `Session`, the
//! `RequestAuthenticator`, the `RenewalCoordinator` and a `Transport`.
//! Clone is cheap - all parts are behind `Arc`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{
    AllowList, CredentialStore, CredentialValidator, RenewalCoordinator, RequestAuthenticator,
    Session, SessionObserver, SessionStatus, SessionTeardown, SessionTokens, TokenClaims,
};
use crate::config::ClientConfig;

use super::{ApiError, ApiResponse, HttpTransport, RequestDescriptor, Transport};

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
/// 1 second is polite to the server while not making users wait too long.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// How a user identifies themselves at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Email(String),
    Phone(String),
}

impl LoginIdentifier {
    /// Anything containing `@` is an email address, everything else a phone
    /// number
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ApiError::InvalidInput(
                "Please provide either email or phone number".to_string(),
            ));
        }
        if trimmed.contains('@') {
            Ok(LoginIdentifier::Email(trimmed.to_string()))
        } else {
            Ok(LoginIdentifier::Phone(trimmed.to_string()))
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenPair {
    access: Option<String>,
    refresh: Option<String>,
}

/// New account details for registration.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<String>,
}

impl Registration {
    fn normalized(&self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            phone_number: self.phone_number.trim().to_string(),
            password: self.password.clone(),
            referred_by: self
                .referred_by
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        }
    }
}

/// Account summary returned by the registration endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisteredUser {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// What `SessionClient::restore` found in durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A structurally valid access credential was found
    Authenticated,
    /// Only a renewal credential is usable; the first call will renew
    RenewalOnly,
    /// Nothing usable was persisted
    Anonymous,
}

#[derive(Clone)]
pub struct SessionClient {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    authenticator: RequestAuthenticator,
    coordinator: Arc<RenewalCoordinator>,
    config: Arc<ClientConfig>,
}

impl SessionClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, store: CredentialStore) -> Self {
        let session = Arc::new(Session::new(
            store,
            config.entry_surfaces.clone(),
            config.session_lost_redirect.clone(),
        ));
        let authenticator =
            RequestAuthenticator::new(session.clone(), AllowList::new(&config.allow_list));
        let coordinator = Arc::new(RenewalCoordinator::new(
            session.clone(),
            transport.clone(),
            config.renewal_path.clone(),
            config.renewal_timeout,
        ));
        Self {
            session,
            transport,
            authenticator,
            coordinator,
            config: Arc::new(config),
        }
    }

    /// Client talking to `config.base_url` over HTTP
    pub fn http(config: ClientConfig, store: CredentialStore) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(config.base_url.clone(), config.request_timeout)?;
        Ok(Self::new(config, Arc::new(transport), store))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.session.set_observer(observer);
    }

    /// Tell the client which screen the host is showing
    pub fn set_location(&self, location: impl Into<String>) {
        self.session.set_location(location);
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn teardown_handle(&self) -> SessionTeardown {
        SessionTeardown::new(self.session.clone())
    }

    // ===== Session lifecycle =====

    /// Load persisted credentials at startup and decide whether to trust them.
    ///
    /// Only the shape of the access credential is checked; an expired but
    /// well-formed credential is kept and renewed on its first 401.
    pub fn restore(&self) -> RestoreOutcome {
        let store = self.session.store();
        let tokens = store.load();
        let access_ok = tokens
            .access()
            .map(CredentialValidator::is_structurally_valid)
            .unwrap_or(false);

        let outcome = match (access_ok, tokens.renewal().is_some()) {
            (true, _) => RestoreOutcome::Authenticated,
            (false, true) => {
                if tokens.access().is_some() {
                    warn!("Persisted access credential is malformed, discarding it");
                    store.drop_access();
                }
                RestoreOutcome::RenewalOnly
            }
            (false, false) => {
                if !tokens.is_empty() {
                    warn!("Persisted credentials are unusable, clearing them");
                    store.clear();
                }
                RestoreOutcome::Anonymous
            }
        };

        if outcome != RestoreOutcome::Anonymous {
            self.session.activate();
        }
        info!(?outcome, "Session restore finished");
        outcome
    }

    /// Exchange an email/phone and password for session credentials
    pub async fn login(&self, identifier: &str, password: &str) -> Result<TokenClaims, ApiError> {
        let identifier = LoginIdentifier::parse(identifier)?;
        let password = password.trim();
        if password.is_empty() {
            return Err(ApiError::InvalidInput(
                "Username and password are required".to_string(),
            ));
        }
        self.exchange(identifier, password).await
    }

    /// Post the credential exchange and install the returned credentials.
    /// `password` is sent exactly as given.
    async fn exchange(
        &self,
        identifier: LoginIdentifier,
        password: &str,
    ) -> Result<TokenClaims, ApiError> {
        let body = match identifier {
            LoginIdentifier::Email(ref email) => LoginRequest {
                email: Some(email.as_str()),
                phone: None,
                password,
            },
            LoginIdentifier::Phone(ref phone) => LoginRequest {
                email: None,
                phone: Some(phone.as_str()),
                password,
            },
        };
        let request = RequestDescriptor::post(self.config.login_path.as_str()).json(&body)?;
        let response = self.execute(request).await?;

        let pair: TokenPair = response.json()?;
        let access = pair
            .access
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("Invalid response format".to_string()))?;
        if pair.refresh.is_none() {
            warn!("Login response carried no renewal credential");
        }

        let claims = CredentialValidator::decode_claims(&access).unwrap_or_default();
        self.session.establish(SessionTokens {
            access: Some(access),
            renewal: pair.refresh,
            issued_at: Some(chrono::Utc::now()),
            renewed_at: None,
        });
        info!(user_id = ?claims.user_id, "Logged in");
        Ok(claims)
    }

    /// Create an account and log straight into it with its email address
    pub async fn register(&self, registration: &Registration) -> Result<RegisteredUser, ApiError> {
        let registration = registration.normalized();
        if registration.email.is_empty() || registration.password.is_empty() {
            return Err(ApiError::InvalidInput(
                "Email and password are required".to_string(),
            ));
        }

        let request =
            RequestDescriptor::post(self.config.register_path.as_str()).json(&registration)?;
        let response = self.execute(request).await?;
        let user: RegisteredUser = response.json().unwrap_or_default();
        debug!(user_id = ?user.user_id, "Registered account");

        // The account was created with the password as typed, so log in with it
        self.exchange(
            LoginIdentifier::Email(registration.email.clone()),
            &registration.password,
        )
        .await?;
        Ok(user)
    }

    /// End the session. Safe to call more than once.
    pub fn logout(&self) {
        self.teardown_handle().teardown();
    }

    // ===== Requests =====

    /// Send `request` with the session credential, renewing it once on a 401.
    ///
    /// A 401 is returned to the caller as `Unauthorized` when the request
    /// targets a credential-exchange endpoint or the host is showing an entry
    /// surface, and as `RetryExhausted` when the replay after a successful
    /// renewal is rejected again.
    pub async fn execute(&self, mut request: RequestDescriptor) -> Result<ApiResponse, ApiError> {
        loop {
            let prepared = self.authenticator.authenticate(request.clone());
            let response = self.transport.send(&prepared).await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return response.error_for_status();
            }

            if self.authenticator.is_exempt(&request.path) || self.session.on_entry_surface() {
                debug!(path = %request.path, "401 reported without renewal");
                return response.error_for_status();
            }
            if request.is_retried() {
                warn!(path = %request.path, "Request rejected again after renewal");
                return Err(ApiError::RetryExhausted);
            }
            request.mark_retried();

            let released = self.coordinator.renew(prepared.bearer_token()).await?;
            debug!(
                path = %request.path,
                position = released.position,
                "Replaying request with renewed credential"
            );
        }
    }

    /// GET `path` and decode the JSON response
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(RequestDescriptor::get(path)).await
    }

    /// POST `body` as JSON to `path` and decode the JSON response
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(RequestDescriptor::post(path).json(body)?).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestDescriptor) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.execute(request.clone()).await {
                Ok(response) => return response.json(),
                Err(ApiError::RateLimited) => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(path = %request.path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                Err(e) => return Err(e),
            }
        }
    }
}
