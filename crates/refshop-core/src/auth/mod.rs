//! Authentication module: credentials, validation and the session lifecycle.
//!
//! This module provides:
//! - `CredentialStore`: in-memory credentials mirrored to a `TokenBackend`
//! - `CredentialValidator`: structural checks of access credentials
//! - `RequestAuthenticator`: attaches the bearer credential to requests
//! - `RenewalCoordinator`: single-flight renewal with a FIFO waiter queue
//! - `SessionTeardown`: clears the session and signals the host
//!
//! Expiry is never judged locally. A 401 from the server is what triggers
//! renewal.

pub mod authenticator;
pub mod backend;
pub mod coordinator;
pub mod session;
pub mod store;
pub mod teardown;
pub mod validator;

pub use authenticator::{AllowList, RequestAuthenticator};
pub use backend::{EncryptedFileBackend, KeyringBackend, MemoryBackend, TokenBackend};
pub use coordinator::{RenewalCoordinator, RenewalTicket};
pub use session::{Released, RenewalState, Session, SessionObserver, SessionStatus};
pub use store::{CredentialStore, SessionTokens};
pub use teardown::SessionTeardown;
pub use validator::{CredentialValidator, TokenClaims};
