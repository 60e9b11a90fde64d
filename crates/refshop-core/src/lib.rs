//! refshop core library.
//!
//! The authenticated session subsystem of the refshop client: credential
//! storage, request authentication, single-flight credential renewal and
//! session teardown, exposed to the host application through
//! [`SessionClient`].

pub mod api;
pub mod auth;
pub mod config;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use api::{ApiError, ApiResponse, RequestDescriptor, SessionClient};
pub use auth::{CredentialStore, SessionObserver, SessionStatus, SessionTokens};
pub use config::{ClientConfig, Config, StorageKind};
