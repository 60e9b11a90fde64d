//! HTTP client contract for the refshop API.
//!
//! `SessionClient` is the only type the hosting application talks to. Every
//! call passes through the request authenticator, the transport and, on a
//! 401, the renewal coordinator.

pub mod client;
pub mod error;
pub mod request;
pub mod transport;

pub use client::{LoginIdentifier, Registration, RegisteredUser, RestoreOutcome, SessionClient};
pub use error::{ApiError, RenewalError, TransportError};
pub use request::{ApiResponse, RequestDescriptor};
pub use transport::{HttpTransport, Transport};
