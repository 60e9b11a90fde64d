use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::utils::truncate_string;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Network-level failure while sending a request.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a credential renewal did not produce a new access credential.
///
/// Cloned once per waiter when a renewal fails, so every queued caller
/// receives the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    #[error("No renewal credential available")]
    MissingRenewalCredential,

    #[error("Renewal rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Renewal request failed: {0}")]
    Transport(String),

    #[error("Malformed renewal response: {0}")]
    MalformedResponse(String),

    #[error("Renewal timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Session has been closed - please log in again")]
    SessionLost,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session renewal failed: {0}")]
    RenewalFailed(#[from] RenewalError),

    #[error("Still unauthorized after renewing the session")]
    RetryExhausted,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{} (truncated, {} total bytes)",
                truncate_string(body, MAX_ERROR_BODY_LENGTH),
                body.len()
            )
        }
    }

    /// Pull the human-readable message out of a Django REST Framework error
    /// body: `detail`, then `message`, then `non_field_errors`, then the
    /// first field error as `"field name: message"`. Non-JSON bodies are
    /// returned as they are.
    pub(crate) fn user_message(body: &str) -> String {
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
            return body.to_string();
        };

        for key in ["detail", "message", "non_field_errors"] {
            if let Some(message) = fields.get(key).and_then(first_text) {
                return message;
            }
        }
        // serde_json maps iterate in key order, so "first" is alphabetical
        fields
            .iter()
            .find_map(|(field, value)| {
                let message = first_text(value).or_else(|| match value {
                    Value::Object(nested) => nested.values().find_map(first_text),
                    _ => None,
                })?;
                Some(format!("{}: {}", field.replace('_', " "), message))
            })
            .unwrap_or_else(|| body.to_string())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(&Self::user_message(body));
        match status.as_u16() {
            401 => ApiError::Unauthorized(truncated),
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the session is gone and the user has to log in again
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::RenewalFailed(_) | ApiError::RetryExhausted)
    }
}

/// A string, or the first string of an array
fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_maps_known_codes() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, "bad password"),
            ApiError::Unauthorized(ref b) if b == "bad password"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, ""),
            ApiError::AccessDenied(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, "{}"),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_drf_error_bodies_become_messages() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"detail":"Invalid credentials"}"#),
            ApiError::Unauthorized(ref m) if m == "Invalid credentials"
        ));
        assert_eq!(
            ApiError::user_message(r#"{"message":["Account disabled"]}"#),
            "Account disabled"
        );
        assert_eq!(
            ApiError::user_message(r#"{"email":["bad"],"non_field_errors":["Passwords differ"]}"#),
            "Passwords differ"
        );
        assert_eq!(
            ApiError::user_message(r#"{"phone_number":["This field is required."]}"#),
            "phone number: This field is required."
        );
        assert_eq!(
            ApiError::user_message(r#"{"address":{"city":["Unknown city"]}}"#),
            "address: Unknown city"
        );
        // Nothing recognisable: keep the raw body
        assert_eq!(ApiError::user_message(r#"{"code":7}"#), r#"{"code":7}"#);
        assert_eq!(ApiError::user_message("<html>502</html>"), "<html>502</html>");
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.len() < 600);
        assert!(truncated.ends_with("(truncated, 2000 total bytes)"));
    }

    #[test]
    fn test_requires_login() {
        assert!(ApiError::RetryExhausted.requires_login());
        assert!(ApiError::RenewalFailed(RenewalError::SessionLost).requires_login());
        assert!(!ApiError::RateLimited.requires_login());
    }
}
