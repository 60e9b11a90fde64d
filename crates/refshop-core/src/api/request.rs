//! Outbound request descriptors and buffered responses.
//!
//! Requests are plain data so they can be inspected by the authenticator,
//! sent by any `Transport`, and replayed after a credential renewal.

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ApiError;

/// Description of a single outbound HTTP call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/api/users/userinfo/`
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidInput(format!("Failed to encode request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether this request has already been replayed after a renewal
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    /// Bearer token currently carried in the `Authorization` header, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "Failed to parse JSON response: {} ({})",
                e,
                ApiError::truncate_body(&self.body)
            ))
        })
    }

    /// Convert a non-success response into the matching `ApiError`
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_reads_authorization_header() {
        let req = RequestDescriptor::get("/api/wallets/").header(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(req.bearer_token(), Some("abc.def.ghi"));
        assert_eq!(RequestDescriptor::get("/").bearer_token(), None);
    }

    #[test]
    fn test_error_for_status() {
        let ok = ApiResponse::new(StatusCode::OK, "{}");
        assert!(ok.error_for_status().is_ok());

        let missing = ApiResponse::new(StatusCode::NOT_FOUND, "gone");
        assert!(matches!(missing.error_for_status(), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_json_decode_failure_is_invalid_response() {
        let resp = ApiResponse::new(StatusCode::OK, "not json");
        let parsed: Result<serde_json::Value, _> = resp.json();
        assert!(matches!(parsed, Err(ApiError::InvalidResponse(_))));
    }
}
