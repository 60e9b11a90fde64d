use std::sync::Arc;

use reqwest::header::{self, HeaderValue};
use tracing::{debug, warn};

use crate::api::RequestDescriptor;
use crate::utils::normalize_path;

use super::Session;

/// Endpoints that are called without credentials (credential exchange).
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    paths: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| normalize_path(p.as_ref()).to_string())
                .collect(),
        }
    }

    pub fn matches(&self, target: &str) -> bool {
        let path = normalize_path(target);
        self.paths.iter().any(|p| p == path)
    }
}

/// Pre-send hook attaching the access credential to outbound requests.
#[derive(Clone)]
pub struct RequestAuthenticator {
    session: Arc<Session>,
    allow_list: AllowList,
}

impl RequestAuthenticator {
    pub fn new(session: Arc<Session>, allow_list: AllowList) -> Self {
        Self {
            session,
            allow_list,
        }
    }

    /// Whether `target` is exempt from credentials and renewal
    pub fn is_exempt(&self, target: &str) -> bool {
        self.allow_list.matches(target)
    }

    /// Return `request` with the current bearer credential attached, or with
    /// any authorization removed when it targets an allow-listed endpoint.
    pub fn authenticate(&self, mut request: RequestDescriptor) -> RequestDescriptor {
        if self.is_exempt(&request.path) {
            if request.headers.remove(header::AUTHORIZATION).is_some() {
                debug!(path = %request.path, "Stripped authorization from credential exchange request");
            }
            return request;
        }

        if let Some(token) = self.session.store().access() {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => {
                    warn!(path = %request.path, "Access credential is not a valid header value, sending without it");
                }
            }
        }
        request
    }
}
