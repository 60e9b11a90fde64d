use chrono::{DateTime, Utc};

/// Number of leading characters of a token kept visible in logs
const TOKEN_VISIBLE_PREFIX: usize = 6;

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Mask a credential for logging, keeping only a short prefix
pub fn mask_token(token: &str) -> String {
    let len = token.chars().count();
    if len <= TOKEN_VISIBLE_PREFIX {
        "*".repeat(len)
    } else {
        let prefix: String = token.chars().take(TOKEN_VISIBLE_PREFIX).collect();
        format!("{}…({} chars)", prefix, len)
    }
}

/// Reduce a request target to a comparable path.
///
/// Drops the scheme and host of absolute URLs, the query string and fragment,
/// and any trailing slash, so `/api/users/login/?next=x` and
/// `http://host/api/users/login` compare equal.
pub fn normalize_path(target: &str) -> &str {
    let mut path = target;
    if let Some(idx) = path.find("://") {
        let after_scheme = &path[idx + 3..];
        path = match after_scheme.find('/') {
            Some(slash) => &after_scheme[slash..],
            None => "/",
        };
    }
    if let Some(idx) = path.find(['?', '#']) {
        path = &path[..idx];
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Format an optional timestamp for display
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    }
}
