//! Structural validation of access credentials.
//!
//! A credential is accepted when it is a JWT whose header and payload decode
//! to JSON objects. Expiry is never checked here: the server's 401 decides
//! whether a credential is still usable, since the client clock cannot be
//! trusted to agree with the issuer's.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Informational claims carried by an access credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenClaims {
    #[serde(default, alias = "id")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry as a unix timestamp. Reported, never enforced.
    #[serde(default)]
    pub exp: Option<i64>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }
}

pub struct CredentialValidator;

impl CredentialValidator {
    /// Check that `token` is a decodable credential, without judging expiry
    pub fn is_structurally_valid(token: &str) -> bool {
        Self::decode_payload(token).is_some()
    }

    /// Decode the informational claims of a structurally valid token
    pub fn decode_claims(token: &str) -> Option<TokenClaims> {
        let payload = Self::decode_payload(token)?;
        serde_json::from_value(Value::Object(payload)).ok()
    }

    fn decode_payload(token: &str) -> Option<Map<String, Value>> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let mut segments = token.split('.');
        let (header, payload, signature) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() || signature.is_empty() {
            return None;
        }
        Self::decode_segment(header)?;
        Self::decode_segment(payload)
    }

    fn decode_segment(segment: &str) -> Option<Map<String, Value>> {
        let bytes = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()?;
        match serde_json::from_slice(&bytes).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an unsigned-looking JWT with the given payload
    pub(crate) fn make_token(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.c2lnbmF0dXJl", header, body)
    }

    #[test]
    fn test_well_formed_token_is_valid() {
        let token = make_token(&serde_json::json!({"user_id": 7, "token_type": "access"}));
        assert!(CredentialValidator::is_structurally_valid(&token));
    }

    #[test]
    fn test_expired_token_is_still_structurally_valid() {
        let token = make_token(&serde_json::json!({"user_id": 7, "exp": 946684800}));
        assert!(CredentialValidator::is_structurally_valid(&token));
        let claims = CredentialValidator::decode_claims(&token).expect("claims");
        assert_eq!(claims.expires_at().map(|t| t.timestamp()), Some(946684800));
    }

    #[test]
    fn test_malformed_tokens_are_rejected() {
        assert!(!CredentialValidator::is_structurally_valid(""));
        assert!(!CredentialValidator::is_structurally_valid("   "));
        assert!(!CredentialValidator::is_structurally_valid("not-a-token"));
        assert!(!CredentialValidator::is_structurally_valid("a.b"));
        assert!(!CredentialValidator::is_structurally_valid("!!!.@@@.###"));

        // Payload decodes but is not a JSON object
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let array = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        assert!(!CredentialValidator::is_structurally_valid(&format!("{}.{}.sig", header, array)));

        // Too many segments
        let token = make_token(&serde_json::json!({"user_id": 1}));
        assert!(!CredentialValidator::is_structurally_valid(&format!("{}.extra", token)));
    }

    #[test]
    fn test_decode_claims_reads_identity_fields() {
        let token = make_token(&serde_json::json!({
            "id": 42,
            "username": "alice",
            "email": "alice@example.com"
        }));
        let claims = CredentialValidator::decode_claims(&token).expect("claims");
        assert_eq!(claims.user_id, Some(42));
        assert_eq!(claims.username.as_deref(), Some("alice"));
        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert_eq!(claims.exp, None);
    }
}
