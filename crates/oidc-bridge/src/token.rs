//! Token endpoint responses.
//!
//! [`TokenSet`] is what the bridge hands back from a code exchange or a
//! refresh. It is transient: the caller decides whether to keep it (for
//! example in a server-side session); the bridge never stores it.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExchangeError;

/// Tokens returned by the provider's token endpoint.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    /// The access token used to call the provider's APIs.
    pub access_token: String,

    /// The token type (typically "Bearer").
    pub token_type: String,

    /// The signed ID token (JWT). Required after a code exchange; refresh
    /// responses may omit it.
    #[serde(default)]
    pub id_token: Option<String>,

    /// The refresh token, when `offline_access` was granted.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// When the access token expires, computed from `expires_in`.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// The scopes that were granted, when the provider reports them.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Any other fields of the token response.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl TokenSet {
    /// The raw ID token, if the response carried a non-empty one.
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref().filter(|t| !t.is_empty())
    }

    /// A non-standard response field.
    pub fn extra(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// Whether the access token is expired, treating it as expired `margin`
    /// early. Tokens without expiry information are assumed valid.
    pub fn is_expired(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at - margin,
            None => false,
        }
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(present: bool) -> &'static str {
            if present { "[REDACTED]" } else { "None" }
        }

        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("id_token", &redact(self.id_token.is_some()))
            .field("refresh_token", &redact(self.refresh_token.is_some()))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wire formats
// ---------------------------------------------------------------------------

/// Raw token response from the token endpoint (RFC 6749 §5.1, OIDC Core
/// §3.1.3.3).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    /// Number of seconds; some providers send it as a string.
    expires_in: Option<Value>,
    scope: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TokenResponse {
    fn into_token_set(self, now: DateTime<Utc>) -> TokenSet {
        let expires_at = self
            .expires_in
            .as_ref()
            .and_then(parse_expires_in)
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime));

        let scopes = self
            .scope
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        TokenSet {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            id_token: self.id_token.filter(|t| !t.is_empty()),
            refresh_token: self.refresh_token,
            expires_at,
            scopes,
            extra: self.extra,
        }
    }
}

fn parse_expires_in(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Raw error response from the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Parse the HTTP response from the token endpoint.
pub(crate) async fn parse_token_response(
    response: reqwest::Response,
) -> Result<TokenSet, ExchangeError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ExchangeError::NetworkFailure {
            reason: crate::error::describe_transport(&e),
        })?;

    if !status.is_success() {
        return Err(rejection(status, &body));
    }

    parse_token_body(&body, Utc::now())
}

fn rejection(status: reqwest::StatusCode, body: &str) -> ExchangeError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) => ExchangeError::ProviderRejected {
            status: status.as_u16(),
            error: err.error,
            description: err.error_description,
        },
        Err(_) => ExchangeError::ProviderRejected {
            status: status.as_u16(),
            error: status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
            description: None,
        },
    }
}

fn parse_token_body(body: &str, now: DateTime<Utc>) -> Result<TokenSet, ExchangeError> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| ExchangeError::MalformedResponse {
            reason: e.to_string(),
        })?;

    if response.access_token.is_empty() {
        return Err(ExchangeError::MalformedResponse {
            reason: "empty access_token".to_string(),
        });
    }

    Ok(response.into_token_set(now))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_parsing() {
        let now = Utc::now();
        let json = r#"{
            "access_token": "at_abc123",
            "id_token": "eyJ.header.sig",
            "refresh_token": "rt_def456",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "openid profile"
        }"#;

        let tokens = parse_token_body(json, now).unwrap();
        assert_eq!(tokens.access_token, "at_abc123");
        assert_eq!(tokens.id_token(), Some("eyJ.header.sig"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt_def456"));
        assert_eq!(tokens.expires_at, Some(now + Duration::seconds(3600)));
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.scopes, vec!["openid", "profile"]);
        assert!(tokens.extra.is_empty());
    }

    #[test]
    fn token_response_minimal() {
        let tokens = parse_token_body(r#"{ "access_token": "tok" }"#, Utc::now()).unwrap();
        assert_eq!(tokens.access_token, "tok");
        assert!(tokens.id_token().is_none());
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.expires_at.is_none());
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.scopes.is_empty());
    }

    #[test]
    fn expires_in_as_string() {
        let now = Utc::now();
        let tokens = parse_token_body(
            r#"{ "access_token": "tok", "expires_in": "120" }"#,
            now,
        )
        .unwrap();
        assert_eq!(tokens.expires_at, Some(now + Duration::seconds(120)));
    }

    #[test]
    fn unknown_fields_are_kept_as_extra() {
        let tokens = parse_token_body(
            r#"{ "access_token": "tok", "session_state": "abc", "not-before-policy": 0 }"#,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(tokens.extra("session_state"), Some(&Value::from("abc")));
        assert_eq!(tokens.extra("not-before-policy"), Some(&Value::from(0)));
    }

    #[test]
    fn empty_id_token_is_absent() {
        let tokens =
            parse_token_body(r#"{ "access_token": "tok", "id_token": "" }"#, Utc::now()).unwrap();
        assert!(tokens.id_token().is_none());
    }

    #[test]
    fn missing_access_token_is_malformed() {
        let err = parse_token_body(r#"{ "id_token": "x" }"#, Utc::now()).unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedResponse { .. }));

        let err = parse_token_body(r#"{ "access_token": "" }"#, Utc::now()).unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedResponse { .. }));

        let err = parse_token_body("<html>oops</html>", Utc::now()).unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedResponse { .. }));
    }

    #[test]
    fn oauth_error_body_becomes_rejection() {
        let err = rejection(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{ "error": "invalid_grant", "error_description": "The code has expired" }"#,
        );
        assert_eq!(
            err,
            ExchangeError::ProviderRejected {
                status: 400,
                error: "invalid_grant".to_string(),
                description: Some("The code has expired".to_string()),
            }
        );
    }

    #[test]
    fn non_json_error_body_uses_status_reason() {
        let err = rejection(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(
            err,
            ExchangeError::ProviderRejected {
                status: 502,
                error: "Bad Gateway".to_string(),
                description: None,
            }
        );
    }

    #[test]
    fn is_expired_respects_margin() {
        let mut tokens = parse_token_body(r#"{ "access_token": "tok" }"#, Utc::now()).unwrap();
        assert!(!tokens.is_expired(Duration::seconds(60)));

        tokens.expires_at = Some(Utc::now() + Duration::seconds(30));
        assert!(tokens.is_expired(Duration::seconds(60)));
        assert!(!tokens.is_expired(Duration::zero()));

        tokens.expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(tokens.is_expired(Duration::zero()));
    }

    #[test]
    fn debug_redacts_tokens() {
        let tokens = parse_token_body(
            r#"{ "access_token": "at_secret", "id_token": "id_secret", "refresh_token": "rt_secret" }"#,
            Utc::now(),
        )
        .unwrap();
        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("at_secret"));
        assert!(!rendered.contains("id_secret"));
        assert!(!rendered.contains("rt_secret"));
    }

    #[test]
    fn token_set_serialization_roundtrip() {
        let tokens = parse_token_body(
            r#"{ "access_token": "at", "id_token": "id", "expires_in": 60 }"#,
            Utc::now(),
        )
        .unwrap();
        let json = serde_json::to_string(&tokens).unwrap();
        let restored: TokenSet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, tokens);
    }
}
