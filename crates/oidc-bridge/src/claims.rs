//! Verified identity claims.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::UserInfoError;

/// The claims of an ID token that passed every verification check.
///
/// Values of this type only come out of
/// [`Authenticator::verify_id_token`](crate::Authenticator::verify_id_token),
/// so holding one means the token's signature, issuer, audience and
/// lifetime were all accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedClaims {
    pub(crate) subject: String,
    pub(crate) issuer: String,
    pub(crate) audience: Vec<String>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) issued_at: Option<DateTime<Utc>>,
    pub(crate) authorized_party: Option<String>,
    pub(crate) nonce: Option<String>,
    /// Every claim in the token, standard ones included.
    pub(crate) claims: Map<String, Value>,
}

impl VerifiedClaims {
    /// The `sub` claim: the provider's stable identifier for the user.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The `aud` claim, normalized to a list.
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// The `azp` claim, when present.
    pub fn authorized_party(&self) -> Option<&str> {
        self.authorized_party.as_deref()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// A single claim by name.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// All claims as a JSON object.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Deserialize the whole claim set into an application type.
    pub fn claims_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.claims.clone()))
    }

    pub fn email(&self) -> Option<&str> {
        self.string_claim("email")
    }

    /// `email_verified`, treating a missing claim as unverified.
    pub fn email_verified(&self) -> bool {
        self.claim("email_verified")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn name(&self) -> Option<&str> {
        self.string_claim("name")
    }

    pub fn picture(&self) -> Option<&str> {
        self.string_claim("picture")
    }

    fn string_claim(&self, name: &str) -> Option<&str> {
        self.claim(name).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// UserInfo
// ---------------------------------------------------------------------------

/// Claims returned by the provider's userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInfo {
    subject: String,
    claims: Map<String, Value>,
}

impl UserInfo {
    /// Parse a userinfo response body; `sub` is required.
    pub(crate) fn from_body(body: &str) -> Result<Self, UserInfoError> {
        let claims: Map<String, Value> =
            serde_json::from_str(body).map_err(|e| UserInfoError::MalformedResponse {
                reason: e.to_string(),
            })?;

        let subject = match claims.get("sub").and_then(Value::as_str) {
            Some(sub) if !sub.is_empty() => sub.to_string(),
            _ => {
                return Err(UserInfoError::MalformedResponse {
                    reason: "missing sub".to_string(),
                });
            }
        };

        Ok(Self { subject, claims })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn email(&self) -> Option<&str> {
        self.claim("email").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.claim("name").and_then(Value::as_str)
    }

    /// Check that these claims describe the same user as a verified ID
    /// token. Userinfo responses must not be merged into an identity
    /// without this check (OIDC Core §5.3.2).
    pub fn ensure_subject(&self, verified: &VerifiedClaims) -> Result<(), UserInfoError> {
        if self.subject == verified.subject {
            Ok(())
        } else {
            Err(UserInfoError::SubjectMismatch)
        }
    }
}
