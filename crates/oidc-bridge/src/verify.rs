//! ID token verification.
//!
//! Order of checks: header and algorithm, candidate keys by `kid`, signature
//! together with `exp`/`nbf` (via `jsonwebtoken`), then the OIDC claims that
//! need exact semantics (`iss`, `aud`/`azp`, `iat`, `nonce`).

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::claims::VerifiedClaims;
use crate::error::{SignatureFailure, VerificationError};
use crate::jwks::{KeySetError, KeySetResolver};

/// Asymmetric algorithms accepted for ID tokens.
const SUPPORTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Claims that must be present in every ID token.
const REQUIRED_CLAIMS: &[&str] = &["exp", "iss", "aud", "sub"];

/// Algorithms to accept, restricted to what the provider advertises.
///
/// An empty `advertised` list means the provider did not publish one.
pub(crate) fn accepted_algorithms(advertised: &[String]) -> Vec<Algorithm> {
    if advertised.is_empty() {
        return SUPPORTED_ALGORITHMS.to_vec();
    }

    let accepted: Vec<Algorithm> = SUPPORTED_ALGORITHMS
        .iter()
        .copied()
        .filter(|alg| advertised.iter().any(|a| a == algorithm_name(*alg)))
        .collect();

    if accepted.is_empty() {
        warn!(
            advertised = ?advertised,
            "provider advertises no supported ID token signing algorithm"
        );
    }
    accepted
}

fn algorithm_name(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::EdDSA => "EdDSA",
    }
}

// ---------------------------------------------------------------------------
// Claims wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(aud) => vec![aud],
            Self::Many(auds) => auds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    iss: String,
    sub: String,
    aud: Audience,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    azp: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Verifies ID tokens for one issuer and client.
#[derive(Debug, Clone)]
pub(crate) struct IdTokenVerifier {
    issuer: String,
    client_id: String,
    algorithms: Vec<Algorithm>,
    clock_skew_secs: u64,
}

impl IdTokenVerifier {
    pub(crate) fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        algorithms: Vec<Algorithm>,
        clock_skew_secs: u64,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            algorithms,
            clock_skew_secs,
        }
    }

    /// Verify a compact-serialized ID token.
    pub(crate) async fn verify(
        &self,
        token: &str,
        keys: &KeySetResolver,
        nonce: Option<&str>,
    ) -> Result<VerifiedClaims, VerificationError> {
        let result = self.verify_inner(token, keys, nonce).await;
        if let Err(err) = &result {
            debug!(error = %err, "id token rejected");
        }
        result
    }

    async fn verify_inner(
        &self,
        token: &str,
        keys: &KeySetResolver,
        nonce: Option<&str>,
    ) -> Result<VerifiedClaims, VerificationError> {
        let header = decode_header(token).map_err(|e| {
            VerificationError::BadSignature(SignatureFailure::MalformedHeader(e.to_string()))
        })?;

        if !self.algorithms.contains(&header.alg) {
            return Err(VerificationError::BadSignature(
                SignatureFailure::UnsupportedAlgorithm(algorithm_name(header.alg).to_string()),
            ));
        }

        let candidates = keys
            .candidates(header.kid.as_deref(), header.alg)
            .await
            .map_err(|e| match e {
                KeySetError::UnknownKey(kid) => {
                    VerificationError::BadSignature(SignatureFailure::UnknownKey(kid))
                }
                other => VerificationError::KeySetUnavailable {
                    reason: other.to_string(),
                },
            })?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.clock_skew_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(REQUIRED_CLAIMS);

        // Signature failures move on to the next candidate; anything else
        // means the signature verified and the verdict is final.
        let mut rejection = VerificationError::BadSignature(SignatureFailure::NoMatchingKey);
        for key in &candidates {
            if !key.accepts(header.alg) {
                rejection = VerificationError::BadSignature(SignatureFailure::AlgorithmMismatch);
                continue;
            }

            match decode::<Map<String, Value>>(token, key.decoding_key(), &validation) {
                Ok(data) => return self.check_claims(data.claims, nonce, Utc::now()),
                Err(err) => match map_jwt_error(err) {
                    bad @ VerificationError::BadSignature(_) => rejection = bad,
                    other => return Err(other),
                },
            }
        }

        Err(rejection)
    }

    /// Checks that need exact OIDC semantics rather than JWT defaults.
    fn check_claims(
        &self,
        raw: Map<String, Value>,
        nonce: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VerifiedClaims, VerificationError> {
        let claims: IdTokenClaims = serde_json::from_value(Value::Object(raw.clone()))
            .map_err(|e| VerificationError::MalformedClaims {
                reason: e.to_string(),
            })?;

        if claims.iss != self.issuer {
            return Err(VerificationError::IssuerMismatch {
                expected: self.issuer.clone(),
                actual: claims.iss,
            });
        }

        let audience = claims.aud.into_vec();
        let audience_ok = audience.iter().any(|aud| *aud == self.client_id)
            && claims
                .azp
                .as_deref()
                .is_none_or(|azp| azp == self.client_id);
        if !audience_ok {
            return Err(VerificationError::AudienceMismatch {
                client_id: self.client_id.clone(),
            });
        }

        if claims.sub.is_empty() {
            return Err(VerificationError::MalformedClaims {
                reason: "empty sub".to_string(),
            });
        }

        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(VerificationError::MalformedClaims {
                reason: "exp out of range".to_string(),
            })?;

        let issued_at = match claims.iat {
            Some(iat) => Some(DateTime::from_timestamp(iat, 0).ok_or(
                VerificationError::MalformedClaims {
                    reason: "iat out of range".to_string(),
                },
            )?),
            None => None,
        };

        let skew = i64::try_from(self.clock_skew_secs).unwrap_or(i64::MAX);
        if let Some(iat) = claims.iat {
            if iat > now.timestamp().saturating_add(skew) {
                return Err(VerificationError::NotYetValid);
            }
        }

        if let Some(expected) = nonce {
            if claims.nonce.as_deref() != Some(expected) {
                return Err(VerificationError::NonceMismatch);
            }
        }

        Ok(VerifiedClaims {
            subject: claims.sub,
            issuer: claims.iss,
            audience,
            expires_at,
            issued_at,
            authorized_party: claims.azp,
            nonce: claims.nonce,
            claims: raw,
        })
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> VerificationError {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::Crypto(_) => VerificationError::BadSignature(SignatureFailure::Invalid),
        ErrorKind::InvalidAlgorithm => {
            VerificationError::BadSignature(SignatureFailure::AlgorithmMismatch)
        }
        ErrorKind::ExpiredSignature => VerificationError::Expired,
        ErrorKind::ImmatureSignature => VerificationError::NotYetValid,
        ErrorKind::MissingRequiredClaim(claim) => VerificationError::MalformedClaims {
            reason: format!("missing {claim}"),
        },
        _ => VerificationError::MalformedClaims {
            reason: err.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
