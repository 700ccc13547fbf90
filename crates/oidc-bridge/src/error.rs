//! Error types for the OIDC bridge.
//!
//! Each failure domain has its own enum so callers can tell a misconfigured
//! deployment from an unreachable provider, a rejected authorization code, or
//! a forged token without inspecting message strings. [`Error`] wraps all of
//! them for callers that only want a single `?`-compatible type.
//!
//! No variant ever carries the client secret, an authorization code, or raw
//! token material.

use std::fmt;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The required configuration values, in validation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    /// Issuer host, e.g. `tenant.eu.auth0.com`.
    Domain,
    /// OAuth client identifier.
    ClientId,
    /// OAuth client secret.
    ClientSecret,
    /// Redirect URL registered with the provider.
    CallbackUrl,
}

impl ConfigField {
    /// Configuration key name as it appears in files and environment variables.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::ClientId => "client_id",
            Self::ClientSecret => "client_secret",
            Self::CallbackUrl => "callback_url",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup configuration is missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required value is absent or blank.
    #[error("missing required configuration value: {0}")]
    MissingField(ConfigField),

    /// A required value is present but unusable.
    #[error("invalid configuration value {field}: {reason}")]
    InvalidField {
        /// The offending field.
        field: ConfigField,
        /// What is wrong with it.
        reason: String,
    },

    /// A configuration source could not be read or parsed.
    #[error("failed to load configuration: {reason}")]
    Load {
        /// Details about the read or parse failure.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// The provider's discovery document could not be obtained or trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// The issuer is not a valid absolute URL.
    #[error("invalid issuer url {issuer}: {reason}")]
    InvalidIssuer { issuer: String, reason: String },

    /// The issuer or a discovered endpoint uses plain HTTP.
    #[error("refusing non-https url: {url}")]
    InsecureUrl { url: String },

    /// The discovery document could not be fetched.
    #[error("discovery document unreachable: {reason}")]
    Unreachable { reason: String },

    /// The provider answered with a non-success status.
    #[error("discovery request failed with HTTP {status}")]
    HttpStatus { status: u16 },

    /// The body is not a JSON discovery document.
    #[error("malformed discovery document: {reason}")]
    Malformed { reason: String },

    /// A required field is absent from the document.
    #[error("discovery document missing required field {field}")]
    MissingField { field: &'static str },

    /// A published endpoint is not a valid URL.
    #[error("invalid {field} in discovery document: {reason}")]
    InvalidEndpoint { field: &'static str, reason: String },

    /// The document declares a different issuer than the one requested.
    #[error("issuer mismatch: requested {expected}, document declares {actual}")]
    IssuerMismatch { expected: String, actual: String },
}

// ---------------------------------------------------------------------------
// Code exchange
// ---------------------------------------------------------------------------

/// The token endpoint did not produce a usable token set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// The token response has no `id_token`.
    #[error("token response contains no id_token")]
    MissingIdToken,

    /// The request never completed (connect failure, timeout, reset).
    #[error("token request failed: {reason}")]
    NetworkFailure { reason: String },

    /// The provider answered with an OAuth error or non-success status.
    #[error("provider rejected token request (HTTP {status}): {error}")]
    ProviderRejected {
        /// HTTP status code.
        status: u16,
        /// OAuth `error` code, or a short status description.
        error: String,
        /// OAuth `error_description`, when provided.
        description: Option<String>,
    },

    /// A success response whose body is not a valid token response.
    #[error("malformed token response: {reason}")]
    MalformedResponse { reason: String },
}

// ---------------------------------------------------------------------------
// ID token verification
// ---------------------------------------------------------------------------

/// Why a token's signature could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureFailure {
    /// The signature does not verify against the selected key.
    Invalid,
    /// The JOSE header could not be decoded (includes `alg: none`).
    MalformedHeader(String),
    /// The header algorithm is not accepted for ID tokens.
    UnsupportedAlgorithm(String),
    /// The key's declared algorithm or type differs from the header.
    AlgorithmMismatch,
    /// The header carries no `kid` and no published key fits its algorithm.
    NoMatchingKey,
    /// No key with this id exists in the provider's key set.
    UnknownKey(String),
}

impl fmt::Display for SignatureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("signature does not verify"),
            Self::MalformedHeader(reason) => write!(f, "malformed header: {reason}"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm {alg}"),
            Self::AlgorithmMismatch => f.write_str("key algorithm does not match header"),
            Self::NoMatchingKey => f.write_str("no published key matches the token"),
            Self::UnknownKey(kid) => write!(f, "unknown key id {kid}"),
        }
    }
}

/// The ID token failed verification. Every variant means "reject".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// The token set carries no `id_token`.
    #[error("no id_token field in token set")]
    NoIdToken,

    /// The signature could not be verified.
    #[error("bad signature: {0}")]
    BadSignature(SignatureFailure),

    /// `iss` differs from the discovered issuer.
    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    /// `aud` does not contain the client id, or `azp` names another party.
    #[error("audience does not include client {client_id}")]
    AudienceMismatch { client_id: String },

    /// `exp` is in the past beyond the allowed clock skew.
    #[error("id token expired")]
    Expired,

    /// `iat` or `nbf` is in the future beyond the allowed clock skew.
    #[error("id token not yet valid")]
    NotYetValid,

    /// A nonce was expected and the token's `nonce` is absent or different.
    #[error("nonce mismatch")]
    NonceMismatch,

    /// Required claims are absent or have the wrong shape.
    #[error("malformed claims: {reason}")]
    MalformedClaims { reason: String },

    /// The provider's signing keys could not be fetched.
    #[error("signing keys unavailable: {reason}")]
    KeySetUnavailable { reason: String },
}

// ---------------------------------------------------------------------------
// UserInfo
// ---------------------------------------------------------------------------

/// The userinfo endpoint call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserInfoError {
    /// The provider publishes no userinfo endpoint.
    #[error("provider has no userinfo endpoint")]
    NotSupported,

    #[error("userinfo request failed: {reason}")]
    NetworkFailure { reason: String },

    #[error("userinfo request rejected with HTTP {status}")]
    ProviderRejected { status: u16 },

    #[error("malformed userinfo response: {reason}")]
    MalformedResponse { reason: String },

    /// The userinfo `sub` differs from the verified ID token subject.
    #[error("userinfo subject does not match id token subject")]
    SubjectMismatch,
}

// ---------------------------------------------------------------------------
// Crate-level error
// ---------------------------------------------------------------------------

/// Unified error type for the OIDC bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Discovery failed while constructing an authenticator.
    #[error("failed to discover OIDC provider at {issuer}: {source}")]
    Discovery {
        /// The issuer that was queried.
        issuer: String,
        #[source]
        source: DiscoveryError,
    },

    /// The HTTP client could not be built from the configured settings.
    #[error("failed to build HTTP client: {reason}")]
    HttpClient { reason: String },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    UserInfo(#[from] UserInfoError),

    #[error(transparent)]
    Random(#[from] crate::pkce::RandomError),
}

/// Convenience alias used by callers that compose several bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Describe a reqwest transport error without echoing request bodies.
pub(crate) fn describe_transport(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
