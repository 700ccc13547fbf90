//! OIDC provider discovery via the `.well-known/openid-configuration`
//! document (OpenID Connect Discovery 1.0).
//!
//! Discovery runs once per process, at startup. The resulting
//! [`ProviderMetadata`] is immutable; only the signing keys inside the
//! [`KeySetResolver`] are refreshed afterwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::KeyCacheSettings;
use crate::error::{DiscoveryError, describe_transport};
use crate::jwks::KeySetResolver;

/// Path appended to the issuer to locate the discovery document.
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

// ---------------------------------------------------------------------------
// Provider metadata
// ---------------------------------------------------------------------------

/// Endpoints and capabilities published by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderMetadata {
    issuer: String,
    authorization_endpoint: Url,
    token_endpoint: Url,
    jwks_uri: Url,
    userinfo_endpoint: Option<Url>,
    end_session_endpoint: Option<Url>,
    scopes_supported: Vec<String>,
    claims_supported: Vec<String>,
    id_token_signing_alg_values_supported: Vec<String>,
    token_endpoint_auth_methods_supported: Vec<String>,
}

/// The discovery document as published. Every field is optional here so a
/// missing one can be reported by name.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: Option<String>,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    jwks_uri: Option<String>,
    userinfo_endpoint: Option<String>,
    end_session_endpoint: Option<String>,
    #[serde(default)]
    scopes_supported: Vec<String>,
    #[serde(default)]
    claims_supported: Vec<String>,
    #[serde(default)]
    id_token_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    token_endpoint_auth_methods_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Parse and validate a discovery document fetched for `expected_issuer`.
    ///
    /// The declared issuer must equal `expected_issuer` byte for byte, and
    /// every endpoint must be HTTPS unless `allow_insecure_http` is set.
    pub fn from_document(
        body: &str,
        expected_issuer: &str,
        allow_insecure_http: bool,
    ) -> Result<Self, DiscoveryError> {
        let doc: DiscoveryDocument =
            serde_json::from_str(body).map_err(|e| DiscoveryError::Malformed {
                reason: e.to_string(),
            })?;

        let issuer = doc
            .issuer
            .ok_or(DiscoveryError::MissingField { field: "issuer" })?;
        if issuer != expected_issuer {
            return Err(DiscoveryError::IssuerMismatch {
                expected: expected_issuer.to_string(),
                actual: issuer,
            });
        }

        let endpoint =
            |field: &'static str, value: Option<String>| -> Result<Url, DiscoveryError> {
                let value = value.ok_or(DiscoveryError::MissingField { field })?;
                parse_endpoint(field, &value, allow_insecure_http)
            };
        let optional =
            |field: &'static str, value: Option<String>| -> Result<Option<Url>, DiscoveryError> {
                value
                    .map(|v| parse_endpoint(field, &v, allow_insecure_http))
                    .transpose()
            };

        Ok(Self {
            issuer,
            authorization_endpoint: endpoint("authorization_endpoint", doc.authorization_endpoint)?,
            token_endpoint: endpoint("token_endpoint", doc.token_endpoint)?,
            jwks_uri: endpoint("jwks_uri", doc.jwks_uri)?,
            userinfo_endpoint: optional("userinfo_endpoint", doc.userinfo_endpoint)?,
            end_session_endpoint: optional("end_session_endpoint", doc.end_session_endpoint)?,
            scopes_supported: doc.scopes_supported,
            claims_supported: doc.claims_supported,
            id_token_signing_alg_values_supported: doc.id_token_signing_alg_values_supported,
            token_endpoint_auth_methods_supported: doc.token_endpoint_auth_methods_supported,
        })
    }

    /// The issuer identifier, exactly as published.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn authorization_endpoint(&self) -> &Url {
        &self.authorization_endpoint
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// Location of the provider's JSON Web Key Set.
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    pub fn userinfo_endpoint(&self) -> Option<&Url> {
        self.userinfo_endpoint.as_ref()
    }

    /// RP-initiated logout endpoint, when published.
    pub fn end_session_endpoint(&self) -> Option<&Url> {
        self.end_session_endpoint.as_ref()
    }

    pub fn scopes_supported(&self) -> &[String] {
        &self.scopes_supported
    }

    pub fn claims_supported(&self) -> &[String] {
        &self.claims_supported
    }

    /// Empty when the provider does not publish the list.
    pub fn id_token_signing_alg_values_supported(&self) -> &[String] {
        &self.id_token_signing_alg_values_supported
    }

    pub fn token_endpoint_auth_methods_supported(&self) -> &[String] {
        &self.token_endpoint_auth_methods_supported
    }
}

fn parse_endpoint(
    field: &'static str,
    value: &str,
    allow_insecure_http: bool,
) -> Result<Url, DiscoveryError> {
    let url = Url::parse(value).map_err(|e| DiscoveryError::InvalidEndpoint {
        field,
        reason: e.to_string(),
    })?;
    ensure_secure(&url, allow_insecure_http)?;
    Ok(url)
}

fn ensure_secure(url: &Url, allow_insecure_http: bool) -> Result<(), DiscoveryError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_insecure_http => Ok(()),
        _ => Err(DiscoveryError::InsecureUrl {
            url: url.to_string(),
        }),
    }
}

/// URL of the discovery document for `issuer`.
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{WELL_KNOWN_PATH}", issuer.trim_end_matches('/'))
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves an issuer into its metadata and a key set resolver.
#[derive(Debug, Clone)]
pub struct ProviderResolver {
    client: reqwest::Client,
    allow_insecure_http: bool,
    key_cache: KeyCacheSettings,
}

impl ProviderResolver {
    /// Create a resolver sharing `client` with the key set it produces.
    pub fn new(
        client: reqwest::Client,
        allow_insecure_http: bool,
        key_cache: KeyCacheSettings,
    ) -> Self {
        Self {
            client,
            allow_insecure_http,
            key_cache,
        }
    }

    /// Fetch the issuer's discovery document and build the metadata plus a
    /// lazily-populated key set resolver. Performs one network round trip
    /// and no retries.
    ///
    /// # Errors
    ///
    /// Any [`DiscoveryError`]; notably [`DiscoveryError::IssuerMismatch`]
    /// when the document claims a different issuer.
    pub async fn discover(
        &self,
        issuer: &str,
    ) -> Result<(ProviderMetadata, KeySetResolver), DiscoveryError> {
        let issuer_url = Url::parse(issuer).map_err(|e| DiscoveryError::InvalidIssuer {
            issuer: issuer.to_string(),
            reason: e.to_string(),
        })?;
        ensure_secure(&issuer_url, self.allow_insecure_http)?;

        let url = discovery_url(issuer);
        debug!(url = %url, "fetching discovery document");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| DiscoveryError::Unreachable {
                reason: describe_transport(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DiscoveryError::Unreachable {
                reason: describe_transport(&e),
            })?;

        let metadata = ProviderMetadata::from_document(&body, issuer, self.allow_insecure_http)?;
        let keys = KeySetResolver::new(
            self.client.clone(),
            metadata.jwks_uri().clone(),
            &self.key_cache,
        );

        info!(
            issuer = %metadata.issuer(),
            token_endpoint = %metadata.token_endpoint(),
            jwks_uri = %metadata.jwks_uri(),
            "discovered OIDC provider"
        );

        Ok((metadata, keys))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
