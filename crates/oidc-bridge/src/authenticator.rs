//! The OIDC authenticator: one per process, shared by every login request.
//!
//! Construction validates configuration, discovers the provider and prepares
//! the key set resolver. Afterwards every method is `&self` and safe to call
//! concurrently; the only mutable state is the key cache inside
//! [`KeySetResolver`], which synchronizes itself.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info, warn};
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::claims::{UserInfo, VerifiedClaims};
use crate::config::{AppCredentials, AuthConfig};
use crate::discovery::{ProviderMetadata, ProviderResolver};
use crate::error::{
    Error, ExchangeError, Result, UserInfoError, VerificationError, describe_transport,
};
use crate::jwks::KeySetResolver;
use crate::pkce::LoginChallenge;
use crate::token::{TokenSet, parse_token_response};
use crate::verify::{IdTokenVerifier, accepted_algorithms};

/// How the client secret is presented to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// HTTP Basic with the form-encoded id and secret (RFC 6749 §2.3.1).
    SecretBasic,
    /// `client_id` and `client_secret` in the form body.
    SecretPost,
}

impl ClientAuthMethod {
    /// Pick the method from the provider's advertised list.
    ///
    /// Basic is the OAuth default; post is used only when the provider
    /// advertises it and does not advertise basic.
    fn select(advertised: &[String]) -> Self {
        let has = |m: &str| advertised.iter().any(|a| a == m);
        if !advertised.is_empty() && !has("client_secret_basic") && has("client_secret_post") {
            Self::SecretPost
        } else {
            Self::SecretBasic
        }
    }
}

/// OIDC relying party bound to one provider and one client registration.
#[derive(Debug)]
pub struct Authenticator {
    provider: ProviderMetadata,
    credentials: AppCredentials,
    keys: KeySetResolver,
    verifier: IdTokenVerifier,
    auth_method: ClientAuthMethod,
    client: reqwest::Client,
}

impl Authenticator {
    /// Validate `config`, discover the provider, and build an authenticator.
    ///
    /// Configuration is checked before any network I/O: a missing value
    /// fails with [`ConfigError::MissingField`](crate::ConfigError::MissingField)
    /// naming it. Discovery performs exactly one request and no retries.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for invalid configuration, [`Error::HttpClient`]
    /// when the HTTP client cannot be built from the settings,
    /// [`Error::Discovery`] when the provider cannot be discovered or
    /// declares another issuer.
    pub async fn new(config: AuthConfig) -> Result<Self> {
        let credentials = config.validate()?;
        let issuer = config.issuer_url();

        let client = reqwest::Client::builder()
            .timeout(config.http.request_timeout())
            .user_agent(config.http.user_agent.as_str())
            .build()
            .map_err(|e| Error::HttpClient {
                reason: e.to_string(),
            })?;

        let resolver = ProviderResolver::new(
            client.clone(),
            config.http.allow_insecure_http,
            config.key_cache.clone(),
        );

        let (provider, keys) =
            resolver
                .discover(&issuer)
                .await
                .map_err(|source| Error::Discovery {
                    issuer: issuer.clone(),
                    source,
                })?;

        Ok(Self::from_parts(
            provider,
            keys,
            credentials,
            config.verification.clock_skew_secs,
            client,
        ))
    }

    /// Assemble an authenticator from already-discovered metadata.
    pub fn from_parts(
        provider: ProviderMetadata,
        keys: KeySetResolver,
        credentials: AppCredentials,
        clock_skew_secs: u64,
        client: reqwest::Client,
    ) -> Self {
        let verifier = IdTokenVerifier::new(
            provider.issuer(),
            credentials.client_id(),
            accepted_algorithms(provider.id_token_signing_alg_values_supported()),
            clock_skew_secs,
        );
        let auth_method = ClientAuthMethod::select(provider.token_endpoint_auth_methods_supported());

        info!(
            issuer = %provider.issuer(),
            client_id = %credentials.client_id(),
            auth_method = ?auth_method,
            "authenticator ready"
        );

        Self {
            provider,
            credentials,
            keys,
            verifier,
            auth_method,
            client,
        }
    }

    pub fn provider(&self) -> &ProviderMetadata {
        &self.provider
    }

    pub fn credentials(&self) -> &AppCredentials {
        &self.credentials
    }

    pub fn key_set(&self) -> &KeySetResolver {
        &self.keys
    }

    pub fn client_auth_method(&self) -> ClientAuthMethod {
        self.auth_method
    }

    // -----------------------------------------------------------------------
    // Authorization request
    // -----------------------------------------------------------------------

    /// The URL to redirect the user's browser to.
    ///
    /// Carries `state`, `nonce` and the S256 PKCE challenge from `challenge`;
    /// query parameters already present on the discovered endpoint are kept.
    pub fn authorization_url(&self, challenge: &LoginChallenge) -> Url {
        let mut url = self.provider.authorization_endpoint().clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", self.credentials.client_id());
            params.append_pair("redirect_uri", self.credentials.redirect_uri());
            params.append_pair("scope", &self.credentials.scopes().join(" "));
            params.append_pair("state", &challenge.state);
            params.append_pair("nonce", &challenge.nonce);
            params.append_pair("code_challenge", &challenge.pkce_challenge());
            params.append_pair("code_challenge_method", "S256");
        }
        url
    }

    // -----------------------------------------------------------------------
    // Token endpoint
    // -----------------------------------------------------------------------

    /// Exchange an authorization code for tokens.
    ///
    /// Sends one request and does not retry. The result always carries an
    /// ID token.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::MissingIdToken`] when the provider returns no
    /// `id_token`, otherwise the network, rejection or parse failure.
    pub async fn exchange(&self, code: &str) -> std::result::Result<TokenSet, ExchangeError> {
        self.exchange_code(code, None).await
    }

    /// Like [`Authenticator::exchange`], presenting the PKCE `code_verifier`
    /// whose challenge went into the authorization URL.
    pub async fn exchange_with_verifier(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> std::result::Result<TokenSet, ExchangeError> {
        self.exchange_code(code, Some(code_verifier)).await
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> std::result::Result<TokenSet, ExchangeError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.credentials.redirect_uri()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        debug!(
            token_endpoint = %self.provider.token_endpoint(),
            pkce = code_verifier.is_some(),
            "exchanging authorization code"
        );

        let tokens = self.token_request(&params).await?;
        if tokens.id_token().is_none() {
            warn!("token response carried no id_token");
            return Err(ExchangeError::MissingIdToken);
        }

        debug!("authorization code exchanged");
        Ok(tokens)
    }

    /// Use a refresh token to obtain fresh tokens.
    ///
    /// The response may omit `id_token`; that is not an error here.
    pub async fn refresh(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<TokenSet, ExchangeError> {
        let scope = self.credentials.scopes().join(" ");
        let params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        debug!(token_endpoint = %self.provider.token_endpoint(), "refreshing tokens");
        self.token_request(&params).await
    }

    /// POST a grant to the token endpoint with client authentication.
    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> std::result::Result<TokenSet, ExchangeError> {
        let client_id = self.credentials.client_id();
        let secret = self.credentials.client_secret().expose_secret();
        let mut form = params.to_vec();

        let mut request = self
            .client
            .post(self.provider.token_endpoint().clone())
            .header(reqwest::header::ACCEPT, "application/json");

        match self.auth_method {
            ClientAuthMethod::SecretBasic => {
                request = request.header(
                    reqwest::header::AUTHORIZATION,
                    basic_authorization(client_id, secret),
                );
            }
            ClientAuthMethod::SecretPost => {
                form.push(("client_id", client_id));
                form.push(("client_secret", secret));
            }
        }

        let response = request.form(&form).send().await.map_err(|e| {
            warn!(error = %describe_transport(&e), "token request failed");
            ExchangeError::NetworkFailure {
                reason: describe_transport(&e),
            }
        })?;

        let result = parse_token_response(response).await;
        if let Err(ExchangeError::ProviderRejected { status, error, .. }) = &result {
            warn!(status = %status, error = %error, "token endpoint rejected request");
        }
        result
    }

    // -----------------------------------------------------------------------
    // ID token verification
    // -----------------------------------------------------------------------

    /// Verify the ID token carried in `tokens`.
    ///
    /// `nonce` is the value generated for this login, when the login handler
    /// issued one; the token's `nonce` claim must then equal it.
    ///
    /// # Errors
    ///
    /// [`VerificationError::NoIdToken`] when `tokens` has no ID token,
    /// otherwise the first failed check.
    pub async fn verify_id_token(
        &self,
        tokens: &TokenSet,
        nonce: Option<&str>,
    ) -> std::result::Result<VerifiedClaims, VerificationError> {
        let raw = tokens.id_token().ok_or(VerificationError::NoIdToken)?;
        self.verify_raw_id_token(raw, nonce).await
    }

    /// Verify a compact-serialized ID token.
    pub async fn verify_raw_id_token(
        &self,
        id_token: &str,
        nonce: Option<&str>,
    ) -> std::result::Result<VerifiedClaims, VerificationError> {
        let claims = self.verifier.verify(id_token, &self.keys, nonce).await?;
        debug!(subject = %claims.subject(), "id token verified");
        Ok(claims)
    }

    // -----------------------------------------------------------------------
    // UserInfo
    // -----------------------------------------------------------------------

    /// Fetch claims from the provider's userinfo endpoint.
    ///
    /// Check the result with [`UserInfo::ensure_subject`] before trusting it
    /// for a verified identity.
    pub async fn user_info(
        &self,
        access_token: &str,
    ) -> std::result::Result<UserInfo, UserInfoError> {
        let endpoint = self
            .provider
            .userinfo_endpoint()
            .ok_or(UserInfoError::NotSupported)?;

        debug!(userinfo_endpoint = %endpoint, "fetching userinfo");

        let response = self
            .client
            .get(endpoint.clone())
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| UserInfoError::NetworkFailure {
                reason: describe_transport(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "userinfo request rejected");
            return Err(UserInfoError::ProviderRejected {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| UserInfoError::NetworkFailure {
                reason: describe_transport(&e),
            })?;

        UserInfo::from_body(&body)
    }
}

/// `Authorization: Basic` value with both parts form-urlencoded first.
fn basic_authorization(client_id: &str, secret: &str) -> String {
    let id: String = byte_serialize(client_id.as_bytes()).collect();
    let secret: String = byte_serialize(secret.as_bytes()).collect();
    format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
