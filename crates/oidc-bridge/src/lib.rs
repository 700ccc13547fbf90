//! OpenID Connect bridge between a web application and an external identity
//! provider (Auth0 or any compliant OIDC issuer).
//!
//! The bridge covers the relying-party side of the Authorization Code flow:
//!
//! - **Discovery** of the provider's endpoints from its issuer URL
//! - **Code exchange** at the token endpoint (with optional PKCE, RFC 7636)
//! - **ID token verification**: signature against the provider's published
//!   keys, then issuer, audience, lifetime and nonce
//! - **Refresh** and **userinfo** calls for longer-lived sessions
//!
//! Session storage, login pages and logout are left to the embedding
//! application.
//!
//! # Architecture
//!
//! ```text
//! Authenticator
//! ├── ProviderMetadata  (discovered once at startup)
//! ├── AppCredentials    (validated client id, secret, redirect URL)
//! ├── KeySetResolver    (cached JWKS, single-flight refetch on rotation)
//! └── reqwest::Client   (shared, with request timeout)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use oidc_bridge::{AuthConfig, Authenticator, LoginChallenge, DEFAULT_ENV_PREFIX};
//!
//! # async fn example() -> oidc_bridge::Result<()> {
//! let auth = Authenticator::new(AuthConfig::from_env(DEFAULT_ENV_PREFIX)).await?;
//!
//! // Login: remember `challenge` in the pre-login session, then redirect.
//! let challenge = LoginChallenge::generate()?;
//! let redirect_to = auth.authorization_url(&challenge);
//! # let _ = redirect_to;
//!
//! // Callback: after checking `state`, exchange the code and verify.
//! # let code = "from-query-string";
//! let tokens = auth
//!     .exchange_with_verifier(code, &challenge.pkce_verifier)
//!     .await?;
//! let claims = auth
//!     .verify_id_token(&tokens, Some(&challenge.nonce))
//!     .await?;
//! println!("signed in as {}", claims.subject());
//! # Ok(())
//! # }
//! ```

pub mod authenticator;
pub mod claims;
pub mod config;
pub mod discovery;
pub mod error;
pub mod jwks;
pub mod pkce;
pub mod secret;
pub mod token;
mod verify;

pub use authenticator::{Authenticator, ClientAuthMethod};
pub use claims::{UserInfo, VerifiedClaims};
pub use config::{
    AppCredentials, AuthConfig, DEFAULT_ENV_PREFIX, HttpSettings, KeyCacheSettings,
    VerificationSettings,
};
pub use discovery::{ProviderMetadata, ProviderResolver};
pub use error::{
    ConfigError, ConfigField, DiscoveryError, Error, ExchangeError, Result, SignatureFailure,
    UserInfoError, VerificationError,
};
pub use jwks::{KeySetError, KeySetResolver, SigningKey};
pub use pkce::LoginChallenge;
pub use secret::ClientSecret;
pub use token::TokenSet;
