//! PKCE (RFC 7636) and per-login random values.
//!
//! A login handler generates a [`LoginChallenge`], stores it alongside the
//! user's pre-login session, sends the user to
//! [`Authenticator::authorization_url`](crate::Authenticator::authorization_url),
//! and on callback checks `state`, exchanges the code with the PKCE verifier,
//! and verifies the ID token against the stored nonce.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

/// Number of random bytes behind every generated value (before encoding).
const RANDOM_BYTES: usize = 32;

/// The system CSPRNG failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to generate random value: CSPRNG error")]
pub struct RandomError;

/// Generate 32 random bytes, base64url encoded without padding.
pub fn random_token() -> Result<String, RandomError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; RANDOM_BYTES];
    rng.fill(&mut bytes).map_err(|_| RandomError)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Derive the PKCE code challenge from a code verifier using SHA-256.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// Random values bound to one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginChallenge {
    /// Opaque CSRF token echoed back on the callback.
    pub state: String,
    /// Value the provider embeds in the ID token's `nonce` claim.
    pub nonce: String,
    /// PKCE code verifier; only its challenge leaves the server.
    pub pkce_verifier: String,
}

impl LoginChallenge {
    /// Generate fresh `state`, `nonce` and PKCE verifier.
    pub fn generate() -> Result<Self, RandomError> {
        Ok(Self {
            state: random_token()?,
            nonce: random_token()?,
            pkce_verifier: random_token()?,
        })
    }

    /// The S256 challenge for [`LoginChallenge::pkce_verifier`].
    pub fn pkce_challenge(&self) -> String {
        pkce_challenge(&self.pkce_verifier)
    }
}
