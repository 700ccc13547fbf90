//! Provider signing keys (JSON Web Key Set) with lazy fetching, caching and
//! bounded refetch on key rotation.
//!
//! Keys are cached in a [`moka`] cache with a TTL, by `kid` when the JWK has
//! one and by position otherwise. Fetches go through two more caches whose
//! entries live for the refetch cooldown:
//!
//! - a per-`kid` cache coalesces concurrent misses for one `kid` into a
//!   single lookup and answers repeated misses inside the cooldown from the
//!   recorded outcome;
//! - a gate with one entry for the initial load and one for refreshes caps
//!   the provider at two key set requests per cooldown, however many
//!   distinct `kid` values arrive.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::KeyCacheSettings;
use crate::error::describe_transport;

/// Failure to produce a key for a `kid`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeySetError {
    /// The provider's key set has no usable key with this id.
    #[error("unknown key id {0}")]
    UnknownKey(String),

    /// The key set could not be fetched.
    #[error("key set fetch failed: {0}")]
    Fetch(String),

    /// The key set document is not valid JSON.
    #[error("malformed key set: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Signing key
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Rsa,
    P256,
    P384,
    Okp,
    Other,
}

impl KeyFamily {
    fn of(jwk: &Jwk) -> Self {
        match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => Self::Rsa,
            AlgorithmParameters::EllipticCurve(params) => match params.curve {
                EllipticCurve::P256 => Self::P256,
                EllipticCurve::P384 => Self::P384,
                _ => Self::Other,
            },
            AlgorithmParameters::OctetKeyPair(_) => Self::Okp,
            _ => Self::Other,
        }
    }

    fn accepts(self, alg: Algorithm) -> bool {
        use Algorithm::*;
        matches!(
            (self, alg),
            (Self::Rsa, RS256 | RS384 | RS512 | PS256 | PS384 | PS512)
                | (Self::P256, ES256)
                | (Self::P384, ES384)
                | (Self::Okp, EdDSA)
        )
    }
}

/// A public verification key from the provider's key set.
#[derive(Clone)]
pub struct SigningKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    family: KeyFamily,
    key: DecodingKey,
}

impl SigningKey {
    /// The key id, absent when the provider publishes the key without one.
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// The algorithm the key is restricted to, when the JWK declares one.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Whether a token signed with `alg` could have been made by this key.
    pub fn accepts(&self, alg: Algorithm) -> bool {
        match self.algorithm {
            Some(declared) => declared == alg,
            None => self.family.accepts(alg),
        }
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Build a key from one JWK object. Returns `None` (and logs why) for
    /// entries that cannot verify ID tokens: `use` other than `sig`,
    /// symmetric keys, unknown algorithms, or unparseable material.
    fn from_jwk_value(value: Value) -> Option<Self> {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(String::from);

        let kid = field("kid");
        let label = kid.clone().unwrap_or_else(|| "<none>".to_string());

        if let Some(key_use) = field("use") {
            if key_use != "sig" {
                debug!(kid = %label, key_use = %key_use, "skipping non-signing JWK");
                return None;
            }
        }

        if field("kty").as_deref() == Some("oct") {
            debug!(kid = %label, "skipping symmetric JWK");
            return None;
        }

        let algorithm = match field("alg") {
            Some(alg) => match Algorithm::from_str(&alg) {
                Ok(alg) => Some(alg),
                Err(_) => {
                    debug!(kid = %label, alg = %alg, "skipping JWK with unsupported alg");
                    return None;
                }
            },
            None => None,
        };

        let parsed = serde_json::from_value::<Jwk>(value)
            .map_err(|e| e.to_string())
            .and_then(|jwk| {
                DecodingKey::from_jwk(&jwk)
                    .map(|key| (KeyFamily::of(&jwk), key))
                    .map_err(|e| e.to_string())
            });

        match parsed {
            Ok((family, key)) => Some(Self {
                kid,
                algorithm,
                family,
                key,
            }),
            Err(reason) => {
                debug!(kid = %label, reason = %reason, "skipping unparseable JWK");
                None
            }
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct KeySetDocument {
    keys: Vec<Value>,
}

/// Parse a JWKS document into the keys usable for signature verification.
pub(crate) fn parse_key_set(body: &str) -> Result<Vec<SigningKey>, KeySetError> {
    let doc: KeySetDocument =
        serde_json::from_str(body).map_err(|e| KeySetError::Malformed(e.to_string()))?;

    Ok(doc
        .keys
        .into_iter()
        .filter_map(SigningKey::from_jwk_value)
        .collect())
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Cache slot of a key: its `kid`, or its position among the kid-less keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeySlot {
    Named(String),
    Unnamed(usize),
}

/// Which global fetch window a key set request counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FetchWindow {
    /// Nothing usable is cached yet.
    Load,
    /// A populated set lacks the requested key.
    Refresh,
}

/// Fetches and caches the provider's signing keys.
///
/// Shared by every verification; the caches are internally synchronized.
pub struct KeySetResolver {
    client: reqwest::Client,
    jwks_uri: Url,
    keys: Cache<KeySlot, Arc<SigningKey>>,
    lookups: Cache<Option<String>, Result<usize, KeySetError>>,
    windows: Cache<FetchWindow, Result<usize, KeySetError>>,
    fetches: AtomicU64,
}

impl KeySetResolver {
    /// Create an empty resolver; nothing is fetched until the first lookup.
    pub fn new(client: reqwest::Client, jwks_uri: Url, settings: &KeyCacheSettings) -> Self {
        let cooldown = Duration::from_secs(settings.refetch_cooldown_secs);

        let keys = Cache::builder()
            .max_capacity(settings.max_keys)
            .time_to_live(Duration::from_secs(settings.ttl_secs))
            .build();

        let lookups = Cache::builder()
            .max_capacity(settings.max_keys)
            .time_to_live(cooldown)
            .build();

        let windows = Cache::builder().time_to_live(cooldown).build();

        Self {
            client,
            jwks_uri,
            keys,
            lookups,
            windows,
            fetches: AtomicU64::new(0),
        }
    }

    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Number of key set requests sent to the provider so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Return the key published under `kid`, fetching the key set on a
    /// cache miss.
    ///
    /// # Errors
    ///
    /// [`KeySetError::UnknownKey`] when the key set has no such key after a
    /// fetch, or when the fetch was skipped because the refetch cooldown is
    /// still running; fetch and parse failures otherwise.
    pub async fn key(&self, kid: &str) -> Result<Arc<SigningKey>, KeySetError> {
        let slot = KeySlot::Named(kid.to_string());
        if let Some(key) = self.keys.get(&slot).await {
            return Ok(key);
        }

        let loaded = self
            .lookups
            .get_with(Some(kid.to_string()), self.fetch_windowed(kid))
            .await?;

        match self.keys.get(&slot).await {
            Some(key) => Ok(key),
            None => {
                warn!(kid = %kid, keys = loaded, "key id not present in provider key set");
                Err(KeySetError::UnknownKey(kid.to_string()))
            }
        }
    }

    /// Keys that may have signed a token whose header carries `kid` and
    /// `alg`.
    ///
    /// With a `kid`, that is the key published under it or, failing that,
    /// the kid-less keys compatible with `alg`. Without one, every cached
    /// key compatible with `alg`. An empty result means nothing to try.
    ///
    /// # Errors
    ///
    /// As for [`KeySetResolver::key`].
    pub async fn candidates(
        &self,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<Vec<Arc<SigningKey>>, KeySetError> {
        if let Some(kid) = kid {
            return match self.key(kid).await {
                Ok(key) => Ok(vec![key]),
                Err(KeySetError::UnknownKey(kid)) => {
                    let unnamed = self.cached(|key| key.kid.is_none() && key.accepts(alg));
                    if unnamed.is_empty() {
                        Err(KeySetError::UnknownKey(kid))
                    } else {
                        debug!(kid = %kid, candidates = unnamed.len(), "trying kid-less keys");
                        Ok(unnamed)
                    }
                }
                Err(err) => Err(err),
            };
        }

        let found = self.cached(|key| key.accepts(alg));
        if !found.is_empty() {
            return Ok(found);
        }

        self.lookups
            .get_with(None, self.fetch_windowed("<none>"))
            .await?;
        Ok(self.cached(|key| key.accepts(alg)))
    }

    fn cached(&self, keep: impl Fn(&SigningKey) -> bool) -> Vec<Arc<SigningKey>> {
        self.keys
            .iter()
            .map(|(_, key)| key)
            .filter(|key| keep(key))
            .collect()
    }

    /// Fetch unless the window this request falls into already fetched
    /// within the cooldown, in which case its recorded outcome is reused.
    async fn fetch_windowed(&self, kid: &str) -> Result<usize, KeySetError> {
        let window = if self.keys.iter().next().is_none() {
            FetchWindow::Load
        } else {
            FetchWindow::Refresh
        };

        let mut fetched = false;
        let outcome = self
            .windows
            .get_with(window, async {
                fetched = true;
                self.refetch(kid).await
            })
            .await;

        if !fetched {
            debug!(kid = %kid, window = ?window, "key set fetched recently; not refetching");
        }
        outcome
    }

    /// Fetch the key set and replace the cached keys with its contents.
    async fn refetch(&self, kid: &str) -> Result<usize, KeySetError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(kid = %kid, jwks_uri = %self.jwks_uri, "fetching provider key set");

        let response = self
            .client
            .get(self.jwks_uri.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| KeySetError::Fetch(describe_transport(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeySetError::Fetch(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| KeySetError::Fetch(describe_transport(&e)))?;

        let keys = parse_key_set(&body)?;
        let count = keys.len();
        self.replace_keys(keys).await;

        info!(keys = count, jwks_uri = %self.jwks_uri, "loaded provider key set");
        Ok(count)
    }

    /// Insert `keys` and drop cached keys the provider no longer publishes.
    async fn replace_keys(&self, keys: Vec<SigningKey>) {
        let mut unnamed = 0;
        let slotted: Vec<(KeySlot, SigningKey)> = keys
            .into_iter()
            .map(|key| {
                let slot = match &key.kid {
                    Some(kid) => KeySlot::Named(kid.clone()),
                    None => {
                        unnamed += 1;
                        KeySlot::Unnamed(unnamed - 1)
                    }
                };
                (slot, key)
            })
            .collect();

        let stale: Vec<Arc<KeySlot>> = self
            .keys
            .iter()
            .map(|(slot, _)| slot)
            .filter(|slot| !slotted.iter().any(|(s, _)| s == slot.as_ref()))
            .collect();

        for slot in stale {
            debug!(slot = ?slot, "dropping key removed from provider key set");
            self.keys.invalidate(slot.as_ref()).await;
        }

        for (slot, key) in slotted {
            self.keys.insert(slot, Arc::new(key)).await;
        }
    }

    /// Seed the cache from a JWKS document without a network call.
    #[cfg(test)]
    pub(crate) async fn preload(&self, jwks: &Value) {
        let keys = parse_key_set(&jwks.to_string()).expect("valid test key set");
        self.replace_keys(keys).await;
    }
}

impl fmt::Debug for KeySetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySetResolver")
            .field("jwks_uri", &self.jwks_uri.as_str())
            .field("cached_keys", &self.keys.entry_count())
            .field("fetches", &self.fetch_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
