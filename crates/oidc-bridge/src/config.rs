//! Bridge configuration.
//!
//! [`AuthConfig`] is the explicit configuration handed to
//! [`Authenticator::new`](crate::Authenticator::new). The loaders in this
//! module (environment, `.env`, TOML/JSON files) are conveniences for the
//! application's startup code; the authenticator itself never reads the
//! process environment.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::error::{ConfigError, ConfigField};
use crate::secret::ClientSecret;

/// Scope every OIDC authentication request must carry.
pub const OPENID_SCOPE: &str = "openid";

/// Environment variable prefix used by the original deployment.
pub const DEFAULT_ENV_PREFIX: &str = "AUTH0_";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CLOCK_SKEW_SECS: u64 = 30;
const DEFAULT_KEY_TTL_SECS: u64 = 3600;
const DEFAULT_REFETCH_COOLDOWN_SECS: u64 = 10;
const DEFAULT_MAX_KEYS: u64 = 64;

// ---------------------------------------------------------------------------
// Settings sections
// ---------------------------------------------------------------------------

/// Outbound HTTP behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Per-request timeout for discovery, JWKS, token and userinfo calls.
    pub request_timeout_secs: u64,

    /// Permit `http://` issuers and endpoints. Local testing only.
    pub allow_insecure_http: bool,

    /// `User-Agent` header sent with every provider request.
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            allow_insecure_http: false,
            user_agent: concat!("oidc-bridge/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// ID token verification tolerances.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// Clock skew tolerated when checking `exp`, `iat` and `nbf`.
    pub clock_skew_secs: u64,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
        }
    }
}

/// Signing key cache policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeyCacheSettings {
    /// How long a fetched key stays cached before it is refetched.
    pub ttl_secs: u64,

    /// How long a key set fetch outcome is reused before a lookup for an
    /// unknown key id may fetch again.
    pub refetch_cooldown_secs: u64,

    /// Upper bound on cached keys and on tracked refetch windows.
    pub max_keys: u64,
}

impl Default for KeyCacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_KEY_TTL_SECS,
            refetch_cooldown_secs: DEFAULT_REFETCH_COOLDOWN_SECS,
            max_keys: DEFAULT_MAX_KEYS,
        }
    }
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

fn default_scopes() -> Vec<String> {
    vec!["profile".to_string()]
}

/// Everything needed to construct an [`Authenticator`](crate::Authenticator).
///
/// The four required values are plain strings so that a loader can pass
/// through whatever it found and let [`AuthConfig::validate`] name the
/// missing one.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Issuer host; the issuer URL is `https://{domain}/`.
    #[serde(default)]
    pub domain: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: ClientSecret,

    /// Redirect URL registered with the provider.
    #[serde(default)]
    pub callback_url: String,

    /// Scopes requested in addition to `openid`.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub verification: VerificationSettings,

    #[serde(default)]
    pub key_cache: KeyCacheSettings,
}

impl AuthConfig {
    /// Build a configuration from the four required values with default
    /// settings.
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<ClientSecret>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            callback_url: callback_url.into(),
            scopes: default_scopes(),
            http: HttpSettings::default(),
            verification: VerificationSettings::default(),
            key_cache: KeyCacheSettings::default(),
        }
    }

    /// Read `{prefix}DOMAIN`, `{prefix}CLIENT_ID`, `{prefix}CLIENT_SECRET`,
    /// `{prefix}CALLBACK_URL` and the optional space-separated
    /// `{prefix}SCOPES` from the process environment.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Like [`AuthConfig::from_env`], after loading a `.env` file from the
    /// working directory (or its parents) when one exists.
    pub fn from_dotenv(prefix: &str) -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "loaded environment file");
        }
        Self::from_env(prefix)
    }

    /// Build a configuration from an arbitrary key lookup. Absent keys become
    /// empty strings.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{prefix}{name}")).unwrap_or_default();

        let mut config = Self::new(
            get("DOMAIN"),
            get("CLIENT_ID"),
            get("CLIENT_SECRET"),
            get("CALLBACK_URL"),
        );

        let scopes = get("SCOPES");
        if !scopes.trim().is_empty() {
            config.scopes = scopes.split_whitespace().map(String::from).collect();
        }

        config
    }

    /// Load from a file: JSON when the extension is `.json`, TOML otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Load {
                reason: format!("failed to parse JSON config: {e}"),
            })?
        } else {
            Self::from_toml_str(&content)?
        };

        info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Load {
            reason: format!("failed to parse TOML config: {e}"),
        })
    }

    /// Check the required values without touching the network and produce
    /// the application credentials.
    pub fn validate(&self) -> Result<AppCredentials, ConfigError> {
        let domain = required(&self.domain, ConfigField::Domain)?;
        let client_id = required(&self.client_id, ConfigField::ClientId)?;
        if self.client_secret.is_blank() {
            return Err(ConfigError::MissingField(ConfigField::ClientSecret));
        }
        let callback_url = required(&self.callback_url, ConfigField::CallbackUrl)?;

        if domain.contains("://") || domain.contains('/') {
            return Err(ConfigError::InvalidField {
                field: ConfigField::Domain,
                reason: "expected a bare host name without scheme or path".to_string(),
            });
        }

        // Validity check only; the configured string is sent unchanged.
        Url::parse(callback_url).map_err(|e| ConfigError::InvalidField {
            field: ConfigField::CallbackUrl,
            reason: e.to_string(),
        })?;

        Ok(AppCredentials {
            client_id: client_id.to_string(),
            client_secret: self.client_secret.clone(),
            redirect_uri: callback_url.to_string(),
            scopes: build_scopes(&self.scopes),
        })
    }

    /// Issuer URL derived from the domain.
    pub fn issuer_url(&self) -> String {
        let scheme = if self.http.allow_insecure_http {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{}/", self.domain.trim())
    }
}

fn required(value: &str, field: ConfigField) -> Result<&str, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    Ok(value)
}

/// `openid` first, then the configured scopes without blanks or duplicates.
fn build_scopes(configured: &[String]) -> Vec<String> {
    let mut scopes = vec![OPENID_SCOPE.to_string()];
    for scope in configured {
        let scope = scope.trim();
        if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

// ---------------------------------------------------------------------------
// AppCredentials
// ---------------------------------------------------------------------------

/// Validated local application credentials. Immutable after construction.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    client_id: String,
    client_secret: ClientSecret,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl AppCredentials {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &ClientSecret {
        &self.client_secret
    }

    /// The redirect URI presented both in the authorization request and in
    /// the code exchange, exactly as configured.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Requested scopes, `openid` first.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
