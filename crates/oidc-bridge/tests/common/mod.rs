//! In-process mock OIDC provider for integration tests.
//!
//! Serves discovery, JWKS, token and userinfo endpoints on an OS-assigned
//! port of 127.0.0.1, signs ID tokens with ECDSA P-256 keys generated at
//! startup, and counts requests per endpoint.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use oidc_bridge::AuthConfig;

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const SUBJECT: &str = "auth0|test-user";
pub const VALID_CODE: &str = "valid-code";
pub const ACCESS_TOKEN: &str = "at-valid";
pub const REFRESH_TOKEN: &str = "rt-valid";

// ── keys ────────────────────────────────────────────────────────────────────

/// An ES256 signing key with its public JWK.
#[derive(Clone)]
pub struct TestKey {
    pub kid: Option<String>,
    pkcs8: Vec<u8>,
    pub jwk: Value,
}

impl TestKey {
    pub fn generate(kid: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("generate key")
            .as_ref()
            .to_vec();
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng)
            .expect("parse generated key");
        let point = pair.public_key().as_ref();
        let jwk = json!({
            "kty": "EC",
            "crv": "P-256",
            "use": "sig",
            "alg": "ES256",
            "kid": kid,
            "x": URL_SAFE_NO_PAD.encode(&point[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&point[33..65]),
        });
        Self {
            kid: Some(kid.to_string()),
            pkcs8,
            jwk,
        }
    }

    /// The same key published and used without a `kid`.
    pub fn without_kid(mut self) -> Self {
        self.jwk.as_object_mut().expect("jwk object").remove("kid");
        self.kid = None;
        self
    }

    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(self.kid.as_deref(), claims)
    }

    /// Sign with an explicit header `kid`, which need not match the JWK.
    pub fn sign_with_kid(&self, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_ec_der(&self.pkcs8)).expect("sign token")
    }
}

// ── provider state ──────────────────────────────────────────────────────────

pub struct ProviderState {
    pub issuer: String,
    pub base: String,

    /// Keys published at the JWKS endpoint.
    pub published: Mutex<Vec<TestKey>>,
    /// Key used for ID tokens minted by the token endpoint.
    pub signer: Mutex<TestKey>,

    pub discovery_hits: AtomicUsize,
    pub jwks_hits: AtomicUsize,
    pub token_hits: AtomicUsize,
    pub userinfo_hits: AtomicUsize,

    pub jwks_delay: Mutex<Duration>,
    pub discovery_status: Mutex<Option<StatusCode>>,
    pub discovery_issuer: Mutex<Option<String>>,
    pub auth_methods: Mutex<Vec<String>>,
    /// Redirect URI the client is registered with, compared byte for byte.
    pub registered_redirect: Mutex<String>,
    pub omit_id_token: AtomicBool,
    pub nonce: Mutex<Option<String>>,

    /// Form fields of the last token request.
    pub last_token_form: Mutex<HashMap<String, String>>,
    /// How the client authenticated on the last token request.
    pub last_client_auth: Mutex<Option<&'static str>>,
}

impl ProviderState {
    fn new(base: String) -> Self {
        let key = TestKey::generate("key-1");
        Self {
            issuer: format!("{base}/"),
            base,
            published: Mutex::new(vec![key.clone()]),
            signer: Mutex::new(key),
            discovery_hits: AtomicUsize::new(0),
            jwks_hits: AtomicUsize::new(0),
            token_hits: AtomicUsize::new(0),
            userinfo_hits: AtomicUsize::new(0),
            jwks_delay: Mutex::new(Duration::ZERO),
            discovery_status: Mutex::new(None),
            discovery_issuer: Mutex::new(None),
            auth_methods: Mutex::new(vec![
                "client_secret_basic".to_string(),
                "client_secret_post".to_string(),
            ]),
            registered_redirect: Mutex::new(REDIRECT_URI.to_string()),
            omit_id_token: AtomicBool::new(false),
            nonce: Mutex::new(None),
            last_token_form: Mutex::new(HashMap::new()),
            last_client_auth: Mutex::new(None),
        }
    }

    /// Claims of a valid ID token for this provider and client.
    pub fn standard_claims(&self) -> Value {
        let now = chrono::Utc::now().timestamp();
        let mut claims = json!({
            "iss": self.issuer,
            "sub": SUBJECT,
            "aud": CLIENT_ID,
            "iat": now,
            "exp": now + 300,
            "email": "test-user@example.com",
            "email_verified": true,
            "name": "Test User",
        });
        if let Some(nonce) = self.nonce.lock().unwrap().clone() {
            claims["nonce"] = nonce.into();
        }
        claims
    }

    /// Sign `claims` with the current signing key.
    pub fn sign(&self, claims: &Value) -> String {
        self.signer.lock().unwrap().sign(claims)
    }

    /// Publish `key` and use it for newly minted tokens.
    pub fn rotate_to(&self, key: TestKey, keep_old: bool) {
        let mut published = self.published.lock().unwrap();
        if !keep_old {
            published.clear();
        }
        published.push(key.clone());
        *self.signer.lock().unwrap() = key;
    }
}

// ── server ──────────────────────────────────────────────────────────────────

pub struct MockProvider {
    pub state: Arc<ProviderState>,
    server: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to port 0");
        let addr: SocketAddr = listener.local_addr().expect("get local addr");
        let state = Arc::new(ProviderState::new(format!("http://127.0.0.1:{}", addr.port())));

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/.well-known/jwks.json", get(jwks))
            .route("/oauth/token", post(token))
            .route("/userinfo", get(userinfo))
            .with_state(Arc::clone(&state));

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        Self {
            state,
            server,
        }
    }

    /// `host:port` of the provider, as configured in `domain`.
    pub fn domain(&self) -> String {
        self.state
            .base
            .trim_start_matches("http://")
            .to_string()
    }

    /// A complete configuration pointing at this provider.
    pub fn config(&self) -> AuthConfig {
        let mut config = AuthConfig::new(self.domain(), CLIENT_ID, CLIENT_SECRET, REDIRECT_URI);
        config.http.allow_insecure_http = true;
        config
    }

    pub fn discovery_hits(&self) -> usize {
        self.state.discovery_hits.load(Ordering::SeqCst)
    }

    pub fn jwks_hits(&self) -> usize {
        self.state.jwks_hits.load(Ordering::SeqCst)
    }

    pub fn token_hits(&self) -> usize {
        self.state.token_hits.load(Ordering::SeqCst)
    }

    pub fn set_jwks_delay(&self, delay: Duration) {
        *self.state.jwks_delay.lock().unwrap() = delay;
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// ── handlers ────────────────────────────────────────────────────────────────

async fn discovery(State(state): State<Arc<ProviderState>>) -> Response {
    state.discovery_hits.fetch_add(1, Ordering::SeqCst);

    if let Some(status) = *state.discovery_status.lock().unwrap() {
        return (status, "unavailable").into_response();
    }

    let issuer = state
        .discovery_issuer
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| state.issuer.clone());
    let base = &state.base;

    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "jwks_uri": format!("{base}/.well-known/jwks.json"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "end_session_endpoint": format!("{base}/oidc/logout"),
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
        "response_types_supported": ["code"],
        "id_token_signing_alg_values_supported": ["ES256", "RS256"],
        "token_endpoint_auth_methods_supported": *state.auth_methods.lock().unwrap(),
    }))
    .into_response()
}

async fn jwks(State(state): State<Arc<ProviderState>>) -> Json<Value> {
    state.jwks_hits.fetch_add(1, Ordering::SeqCst);

    let delay = *state.jwks_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let keys: Vec<Value> = state
        .published
        .lock()
        .unwrap()
        .iter()
        .map(|k| k.jwk.clone())
        .collect();
    Json(json!({ "keys": keys }))
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

/// Identify the client from Basic auth or form fields.
fn client_auth(headers: &HeaderMap, form: &HashMap<String, String>) -> Option<&'static str> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
    {
        let decoded = STANDARD.decode(value).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (id, secret) = decoded.split_once(':')?;
        return (id == CLIENT_ID && secret == CLIENT_SECRET).then_some("client_secret_basic");
    }

    let id = form.get("client_id")?;
    let secret = form.get("client_secret")?;
    (id == CLIENT_ID && secret == CLIENT_SECRET).then_some("client_secret_post")
}

async fn token(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_token_form.lock().unwrap() = form.clone();

    let auth = client_auth(&headers, &form);
    *state.last_client_auth.lock().unwrap() = auth;
    if auth.is_none() {
        return oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "Client authentication failed",
        );
    }

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            let registered = state.registered_redirect.lock().unwrap().clone();
            if form.get("redirect_uri") != Some(&registered) {
                return oauth_error(
                    StatusCode::FORBIDDEN,
                    "invalid_grant",
                    "redirect_uri mismatch",
                );
            }
            if form.get("code").map(String::as_str) != Some(VALID_CODE) {
                return oauth_error(
                    StatusCode::FORBIDDEN,
                    "invalid_grant",
                    "Invalid authorization code",
                );
            }

            let mut body = json!({
                "access_token": ACCESS_TOKEN,
                "refresh_token": REFRESH_TOKEN,
                "token_type": "Bearer",
                "expires_in": 86400,
                "scope": "openid profile",
            });
            if !state.omit_id_token.load(Ordering::SeqCst) {
                body["id_token"] = state.sign(&state.standard_claims()).into();
            }
            Json(body).into_response()
        }
        Some("refresh_token") => {
            if form.get("refresh_token").map(String::as_str) != Some(REFRESH_TOKEN) {
                return oauth_error(
                    StatusCode::FORBIDDEN,
                    "invalid_grant",
                    "Unknown or invalid refresh token.",
                );
            }
            Json(json!({
                "access_token": "at-refreshed",
                "token_type": "Bearer",
                "expires_in": 86400,
            }))
            .into_response()
        }
        _ => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "Unsupported grant type",
        ),
    }
}

async fn userinfo(State(state): State<Arc<ProviderState>>, headers: HeaderMap) -> Response {
    state.userinfo_hits.fetch_add(1, Ordering::SeqCst);

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if bearer != Some(ACCESS_TOKEN) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    Json(json!({
        "sub": SUBJECT,
        "email": "test-user@example.com",
        "name": "Test User",
    }))
    .into_response()
}
