//! OAuth2 token lifecycle.
//!
//! [`TokenManager`] caches one access token per client instance and
//! refreshes it through a [`TokenSource`]: silently first, then with
//! interactive consent. [`OAuthTokenSource`] is the real source, speaking
//! the OAuth2 token endpoint:
//!
//! - silent: `grant_type=refresh_token`
//! - interactive: authorization code with PKCE (S256), where a
//!   [`ConsentHandler`] shows the authorization URL and returns the code
//!
//! Any failure to obtain a token leaves the manager signed out.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::DriveError;
use crate::config::DriveConfig;

/// Tokens are treated as expired this long before their stated expiry.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// A bearer token and when it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Long-lived refresh token, when the grant returned one.
    pub refresh_token: Option<String>,
}

impl AccessToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Where access tokens come from.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtain a token without user interaction.
    async fn silent(&self) -> Result<AccessToken, DriveError>;

    /// Obtain a token by asking the user for consent.
    async fn interactive(&self) -> Result<AccessToken, DriveError>;
}

/// Presents an authorization URL to the user and returns the code the
/// provider handed back.
#[async_trait]
pub trait ConsentHandler: Send + Sync {
    async fn authorization_code(&self, authorization_url: &str) -> anyhow::Result<String>;
}

/// Caches the current access token and refreshes it on demand.
pub struct TokenManager {
    source: Arc<dyn TokenSource>,
    current: Mutex<Option<AccessToken>>,
    refresh_token: StdMutex<Option<String>>,
    interactive: bool,
}

impl TokenManager {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            current: Mutex::new(None),
            refresh_token: StdMutex::new(None),
            interactive: true,
        }
    }

    /// Disable the interactive fallback. Silent failures then surface
    /// immediately.
    pub fn without_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    /// Return a valid access token, refreshing it if needed.
    ///
    /// Only an auth-class silent failure leads to interactive consent.
    /// Network and service errors are returned as they are, so callers can
    /// tell an outage from a lost sign-in.
    pub async fn ensure_valid_token(&self) -> Result<String, DriveError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if !token.is_expired() {
                return Ok(token.token.clone());
            }
            tracing::debug!("access token expired");
        }

        let acquired = match self.source.silent().await {
            Ok(token) => Ok(token),
            Err(e) if self.interactive && e.is_auth() => {
                tracing::debug!(error = %e, "silent token request failed; asking for consent");
                self.source.interactive().await
            }
            Err(e) => Err(e),
        };

        match acquired {
            Ok(token) => {
                if let Some(refresh) = &token.refresh_token {
                    self.remember_refresh_token(refresh.clone());
                }
                let value = token.token.clone();
                *current = Some(token);
                Ok(value)
            }
            Err(e) => {
                *current = None;
                Err(e)
            }
        }
    }

    /// Drop the cached access token. The next call re-authenticates.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    /// Whether an unexpired token is cached.
    pub async fn is_signed_in(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|t| !t.is_expired())
            .unwrap_or(false)
    }

    /// The most recent refresh token issued to this manager, for
    /// persisting between runs.
    pub fn refresh_token(&self) -> Option<String> {
        self.refresh_token.lock().ok().and_then(|r| r.clone())
    }

    fn remember_refresh_token(&self, token: String) {
        if let Ok(mut slot) = self.refresh_token.lock() {
            *slot = Some(token);
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

/// [`TokenSource`] backed by an OAuth2 token endpoint.
pub struct OAuthTokenSource {
    http: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
    auth_url: String,
    token_url: String,
    redirect_uri: String,
    scopes: Vec<String>,
    refresh_token: StdMutex<Option<String>>,
    consent: Option<Arc<dyn ConsentHandler>>,
}

impl OAuthTokenSource {
    pub fn new(config: &DriveConfig, client_id: String, http: reqwest::Client) -> Self {
        Self {
            http,
            client_id,
            client_secret: config.client_secret.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.scopes.clone(),
            refresh_token: StdMutex::new(None),
            consent: None,
        }
    }

    /// Seed the refresh token used for silent acquisition.
    pub fn with_refresh_token(self, token: Option<String>) -> Self {
        if let Ok(mut slot) = self.refresh_token.lock() {
            *slot = token;
        }
        self
    }

    pub fn with_consent(mut self, handler: Arc<dyn ConsentHandler>) -> Self {
        self.consent = Some(handler);
        self
    }

    /// Authorization URL for a PKCE flow with the given challenge.
    pub fn authorization_url(&self, challenge: &str, state: &str) -> Result<Url, DriveError> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| DriveError::Auth(format!("invalid authorization URL: {}", e)))
    }

    fn current_refresh_token(&self) -> Option<String> {
        self.refresh_token.lock().ok().and_then(|r| r.clone())
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<AccessToken, DriveError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let resp = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DriveError::network("token request", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(DriveError::Auth(format!(
                    "token endpoint rejected the grant (HTTP {}): {}",
                    status.as_u16(),
                    body
                )));
            }
            return Err(DriveError::Http {
                operation: "token request",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| DriveError::decode("token request", e))?;

        let refresh_token = parsed.refresh_token.or_else(|| self.current_refresh_token());
        if let (Some(token), Ok(mut slot)) = (&refresh_token, self.refresh_token.lock()) {
            *slot = Some(token.clone());
        }

        Ok(AccessToken {
            token: parsed.access_token,
            expires_at: Utc::now() + Duration::seconds(parsed.expires_in),
            refresh_token,
        })
    }
}

/// PKCE verifier and its S256 challenge.
pub fn pkce_pair() -> (String, String) {
    let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let challenge = pkce_challenge(&verifier);
    (verifier, challenge)
}

pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn silent(&self) -> Result<AccessToken, DriveError> {
        let refresh = self
            .current_refresh_token()
            .ok_or_else(|| DriveError::Auth("no refresh token stored".into()))?;
        tracing::debug!("refreshing access token");
        self.token_request(&[("grant_type", "refresh_token"), ("refresh_token", refresh.as_str())])
            .await
    }

    async fn interactive(&self) -> Result<AccessToken, DriveError> {
        let consent = self
            .consent
            .as_ref()
            .ok_or_else(|| DriveError::Auth("interactive sign-in is not available".into()))?;

        let (verifier, challenge) = pkce_pair();
        let state = Uuid::new_v4().simple().to_string();
        let url = self.authorization_url(&challenge, &state)?;

        let code = consent
            .authorization_code(url.as_str())
            .await
            .map_err(|e| DriveError::Auth(format!("consent was not granted: {}", e)))?;
        let code = code.trim();
        if code.is_empty() {
            return Err(DriveError::Auth("empty authorization code".into()));
        }

        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }
}
