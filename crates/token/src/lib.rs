//! Access-token issuance, pre-declared scope derivation, and scheduled
//! refresh: locally-signed tokens for direct API-key auth, or a fetch
//! against a token-generation endpoint for indirect auth.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// How access tokens are obtained. Exactly one of these is ever held:
/// the `ConfigError` case of "neither an API key nor a token-generation
/// URL provided" is represented by failing to construct an `AuthMode`
/// at all, rather than by a `None`/`None` variant that every caller
/// has to re-check.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Mint tokens locally by HMAC-signing claims with this key.
    ApiKey(String),
    /// POST a JSON request to this URL and expect an issued token back.
    TokenUrl(Url),
}

impl AuthMode {
    /// Resolve the two middleware options `apiKey` and
    /// `tokenGenerationUrl` into an `AuthMode`, enforcing that exactly
    /// one is present.
    pub fn from_options(api_key: Option<String>, token_url: Option<Url>) -> Result<Self, Error> {
        match (api_key, token_url) {
            (Some(key), None) => Ok(AuthMode::ApiKey(key)),
            (None, Some(url)) => Ok(AuthMode::TokenUrl(url)),
            (None, None) => Err(Error::Config(
                "one of apiKey or tokenGenerationUrl is required",
            )),
            (Some(_), Some(_)) => Err(Error::Config(
                "apiKey and tokenGenerationUrl are mutually exclusive",
            )),
        }
    }
}

/// Build the pre-declared subscription key patterns for a set of
/// synced root fields: `{ field, field:* }` per field, so the issued
/// token's access scope matches what the subscription will observe.
pub fn subscription_patterns(sync_fields: &[String]) -> Vec<String> {
    let mut patterns = Vec::with_capacity(sync_fields.len() * 2);
    for field in sync_fields {
        patterns.push(field.clone());
        patterns.push(format!("{field}:*"));
    }
    patterns
}

#[derive(Debug, Serialize)]
struct Claims<'s> {
    scopes: &'s [String],
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenGenerationResponse {
    access_token: String,
    expires_in: u64,
}

/// A freshly issued token and when it expires.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid multiplayer token configuration: {0}")]
    Config(&'static str),
    #[error("failed to sign access token")]
    Sign(#[from] jsonwebtoken::errors::Error),
    #[error("token generation endpoint request failed")]
    Request(#[from] reqwest::Error),
    #[error("token generation endpoint returned {status}: {body}")]
    TokenGenerationFailed {
        status: reqwest::StatusCode,
        body: String,
    },
}

const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Fetches scoped access tokens and schedules their refresh.
pub struct TokenManager {
    auth: AuthMode,
    http: reqwest::Client,
    scopes: Vec<String>,
    refresh_buffer: Duration,
}

impl TokenManager {
    pub fn new(auth: AuthMode, scopes: Vec<String>) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
            scopes,
            refresh_buffer: Duration::from_secs(30),
        }
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Fetch a fresh access token, scoped to this manager's pre-declared
    /// subscription patterns.
    pub async fn fetch(&self) -> Result<IssuedToken, Error> {
        match &self.auth {
            AuthMode::ApiKey(key) => self.mint_locally(key),
            AuthMode::TokenUrl(url) => self.fetch_remote(url).await,
        }
    }

    fn mint_locally(&self, api_key: &str) -> Result<IssuedToken, Error> {
        let iat = unix_now();
        let exp = iat + DEFAULT_TOKEN_LIFETIME.as_secs();
        let claims = Claims {
            scopes: &self.scopes,
            iat,
            exp,
        };

        let encoding_key = jsonwebtoken::EncodingKey::from_base64_secret(api_key)
            .or_else(|_| Ok::<_, Error>(jsonwebtoken::EncodingKey::from_secret(api_key.as_bytes())))?;

        let access_token =
            jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &encoding_key)?;

        debug!(scopes = ?self.scopes, "minted access token locally");

        Ok(IssuedToken {
            access_token,
            expires_in: DEFAULT_TOKEN_LIFETIME,
        })
    }

    async fn fetch_remote(&self, url: &Url) -> Result<IssuedToken, Error> {
        let response = self
            .http
            .post(url.clone())
            .json(&serde_json::json!({ "scopes": self.scopes }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenGenerationFailed { status, body });
        }

        let body: TokenGenerationResponse = response.json().await?;
        Ok(IssuedToken {
            access_token: body.access_token,
            expires_in: Duration::from_secs(body.expires_in),
        })
    }

    /// Schedule `on_refresh` to run `refresh_buffer` before `token`
    /// expires, and keep rescheduling after every subsequent fetch.
    /// Returns a handle whose drop cancels the pending timer.
    pub fn schedule_refresh<F>(self: &Arc<Self>, token: &IssuedToken, on_refresh: F) -> RefreshHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let delay = token.expires_in.saturating_sub(self.refresh_buffer);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            warn!(?delay, "access token nearing expiry, triggering refresh");
            on_refresh();
        });
        RefreshHandle { handle }
    }
}

/// Cancels the pending refresh timer when dropped, satisfying the
/// "cleanup is idempotent" requirement for `destroy()`.
pub struct RefreshHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
