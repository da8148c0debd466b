//! Identity provider collaborator and its OpenID Connect implementation.

use super::jwt::{IdClaims, Jwks, VerifyError, verify_rs256};
use crate::model::now_unix_seconds;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{
    fmt,
    sync::atomic::{AtomicI64, Ordering},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{Instrument, Span, debug, info, info_span, instrument, warn};
use url::Url;

pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_ISSUERS: &str = "https://accounts.google.com,accounts.google.com";

// Providers rotate keys daily at most; refetch hourly and on an unknown kid.
const KEYSET_CACHE_TTL_SECONDS: u64 = 3600;
const KEYSET_REFRESH_COOLDOWN_SECONDS: i64 = 30;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token exchange timed out")]
    Timeout,
    #[error("token exchange request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider rejected the grant: {0}")]
    Rejected(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Token endpoint response for a refresh or an authorization code grant.
/// Refresh grants usually carry no new refresh token.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TokenGrant {
    pub id_token: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify signature, issuer, audience and expiry of an identity token.
    async fn verify(&self, token: &str, audience: &str) -> Result<IdClaims, VerifyError>;

    /// Trade a refresh token for a fresh identity token.
    async fn exchange_refresh_token(&self, refresh_token: &str)
    -> Result<TokenGrant, ExchangeError>;

    /// Trade the authorization code from a login redirect for tokens.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ExchangeError>;
}

#[derive(Clone)]
pub struct OidcConfig {
    client_id: String,
    client_secret: SecretString,
    issuers: Vec<String>,
    jwks_url: Url,
    token_url: Url,
    redirect_url: Option<Url>,
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("client_id", &self.client_id)
            .field("issuers", &self.issuers)
            .field("jwks_url", &self.jwks_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("redirect_url", &self.redirect_url.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

impl OidcConfig {
    #[must_use]
    pub fn new(client_id: String, client_secret: SecretString, jwks_url: Url, token_url: Url) -> Self {
        Self {
            client_id,
            client_secret,
            issuers: GOOGLE_ISSUERS.split(',').map(ToString::to_string).collect(),
            jwks_url,
            token_url,
            redirect_url: None,
        }
    }

    /// Login callback registered with the provider; required for code exchange.
    #[must_use]
    pub fn with_redirect_url(mut self, redirect_url: Option<Url>) -> Self {
        self.redirect_url = redirect_url;
        self
    }

    #[must_use]
    pub fn with_issuers(mut self, issuers: Vec<String>) -> Self {
        self.issuers = issuers;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[derive(Debug)]
struct KeyCache {
    jwks: Jwks,
    fetched_at: Option<Instant>,
}

impl KeyCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < Duration::from_secs(KEYSET_CACHE_TTL_SECONDS))
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Verifies tokens against the provider's published keys and exchanges
/// refresh tokens at its token endpoint.
#[derive(Debug)]
pub struct OidcProvider {
    config: OidcConfig,
    client: Client,
    keys: RwLock<KeyCache>,
    last_refresh_unix: AtomicI64,
}

impl OidcProvider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: OidcConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            config,
            client,
            keys: RwLock::new(KeyCache {
                jwks: Jwks::default(),
                fetched_at: None,
            }),
            last_refresh_unix: AtomicI64::new(0),
        })
    }

    /// Key set snapshot; refreshes when stale and keeps the old set if that fails.
    async fn keyset(&self) -> Jwks {
        {
            let cache = self.keys.read().await;
            if cache.is_fresh() {
                return cache.jwks.clone();
            }
        }
        if let Err(err) = self.refresh_keys().await {
            warn!(error = %err, url = %self.config.jwks_url, "failed to refresh verification keys");
        }
        self.keys.read().await.jwks.clone()
    }

    async fn refresh_keys(&self) -> Result<(), VerifyError> {
        let span = info_span!("oidc.fetch_jwks", url = %self.config.jwks_url);
        let response = self
            .client
            .get(self.config.jwks_url.clone())
            .send()
            .instrument(span)
            .await
            .map_err(|err| VerifyError::Keys(err.to_string()))?;
        if !response.status().is_success() {
            return Err(VerifyError::Keys(format!("status {}", response.status())));
        }
        let jwks: Jwks = response
            .json()
            .await
            .map_err(|err| VerifyError::Keys(err.to_string()))?;

        info!(keys = jwks.keys.len(), "verification keys refreshed");
        let mut cache = self.keys.write().await;
        cache.jwks = jwks;
        cache.fetched_at = Some(Instant::now());
        self.last_refresh_unix
            .store(now_unix_seconds(), Ordering::Relaxed);
        Ok(())
    }

    /// Throttle forced refreshes triggered by tokens naming unknown keys.
    fn refresh_allowed(&self) -> bool {
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        now_unix_seconds().saturating_sub(last) >= KEYSET_REFRESH_COOLDOWN_SECONDS
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    #[instrument(skip_all)]
    async fn verify(&self, token: &str, audience: &str) -> Result<IdClaims, VerifyError> {
        let jwks = self.keyset().await;
        let now = now_unix_seconds();
        match verify_rs256(token, &jwks, &self.config.issuers, audience, now) {
            Err(VerifyError::UnknownKid(kid)) if self.refresh_allowed() => {
                debug!(%kid, "unknown key id, refreshing key set");
                self.refresh_keys().await?;
                let jwks = self.keys.read().await.jwks.clone();
                verify_rs256(token, &jwks, &self.config.issuers, audience, now)
            }
            other => other,
        }
    }

    #[instrument(skip_all)]
    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenGrant, ExchangeError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let span = info_span!("oidc.refresh", url = %self.config.token_url);
        self.token_request(&form, span).await
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ExchangeError> {
        let redirect_url = self
            .config
            .redirect_url
            .as_ref()
            .ok_or(ExchangeError::NotConfigured("OIDC redirect URL"))?;
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let span = info_span!("oidc.code_exchange", url = %self.config.token_url);
        self.token_request(&form, span).await
    }
}

impl OidcProvider {
    /// POST a grant to the token endpoint and decode the answer.
    async fn token_request(
        &self,
        form: &[(&str, &str)],
        span: Span,
    ) -> Result<TokenGrant, ExchangeError> {
        let response = self
            .client
            .post(self.config.token_url.clone())
            .form(form)
            .send()
            .instrument(span)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: TokenErrorBody = response.json().await.unwrap_or(TokenErrorBody {
                error: status.to_string(),
                error_description: String::new(),
            });
            return Err(ExchangeError::Rejected(
                format!("{} {}", body.error, body.error_description)
                    .trim()
                    .to_string(),
            ));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::test_support::{claims, sign};

    #[test]
    fn default_issuers_cover_both_google_forms() -> anyhow::Result<()> {
        let config = OidcConfig::new(
            "client".to_string(),
            SecretString::from("secret".to_string()),
            Url::parse(GOOGLE_JWKS_URL)?,
            Url::parse(GOOGLE_TOKEN_URL)?,
        );
        assert_eq!(
            config.issuers,
            vec![
                "https://accounts.google.com".to_string(),
                "accounts.google.com".to_string()
            ]
        );
        assert!(!format!("{config:?}").contains("secret"));
        Ok(())
    }

    #[test]
    fn grant_tolerates_missing_fields() -> Result<(), serde_json::Error> {
        let grant: TokenGrant = serde_json::from_str(r#"{"id_token":"abc","expires_in":3599}"#)?;
        assert_eq!(grant.id_token, "abc");
        assert!(grant.access_token.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_keys_fail_closed() -> anyhow::Result<()> {
        let provider = OidcProvider::new(OidcConfig::new(
            "client".to_string(),
            SecretString::from("secret".to_string()),
            Url::parse("http://127.0.0.1:9/certs")?,
            Url::parse("http://127.0.0.1:9/token")?,
        ))?;
        let token = sign(&claims("a@x.com", now_unix_seconds() + 60));
        assert!(provider.verify(&token, "client").await.is_err());
        assert!(provider.exchange_refresh_token("rt").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn code_exchange_needs_redirect_url() -> anyhow::Result<()> {
        let provider = OidcProvider::new(OidcConfig::new(
            "client".to_string(),
            SecretString::from("secret".to_string()),
            Url::parse("http://127.0.0.1:9/certs")?,
            Url::parse("http://127.0.0.1:9/token")?,
        ))?;
        assert!(matches!(
            provider.exchange_code("code").await,
            Err(ExchangeError::NotConfigured(_))
        ));
        Ok(())
    }

    #[test]
    fn code_grant_carries_refresh_token() -> Result<(), serde_json::Error> {
        let grant: TokenGrant = serde_json::from_str(
            r#"{"id_token":"abc","access_token":"ya29","refresh_token":"1//rt","token_type":"Bearer","expires_in":3599}"#,
        )?;
        assert_eq!(grant.refresh_token, "1//rt");
        assert_eq!(grant.expires_in, 3599);
        Ok(())
    }
}
