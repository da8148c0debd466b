//! Per-request authentication gate.
//!
//! Flow Overview: local deployments bypass validation entirely. Otherwise the
//! bearer token must belong to a live session and verify against the identity
//! provider. An expired token is renewed silently with the `rtoken` header,
//! then the organisational domain and the ban list are checked. Every failure
//! is a `Rejection` carrying a short code; nothing is retried server side.

pub mod error;
pub mod jwt;
pub mod oidc;

pub use error::{LoginError, Rejection};
pub use jwt::{IdClaims, VerifyError};
pub use oidc::{ExchangeError, IdentityProvider, OidcConfig, OidcProvider, TokenGrant};

use crate::{
    model::{Session, now_unix_seconds},
    permission::PermissionEvaluator,
    session::{NewSession, SessionStore},
};
use axum::http::{HeaderMap, header::AUTHORIZATION};
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, error, info, instrument, warn};

/// Header carrying the refresh token used for silent renewal.
pub const RENEWAL_HEADER: &str = "rtoken";
/// Response header carrying a freshly renewed identity token.
pub const NEW_TOKEN_HEADER: &str = "x-tiki-new-token";

pub const DEFAULT_DEVELOPER_EMAIL: &str = "developer@localhost";
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deployment {
    Local,
    Remote(String),
}

impl Deployment {
    #[must_use]
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("local") {
            Self::Local
        } else {
            Self::Remote(name.to_string())
        }
    }

    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    deployment: Deployment,
    developer_email: String,
    audience: String,
    hosted_domain: Option<String>,
    exchange_timeout: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new(deployment: Deployment, audience: String) -> Self {
        Self {
            deployment,
            developer_email: DEFAULT_DEVELOPER_EMAIL.to_string(),
            audience,
            hosted_domain: None,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_developer_email(mut self, email: String) -> Self {
        self.developer_email = email;
        self
    }

    /// Expected `hd` claim; `None` skips the check.
    #[must_use]
    pub fn with_hosted_domain(mut self, hosted_domain: Option<String>) -> Self {
        self.hosted_domain = hosted_domain;
        self
    }

    #[must_use]
    pub const fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn deployment(&self) -> &Deployment {
        &self.deployment
    }
}

/// Claims attached to an authorized request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub email: String,
    pub subject: String,
    pub org_domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePath {
    LocalBypass,
    Validated,
    Renewed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub identity: Identity,
    /// Set when the presented token was renewed; the client should store it.
    pub renewed_token: Option<String>,
    pub path: GatePath,
}

pub struct AuthGate {
    config: AuthConfig,
    provider: Arc<dyn IdentityProvider>,
    sessions: Arc<SessionStore>,
    permissions: PermissionEvaluator,
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Extract a bearer token from the Authorization header.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

fn renewal_credential(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(RENEWAL_HEADER)?.to_str().ok()?.trim();
    (!value.is_empty()).then_some(value)
}

impl AuthGate {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<SessionStore>,
        permissions: PermissionEvaluator,
    ) -> Self {
        Self {
            config,
            provider,
            sessions,
            permissions,
        }
    }

    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    #[must_use]
    pub const fn permissions(&self) -> &PermissionEvaluator {
        &self.permissions
    }

    /// Run the gate over request headers.
    ///
    /// # Errors
    /// Returns the `Rejection` for the first state that failed.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Authorized, Rejection> {
        self.authenticate_parts(extract_bearer_token(headers), renewal_credential(headers))
            .await
    }

    /// Run the gate over an already extracted bearer token and renewal credential.
    ///
    /// # Errors
    /// Returns the `Rejection` for the first state that failed.
    #[instrument(skip_all)]
    pub async fn authenticate_parts(
        &self,
        bearer: Option<&str>,
        renewal: Option<&str>,
    ) -> Result<Authorized, Rejection> {
        if self.config.deployment.is_local() {
            debug!(email = %self.config.developer_email, "local deployment, skipping validation");
            return Ok(Authorized {
                identity: Identity {
                    email: self.config.developer_email.clone(),
                    subject: self.config.developer_email.clone(),
                    org_domain: self
                        .config
                        .hosted_domain
                        .clone()
                        .unwrap_or_else(|| "localhost".to_string()),
                },
                renewed_token: None,
                path: GatePath::LocalBypass,
            });
        }

        let token = bearer.ok_or(Rejection::MissingCredential)?;
        let session = match self.sessions.get_session_by_token(token).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!("no session for presented token");
                return Err(Rejection::UnknownSession);
            }
            Err(err) => {
                error!(error = %err, "session lookup failed");
                return Err(Rejection::UnknownSession);
            }
        };
        if session.is_revoked || session.is_past_max_length(now_unix_seconds()) {
            info!(session_id = %session.session_id, revoked = session.is_revoked, "session no longer usable");
            return Err(Rejection::UnknownSession);
        }

        let (claims, renewed_token) = match self.provider.verify(token, &self.config.audience).await
        {
            Ok(claims) => (claims, None),
            Err(VerifyError::Expired) => {
                let refresh_token = renewal.ok_or(Rejection::MissingRenewalCredential)?;
                if refresh_token != session.refresh_token {
                    warn!(session_id = %session.session_id, "renewal credential does not match session");
                    return Err(Rejection::RenewalFailed);
                }
                let (claims, new_token) = self.renew(token, refresh_token, &session.owner).await?;
                (claims, Some(new_token))
            }
            Err(VerifyError::InvalidAudience) => return Err(Rejection::AudienceMismatch),
            Err(err) => {
                info!(error = %err, kid = %jwt::key_id(token).unwrap_or_default(), "token verification failed");
                return Err(Rejection::InvalidToken);
            }
        };

        if let Some(expected) = &self.config.hosted_domain
            && claims.hd.as_deref() != Some(expected.as_str())
        {
            info!(email = %claims.email, hd = ?claims.hd, "organisational domain mismatch");
            return Err(Rejection::DomainMismatch);
        }

        self.check_ban(&claims.email).await?;

        let path = if renewed_token.is_some() {
            GatePath::Renewed
        } else {
            GatePath::Validated
        };
        Ok(Authorized {
            identity: Identity {
                email: claims.email,
                subject: claims.sub,
                org_domain: claims.hd.unwrap_or_default(),
            },
            renewed_token,
            path,
        })
    }

    /// Complete a login redirect: exchange `code`, check the identity like a
    /// request would be checked, then open a session and prune the owner's
    /// oldest ones. `session_id` is the client chosen id, if any.
    ///
    /// # Errors
    /// Returns the `LoginError` for the first step that failed.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        code: &str,
        session_id: Option<String>,
    ) -> Result<Session, LoginError> {
        if code.is_empty() {
            return Err(LoginError::MissingCode);
        }
        let grant = match tokio::time::timeout(
            self.config.exchange_timeout,
            self.provider.exchange_code(code),
        )
        .await
        {
            Ok(Ok(grant)) => grant,
            Ok(Err(err)) => {
                warn!(error = %err, "authorization code exchange failed");
                return Err(LoginError::ExchangeFailed);
            }
            Err(_) => {
                warn!(error = %ExchangeError::Timeout, timeout = ?self.config.exchange_timeout, "authorization code exchange failed");
                return Err(LoginError::ExchangeFailed);
            }
        };

        let claims = self
            .provider
            .verify(&grant.id_token, &self.config.audience)
            .await
            .map_err(|err| {
                warn!(error = %err, "login token failed verification");
                LoginError::InvalidToken
            })?;
        if let Some(expected) = &self.config.hosted_domain
            && claims.hd.as_deref() != Some(expected.as_str())
        {
            info!(email = %claims.email, hd = ?claims.hd, "login from another organisational domain");
            return Err(LoginError::DomainMismatch);
        }
        self.check_ban(&claims.email)
            .await
            .map_err(|_| LoginError::Banned)?;
        if grant.refresh_token.is_empty() {
            warn!(email = %claims.email, "no refresh token granted, the session cannot be renewed");
        }

        let session = self
            .sessions
            .open_session(NewSession {
                session_id,
                owner: claims.email,
                identity_token: grant.id_token,
                access_token: grant.access_token,
                refresh_token: grant.refresh_token,
                token_type: grant.token_type,
                expires_at: claims.exp.to_string(),
            })
            .await
            .map_err(|err| {
                error!(error = %err, "failed to open session");
                LoginError::Storage
            })?;
        info!(session_id = %session.session_id, email = %session.owner, "login completed");
        Ok(session)
    }

    /// Exchange, re-verify and record a renewal. Returns the new claims and token.
    async fn renew(
        &self,
        previous_token: &str,
        refresh_token: &str,
        owner: &str,
    ) -> Result<(IdClaims, String), Rejection> {
        let grant = match tokio::time::timeout(
            self.config.exchange_timeout,
            self.provider.exchange_refresh_token(refresh_token),
        )
        .await
        {
            Ok(Ok(grant)) => grant,
            Ok(Err(err)) => {
                warn!(error = %err, "refresh token exchange failed");
                return Err(Rejection::RenewalFailed);
            }
            Err(_) => {
                warn!(error = %ExchangeError::Timeout, timeout = ?self.config.exchange_timeout, "refresh token exchange failed");
                return Err(Rejection::RenewalFailed);
            }
        };

        let claims = self
            .provider
            .verify(&grant.id_token, &self.config.audience)
            .await
            .map_err(|err| {
                warn!(error = %err, "renewed token failed verification");
                Rejection::RenewalFailed
            })?;
        if claims.email != owner {
            warn!(owner, email = %claims.email, "renewed token belongs to another identity");
            return Err(Rejection::RenewalFailed);
        }

        match self
            .sessions
            .update_session(
                previous_token,
                &grant.id_token,
                &claims.exp.to_string(),
                refresh_token,
            )
            .await
        {
            Ok(true) => {
                info!(email = %claims.email, "token renewed");
                Ok((claims, grant.id_token))
            }
            Ok(false) => Err(Rejection::RenewalFailed),
            Err(err) => {
                error!(error = %err, "failed to record renewal");
                Err(Rejection::RenewalFailed)
            }
        }
    }

    /// Reject banned identities and revoke their sessions. A ban list that
    /// cannot be read rejects too.
    async fn check_ban(&self, email: &str) -> Result<(), Rejection> {
        match self.permissions.ban_status(email).await {
            Ok(false) => Ok(()),
            Ok(true) => {
                warn!(email, "banned identity presented a valid token");
                if let Err(err) = self.sessions.revoke_sessions_of(email).await {
                    error!(email, error = %err, "failed to revoke sessions of banned identity");
                }
                Err(Rejection::Banned)
            }
            Err(err) => {
                error!(email, error = %err, "ban lookup failed");
                Err(Rejection::Banned)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::jwt::{
            Jwks,
            test_support::{AUDIENCE, ISSUER, claims, jwks, sign},
            verify_rs256,
        },
        cluster::{ClusterCoordinator, GossipConfig},
        model::{BannedUser, Partition, Session},
        session::SessionConfig,
        store::{DurableStore, MemoryStore},
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::Mutex,
    };

    #[derive(Clone)]
    enum Exchange {
        Grant(String),
        Fail,
        Hang,
    }

    struct StubProvider {
        jwks: Jwks,
        exchange: Mutex<Exchange>,
    }

    impl StubProvider {
        fn new(exchange: Exchange) -> Self {
            Self {
                jwks: jwks(),
                exchange: Mutex::new(exchange),
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn verify(&self, token: &str, audience: &str) -> Result<IdClaims, VerifyError> {
            verify_rs256(
                token,
                &self.jwks,
                &[ISSUER.to_string()],
                audience,
                now_unix_seconds(),
            )
        }

        async fn exchange_refresh_token(
            &self,
            _refresh_token: &str,
        ) -> Result<TokenGrant, ExchangeError> {
            self.grant(String::new()).await
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ExchangeError> {
            self.grant(format!("rt-{code}")).await
        }
    }

    impl StubProvider {
        async fn grant(&self, refresh_token: String) -> Result<TokenGrant, ExchangeError> {
            let exchange = self.exchange.lock().expect("stub lock").clone();
            match exchange {
                Exchange::Grant(id_token) => Ok(TokenGrant {
                    id_token,
                    access_token: "access".to_string(),
                    refresh_token,
                    scope: "openid email".to_string(),
                    token_type: "Bearer".to_string(),
                    expires_in: 3599,
                }),
                Exchange::Fail => Err(ExchangeError::Rejected("invalid_grant".to_string())),
                Exchange::Hang => std::future::pending().await,
            }
        }
    }

    fn session_for(token: &str, owner: &str) -> Session {
        Session {
            session_id: format!("s-{owner}"),
            owner: owner.to_string(),
            identity_token: token.to_string(),
            refresh_token: format!("rt-{owner}"),
            expires_at: "9999999999".to_string(),
            created_epoch: now_unix_seconds(),
            expiry_epoch: now_unix_seconds() + 3600,
            ..Session::default()
        }
    }

    struct Harness {
        memory: Arc<MemoryStore>,
        gate: AuthGate,
    }

    async fn harness(memory: MemoryStore, exchange: Exchange, config: AuthConfig) -> Result<Harness> {
        let memory = Arc::new(memory);
        let (cluster, _feed) = ClusterCoordinator::new(
            GossipConfig::new(0).with_local_ip(IpAddr::V4(Ipv4Addr::new(10, 255, 255, 1))),
        )
        .await?;
        let sessions = Arc::new(SessionStore::new(
            memory.clone(),
            cluster,
            SessionConfig::default(),
        ));
        let gate = AuthGate::new(
            config,
            Arc::new(StubProvider::new(exchange)),
            sessions,
            PermissionEvaluator::new(memory.clone()),
        );
        Ok(Harness { memory, gate })
    }

    fn remote() -> AuthConfig {
        AuthConfig::new(Deployment::parse("production"), AUDIENCE.to_string())
            .with_hosted_domain(Some("x.com".to_string()))
    }

    fn live_token(email: &str) -> String {
        sign(&claims(email, now_unix_seconds() + 600))
    }

    fn expired_token(email: &str) -> String {
        sign(&claims(email, now_unix_seconds() - 600))
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(extract_bearer_token(&headers).is_none());
    }

    #[tokio::test]
    async fn local_bypass_stamps_developer() -> Result<()> {
        let config = AuthConfig::new(Deployment::parse("local"), AUDIENCE.to_string())
            .with_developer_email("dev@x.com".to_string());
        let h = harness(MemoryStore::new(), Exchange::Fail, config).await?;
        let authorized = h.gate.authenticate(&HeaderMap::new()).await?;
        assert_eq!(authorized.path, GatePath::LocalBypass);
        assert_eq!(authorized.identity.email, "dev@x.com");
        Ok(())
    }

    #[tokio::test]
    async fn missing_credential() -> Result<()> {
        let h = harness(MemoryStore::new(), Exchange::Fail, remote()).await?;
        assert_eq!(
            h.gate.authenticate(&HeaderMap::new()).await,
            Err(Rejection::MissingCredential)
        );
        Ok(())
    }

    #[tokio::test]
    async fn valid_token_is_authorized() -> Result<()> {
        let token = live_token("a@x.com");
        let h = harness(
            MemoryStore::new().with_session(session_for(&token, "a@x.com")),
            Exchange::Fail,
            remote(),
        )
        .await?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);

        let authorized = h.gate.authenticate(&headers).await?;
        assert_eq!(authorized.path, GatePath::Validated);
        assert_eq!(
            authorized.identity,
            Identity {
                email: "a@x.com".to_string(),
                subject: "sub-a@x.com".to_string(),
                org_domain: "x.com".to_string(),
            }
        );
        assert!(authorized.renewed_token.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn token_without_session_is_rejected() -> Result<()> {
        let h = harness(MemoryStore::new(), Exchange::Fail, remote()).await?;
        let token = live_token("a@x.com");
        assert_eq!(
            h.gate.authenticate_parts(Some(&token), None).await,
            Err(Rejection::UnknownSession)
        );
        Ok(())
    }

    #[tokio::test]
    async fn session_past_max_length_is_rejected() -> Result<()> {
        let token = live_token("a@x.com");
        let mut session = session_for(&token, "a@x.com");
        session.expiry_epoch = now_unix_seconds() - 1;
        let h = harness(MemoryStore::new().with_session(session), Exchange::Fail, remote()).await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&token), None).await,
            Err(Rejection::UnknownSession)
        );
        Ok(())
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() -> Result<()> {
        let h = harness(
            MemoryStore::new().with_session(session_for("garbage", "a@x.com")),
            Exchange::Fail,
            remote(),
        )
        .await?;
        assert_eq!(
            h.gate.authenticate_parts(Some("garbage"), None).await,
            Err(Rejection::InvalidToken)
        );
        Ok(())
    }

    #[tokio::test]
    async fn wrong_audience_and_domain() -> Result<()> {
        let token = live_token("a@x.com");
        let h = harness(
            MemoryStore::new().with_session(session_for(&token, "a@x.com")),
            Exchange::Fail,
            AuthConfig::new(Deployment::parse("production"), "other-client".to_string()),
        )
        .await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&token), None).await,
            Err(Rejection::AudienceMismatch)
        );

        let h = harness(
            MemoryStore::new().with_session(session_for(&token, "a@x.com")),
            Exchange::Fail,
            remote().with_hosted_domain(Some("y.com".to_string())),
        )
        .await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&token), None).await,
            Err(Rejection::DomainMismatch)
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_renewed() -> Result<()> {
        let old = expired_token("a@x.com");
        let new = live_token("a@x.com");
        let h = harness(
            MemoryStore::new().with_session(session_for(&old, "a@x.com")),
            Exchange::Grant(new.clone()),
            remote(),
        )
        .await?;
        // cache active, so the renewal reloads it
        h.gate.sessions().get_sessions(Partition::All).await?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {old}"))?);
        headers.insert(RENEWAL_HEADER, HeaderValue::from_static("rt-a@x.com"));

        let authorized = h.gate.authenticate(&headers).await?;
        assert_eq!(authorized.path, GatePath::Renewed);
        assert_eq!(authorized.renewed_token.as_deref(), Some(new.as_str()));

        let stored = h
            .memory
            .get_session_by_refresh_token("rt-a@x.com")
            .await?
            .ok_or_else(|| anyhow::anyhow!("session missing"))?;
        assert_eq!(stored.identity_token, new);
        assert_eq!(stored.previous_identity_token, old);
        assert_eq!(stored.refresh_count, 1);

        // the old token no longer maps to a session
        assert_eq!(
            h.gate.authenticate_parts(Some(&old), Some("rt-a@x.com")).await,
            Err(Rejection::UnknownSession)
        );
        let again = h.gate.authenticate_parts(Some(&new), None).await?;
        assert_eq!(again.path, GatePath::Validated);
        Ok(())
    }

    #[tokio::test]
    async fn expired_without_renewal_credential() -> Result<()> {
        let old = expired_token("a@x.com");
        let h = harness(
            MemoryStore::new().with_session(session_for(&old, "a@x.com")),
            Exchange::Grant(live_token("a@x.com")),
            remote(),
        )
        .await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&old), None).await,
            Err(Rejection::MissingRenewalCredential)
        );
        Ok(())
    }

    #[tokio::test]
    async fn renewal_failures() -> Result<()> {
        let old = expired_token("a@x.com");
        let seeded = || MemoryStore::new().with_session(session_for(&old, "a@x.com"));

        let h = harness(seeded(), Exchange::Fail, remote()).await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&old), Some("rt-a@x.com")).await,
            Err(Rejection::RenewalFailed)
        );

        let h = harness(seeded(), Exchange::Grant(live_token("a@x.com")), remote()).await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&old), Some("rt-someone-else")).await,
            Err(Rejection::RenewalFailed)
        );

        let h = harness(seeded(), Exchange::Grant(live_token("b@x.com")), remote()).await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&old), Some("rt-a@x.com")).await,
            Err(Rejection::RenewalFailed)
        );

        let h = harness(seeded(), Exchange::Grant(expired_token("a@x.com")), remote()).await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&old), Some("rt-a@x.com")).await,
            Err(Rejection::RenewalFailed)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn hung_exchange_times_out() -> Result<()> {
        let old = expired_token("a@x.com");
        let h = harness(
            MemoryStore::new().with_session(session_for(&old, "a@x.com")),
            Exchange::Hang,
            remote(),
        )
        .await?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&old), Some("rt-a@x.com")).await,
            Err(Rejection::RenewalFailed)
        );
        Ok(())
    }

    #[tokio::test]
    async fn banned_identity_is_rejected_and_revoked() -> Result<()> {
        let token = live_token("a@x.com");
        let h = harness(
            MemoryStore::new().with_session(session_for(&token, "a@x.com")),
            Exchange::Fail,
            remote(),
        )
        .await?;
        h.memory.ban(BannedUser::new("a@x.com", "root@x.com"))?;

        assert_eq!(
            h.gate.authenticate_parts(Some(&token), None).await,
            Err(Rejection::Banned)
        );
        assert_eq!(h.memory.get_partition(Partition::Revoked).await?.len(), 1);

        // unbanning does not bring the session back
        h.memory.unban("a@x.com")?;
        assert_eq!(
            h.gate.authenticate_parts(Some(&token), None).await,
            Err(Rejection::UnknownSession)
        );
        Ok(())
    }

    #[tokio::test]
    async fn login_opens_session() -> Result<()> {
        let token = live_token("a@x.com");
        let h = harness(MemoryStore::new(), Exchange::Grant(token.clone()), remote()).await?;

        let session = h.gate.login("code-1", Some("cli-1".to_string())).await?;
        assert_eq!(session.session_id, "cli-1");
        assert_eq!(session.owner, "a@x.com");
        assert_eq!(session.refresh_token, "rt-code-1");
        assert_eq!(session.token_type, "Bearer");

        let stored = h.memory.get_session_by_refresh_token("rt-code-1").await?;
        assert_eq!(stored, Some(session));

        // the new session authorizes requests right away
        let authorized = h.gate.authenticate_parts(Some(&token), None).await?;
        assert_eq!(authorized.path, GatePath::Validated);
        Ok(())
    }

    #[tokio::test]
    async fn login_failures() -> Result<()> {
        let h = harness(MemoryStore::new(), Exchange::Fail, remote()).await?;
        assert_eq!(h.gate.login("", None).await, Err(LoginError::MissingCode));
        assert_eq!(h.gate.login("code", None).await, Err(LoginError::ExchangeFailed));

        let h = harness(
            MemoryStore::new(),
            Exchange::Grant(expired_token("a@x.com")),
            remote(),
        )
        .await?;
        assert_eq!(h.gate.login("code", None).await, Err(LoginError::InvalidToken));

        let h = harness(
            MemoryStore::new(),
            Exchange::Grant(live_token("a@y.com")),
            remote(),
        )
        .await?;
        assert_eq!(h.gate.login("code", None).await, Err(LoginError::DomainMismatch));

        let h = harness(
            MemoryStore::new(),
            Exchange::Grant(live_token("a@x.com")),
            remote(),
        )
        .await?;
        h.memory.ban(BannedUser::new("a@x.com", "root@x.com"))?;
        assert_eq!(h.gate.login("code", None).await, Err(LoginError::Banned));
        assert!(h.memory.get_sessions_by_owner("a@x.com").await?.is_empty());
        Ok(())
    }
}
