use crate::{
    api::handlers::request_id,
    auth::{AuthGate, LoginError},
};
use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Deserialize, Debug, Default)]
pub struct CallbackArgs {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: Option<String>,
}

/// Opaque `state` round-tripped through the provider by the CLI client.
#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
struct LoginState {
    #[serde(default, alias = "Id")]
    id: Option<String>,
    #[serde(default, alias = "Port")]
    port: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginComplete {
    session_id: String,
    token: String,
    r_token: String,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<String>,
}

fn parse_state(state: Option<&str>) -> Result<LoginState, LoginError> {
    match state.map(str::trim) {
        None | Some("") => Ok(LoginState::default()),
        Some(raw) => serde_json::from_str(raw).map_err(|err| {
            debug!("Failed to decode login state: {}", err);
            LoginError::MalformedState
        }),
    }
}

/// Provider redirect target: exchange the code and open a session.
///
/// The client gets back the identity and refresh tokens it should present
/// from now on, plus the local port it asked for in `state`.
pub async fn callback(
    headers: HeaderMap,
    args: Query<CallbackArgs>,
    gate: Extension<Arc<AuthGate>>,
) -> Response {
    let request_id = request_id(&headers);
    let state = match parse_state(args.state.as_deref()) {
        Ok(state) => state,
        Err(err) => return err.into_response(),
    };

    match gate.login(&args.code, state.id).await {
        Ok(session) => {
            info!(request_id, email = %session.owner, "login callback completed");
            Json(LoginComplete {
                session_id: session.session_id,
                token: session.identity_token,
                r_token: session.refresh_token,
                email: session.owner,
                port: state.port,
            })
            .into_response()
        }
        Err(err) => {
            info!(request_id, "login callback failed: {err}");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::{app, app_with, empty, json_body, remote};
    use crate::auth::{
        ExchangeError, IdClaims, IdentityProvider, TokenGrant, VerifyError,
        jwt::{
            test_support::{ISSUER, claims, jwks, sign},
            verify_rs256,
        },
    };
    use crate::model::now_unix_seconds;
    use crate::store::{DurableStore, MemoryStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    /// Grants a signed token for `a@x.com` for any code.
    struct GrantingProvider;

    #[async_trait]
    impl IdentityProvider for GrantingProvider {
        async fn verify(&self, token: &str, audience: &str) -> Result<IdClaims, VerifyError> {
            verify_rs256(
                token,
                &jwks(),
                &[ISSUER.to_string()],
                audience,
                now_unix_seconds(),
            )
        }

        async fn exchange_refresh_token(
            &self,
            _refresh_token: &str,
        ) -> Result<TokenGrant, ExchangeError> {
            Err(ExchangeError::Rejected("not used".to_string()))
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ExchangeError> {
            Ok(TokenGrant {
                id_token: sign(&claims("a@x.com", now_unix_seconds() + 600)),
                refresh_token: format!("rt-{code}"),
                token_type: "Bearer".to_string(),
                ..TokenGrant::default()
            })
        }
    }

    #[test]
    fn state_accepts_both_key_styles() -> Result<()> {
        assert_eq!(
            parse_state(Some(r#"{"Id":"s1","Port":"8085"}"#))?,
            LoginState {
                id: Some("s1".to_string()),
                port: Some("8085".to_string())
            }
        );
        assert_eq!(parse_state(Some(r#"{"id":"s1"}"#))?.id.as_deref(), Some("s1"));
        assert_eq!(parse_state(None)?, LoginState::default());
        assert_eq!(parse_state(Some("nope")), Err(LoginError::MalformedState));
        Ok(())
    }

    #[tokio::test]
    async fn callback_opens_session() -> Result<()> {
        let (router, memory) =
            app_with(MemoryStore::new(), remote(), Arc::new(GrantingProvider)).await?;
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?code=abc&state=%7B%22Id%22%3A%22s1%22%2C%22Port%22%3A%228085%22%7D")
                    .body(empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await?;
        assert_eq!(body["sessionId"], "s1");
        assert_eq!(body["rToken"], "rt-abc");
        assert_eq!(body["email"], "a@x.com");
        assert_eq!(body["port"], "8085");

        let stored = memory.get_session_by_refresh_token("rt-abc").await?;
        assert_eq!(stored.map(|s| s.session_id), Some("s1".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn callback_rejections() -> Result<()> {
        let (router, _memory) = app(MemoryStore::new(), remote()).await?;

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/auth/callback").body(empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?code=abc&state=nope")
                    .body(empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(Request::builder().uri("/auth/callback?code=abc").body(empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await?["error"],
            "authorization code exchange failed"
        );
        Ok(())
    }
}
