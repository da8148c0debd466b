use crate::{
    api::handlers::authorize,
    auth::{AuthGate, GatePath, extract_bearer_token},
};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Renewal {
    new_token: String,
    email: String,
    renewed: bool,
}

/// Run the gate and hand back the token the client should keep using.
///
/// An expired token with a valid `rtoken` header comes back renewed; a live
/// token comes back unchanged.
pub async fn renew(headers: HeaderMap, gate: Extension<Arc<AuthGate>>) -> Response {
    let (authorized, response_headers) = match authorize(&headers, &gate).await {
        Ok(ok) => ok,
        Err(rejection) => return rejection.into_response(),
    };

    let renewed = authorized.path == GatePath::Renewed;
    let new_token = authorized
        .renewed_token
        .or_else(|| extract_bearer_token(&headers).map(ToString::to_string))
        .unwrap_or_default();

    let body = Renewal {
        new_token,
        email: authorized.identity.email,
        renewed,
    };
    (response_headers, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use crate::api::handlers::test_support::{DEVELOPER, app, empty, json_body, local, remote};
    use crate::model::Session;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use axum::http::{Method, Request, StatusCode, header::AUTHORIZATION};
    use tower::ServiceExt;

    #[tokio::test]
    async fn local_bypass_echoes_identity() -> Result<()> {
        let (router, _memory) = app(MemoryStore::new(), local()).await?;
        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/token/renew")
                    .header(AUTHORIZATION, "Bearer abc")
                    .body(empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await?;
        assert_eq!(body["newToken"], "abc");
        assert_eq!(body["email"], DEVELOPER);
        assert_eq!(body["renewed"], false);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() -> Result<()> {
        let (router, _memory) = app(MemoryStore::new(), remote()).await?;
        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/token/renew")
                    .header(AUTHORIZATION, "Bearer abc")
                    .body(empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = json_body(response).await?;
        assert_eq!(body["code"], "-2T");
        assert_eq!(body["hint"], "Authenticate again with tiki auth.");
        Ok(())
    }

    #[tokio::test]
    async fn unverifiable_token_is_rejected() -> Result<()> {
        let memory = MemoryStore::new().with_session(Session {
            session_id: "s".to_string(),
            owner: "a@x.com".to_string(),
            identity_token: "abc".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: "9999999999".to_string(),
            ..Session::default()
        });
        let (router, _memory) = app(memory, remote()).await?;
        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/token/renew")
                    .header(AUTHORIZATION, "Bearer abc")
                    .body(empty())?,
            )
            .await?;
        assert_eq!(json_body(response).await?["code"], "-1T");
        Ok(())
    }
}
