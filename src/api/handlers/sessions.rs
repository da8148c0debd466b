use crate::{
    api::handlers::{authorize, request_id},
    auth::AuthGate,
    model::{Partition, SessionView},
    permission::PermissionDenied,
};
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Deserialize, Default)]
pub struct SessionsArgs {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// List one session partition. Admins only; secrets are never returned.
pub async fn sessions(
    headers: HeaderMap,
    gate: Extension<Arc<AuthGate>>,
    Query(args): Query<SessionsArgs>,
) -> Response {
    let (authorized, response_headers) = match authorize(&headers, &gate).await {
        Ok(ok) => ok,
        Err(rejection) => return rejection.into_response(),
    };
    let email = authorized.identity.email;

    if !gate.permissions().is_admin(&email).await {
        warn!(request_id = request_id(&headers), %email, "session listing denied");
        return PermissionDenied {
            email,
            resource: "sessions".to_string(),
            operation: "list".to_string(),
        }
        .into_response();
    }

    let partition = match args.kind.as_deref().unwrap_or("all").parse::<Partition>() {
        Ok(partition) => partition,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    match gate.sessions().get_sessions(partition).await {
        Ok(sessions) => {
            let views: Vec<SessionView> = sessions.iter().map(SessionView::from).collect();
            (response_headers, Json(views)).into_response()
        }
        Err(err) => {
            error!(request_id = request_id(&headers), %partition, error = %err, "failed to list sessions");
            (StatusCode::SERVICE_UNAVAILABLE, "session store unavailable").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::handlers::test_support::{DEVELOPER, app, empty, json_body, local};
    use crate::model::{ADMIN_GROUP, Group, Session};
    use crate::store::MemoryStore;
    use anyhow::Result;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn seeded() -> MemoryStore {
        let mut revoked = Session {
            session_id: "r".to_string(),
            owner: "b@x.com".to_string(),
            identity_token: "tok-r".to_string(),
            refresh_token: "rt-r".to_string(),
            expires_at: "9999999999".to_string(),
            created_epoch: 2,
            ..Session::default()
        };
        revoked.is_revoked = true;
        MemoryStore::new()
            .with_group(Group {
                name: ADMIN_GROUP.to_string(),
                members: [DEVELOPER.to_string()].into_iter().collect(),
                ..Group::default()
            })
            .with_session(Session {
                session_id: "a".to_string(),
                owner: "a@x.com".to_string(),
                identity_token: "tok-a".to_string(),
                refresh_token: "rt-a".to_string(),
                expires_at: "9999999999".to_string(),
                created_epoch: 1,
                ..Session::default()
            })
            .with_session(revoked)
    }

    #[tokio::test]
    async fn admin_lists_partition() -> Result<()> {
        let (router, _memory) = app(seeded(), local()).await?;
        let response = router
            .oneshot(Request::builder().uri("/sessions?type=revoked").body(empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await?;
        let listed = body.as_array().map(Vec::len).unwrap_or_default();
        assert_eq!(listed, 1);
        assert_eq!(body[0]["sessionId"], "r");
        assert!(body[0].get("identityToken").is_none());
        assert!(body[0].get("refreshToken").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn defaults_to_all() -> Result<()> {
        let (router, _memory) = app(seeded(), local()).await?;
        let response = router
            .oneshot(Request::builder().uri("/sessions").body(empty())?)
            .await?;
        let body = json_body(response).await?;
        assert_eq!(body.as_array().map(Vec::len), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn non_admin_is_forbidden() -> Result<()> {
        let config = local().with_developer_email("someone@x.com".to_string());
        let (router, _memory) = app(seeded(), config).await?;
        let response = router
            .oneshot(Request::builder().uri("/sessions").body(empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            json_body(response).await?["error"],
            "someone@x.com is not allowed to list on sessions"
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_partition_is_bad_request() -> Result<()> {
        let (router, _memory) = app(seeded(), local()).await?;
        let response = router
            .oneshot(Request::builder().uri("/sessions?type=stale").body(empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
