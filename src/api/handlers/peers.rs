use crate::{api::handlers::authorize, auth::AuthGate, cluster::ClusterInfo, session::PartitionSizes};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize, Debug)]
pub struct Peers {
    #[serde(flatten)]
    cluster: ClusterInfo,
    cache: PartitionSizes,
}

/// Cluster membership as this instance sees it, with cached partition sizes.
pub async fn peers(headers: HeaderMap, gate: Extension<Arc<AuthGate>>) -> Response {
    let (_authorized, response_headers) = match authorize(&headers, &gate).await {
        Ok(ok) => ok,
        Err(rejection) => return rejection.into_response(),
    };

    let body = Peers {
        cluster: gate.sessions().cluster().info(),
        cache: gate.sessions().cache_sizes(),
    };
    (response_headers, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use crate::api::handlers::test_support::{app, empty, json_body, local, remote};
    use crate::store::MemoryStore;
    use anyhow::Result;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn reports_cluster_view() -> Result<()> {
        let (router, _memory) = app(MemoryStore::new(), local()).await?;
        let response = router
            .oneshot(Request::builder().uri("/peers").body(empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await?;
        assert_eq!(body["state"], "bootstrapping");
        assert_eq!(body["localIp"], "10.255.255.1");
        assert_eq!(body["peers"], serde_json::json!([]));
        assert_eq!(body["cache"]["all"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn requires_credential() -> Result<()> {
        let (router, _memory) = app(MemoryStore::new(), remote()).await?;
        let response = router
            .oneshot(Request::builder().uri("/peers").body(empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await?["code"], "-0T");
        Ok(())
    }
}
