use crate::{GIT_COMMIT_HASH, auth::AuthGate, cluster::ClusterState, store::DurableStore};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, warn};

const HEALTH_STORE_TIMEOUT_SECONDS: u64 = 2;

#[derive(Serialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
    cluster: ClusterState,
}

/// Report build info, store reachability and cluster state.
///
/// `OPTIONS` gets the same status and headers without a body.
pub async fn health(
    method: Method,
    gate: Extension<Arc<AuthGate>>,
    store: Extension<Arc<dyn DurableStore>>,
) -> impl IntoResponse {
    let store_healthy = probe_store(store.0.as_ref()).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if store_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
        cluster: gate.sessions().cluster().state(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = health.commit.get(0..7).unwrap_or_default();

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    if store_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn probe_store(store: &dyn DurableStore) -> bool {
    match timeout(Duration::from_secs(HEALTH_STORE_TIMEOUT_SECONDS), store.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("Failed to ping store: {}", err);
            false
        }
        Err(_) => {
            warn!("Store health check timed out");
            false
        }
    }
}
