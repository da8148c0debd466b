pub mod health;
pub mod login;
pub mod peers;
pub mod sessions;
pub mod token;

// common functions for the handlers
use crate::{
    auth::{AuthGate, Authorized, NEW_TOKEN_HEADER, Rejection},
    permission::PermissionDenied,
};
use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, info};

/// Run the auth gate for a handler. On success the returned headers carry a
/// renewed identity token, if there is one.
pub(crate) async fn authorize(
    headers: &HeaderMap,
    gate: &AuthGate,
) -> Result<(Authorized, HeaderMap), Rejection> {
    let request_id = request_id(headers);
    let authorized = gate.authenticate(headers).await.map_err(|rejection| {
        info!(request_id, code = rejection.code(), "request rejected: {rejection}");
        rejection
    })?;

    let mut response_headers = HeaderMap::new();
    if let Some(token) = &authorized.renewed_token {
        match HeaderValue::from_str(token) {
            Ok(value) => {
                response_headers.insert(NEW_TOKEN_HEADER, value);
            }
            Err(err) => debug!("Failed to build renewed token header: {}", err),
        }
    }
    debug!(request_id, email = %authorized.identity.email, path = ?authorized.path, "request authorized");
    Ok((authorized, response_headers))
}

pub(crate) fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
}

impl IntoResponse for PermissionDenied {
    fn into_response(self) -> Response {
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
