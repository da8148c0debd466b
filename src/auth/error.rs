use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

const HINT: &str = "Authenticate again with tiki auth.";

/// Why a request was turned away. Every variant is a 401 with a stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("invalid identity token")]
    InvalidToken,
    #[error("no live session for this token")]
    UnknownSession,
    #[error("token audience mismatch")]
    AudienceMismatch,
    #[error("organisational domain mismatch")]
    DomainMismatch,
    #[error("token expired and no renewal credential was sent")]
    MissingRenewalCredential,
    #[error("token renewal failed")]
    RenewalFailed,
    #[error("identity is banned")]
    Banned,
}

#[derive(Debug, Serialize)]
struct RejectionBody {
    code: &'static str,
    error: String,
    hint: &'static str,
}

impl Rejection {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingCredential => "-0T",
            Self::InvalidToken => "-1T",
            Self::UnknownSession => "-2T",
            Self::AudienceMismatch => "-3T",
            Self::DomainMismatch => "-4T",
            Self::MissingRenewalCredential => "-5T",
            Self::RenewalFailed => "-6T",
            Self::Banned => "-7T",
        }
    }

    #[must_use]
    pub const fn hint(self) -> &'static str {
        HINT
    }
}

/// Why a login callback could not open a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("missing authorization code")]
    MissingCode,
    #[error("malformed login state")]
    MalformedState,
    #[error("authorization code exchange failed")]
    ExchangeFailed,
    #[error("identity provider returned an unusable identity token")]
    InvalidToken,
    #[error("organisational domain mismatch")]
    DomainMismatch,
    #[error("identity is banned")]
    Banned,
    #[error("session could not be stored")]
    Storage,
}

impl LoginError {
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::MissingCode | Self::MalformedState => StatusCode::BAD_REQUEST,
            Self::Storage => StatusCode::SERVICE_UNAVAILABLE,
            Self::ExchangeFailed | Self::InvalidToken | Self::DomainMismatch | Self::Banned => {
                StatusCode::UNAUTHORIZED
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginErrorBody {
    error: String,
    hint: &'static str,
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let body = LoginErrorBody {
            error: self.to_string(),
            hint: HINT,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = RejectionBody {
            code: self.code(),
            error: self.to_string(),
            hint: self.hint(),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique() {
        let all = [
            Rejection::MissingCredential,
            Rejection::InvalidToken,
            Rejection::UnknownSession,
            Rejection::AudienceMismatch,
            Rejection::DomainMismatch,
            Rejection::MissingRenewalCredential,
            Rejection::RenewalFailed,
            Rejection::Banned,
        ];
        let codes: HashSet<&str> = all.iter().map(|r| r.code()).collect();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn login_errors_map_to_status() {
        assert_eq!(LoginError::MissingCode.status(), StatusCode::BAD_REQUEST);
        assert_eq!(LoginError::Banned.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            LoginError::Storage.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn responds_401() {
        let response = Rejection::Banned.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
