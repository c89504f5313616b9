//! Unauthorized responder
//!
//! Every authentication failure, whether the filter's own reject or an
//! exception raised by the route policy layer, ends in the same response:
//! `401 Unauthorized`, empty body, no extra headers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

/// Bare 401 response
#[must_use]
pub fn unauthorized() -> Response {
    StatusCode::UNAUTHORIZED.into_response()
}

/// Authentication exception raised above the filter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    /// Protected path reached without a bearer token
    #[error("missing bearer token")]
    MissingCredential,

    /// Bearer token failed verification
    #[error("invalid bearer token")]
    InvalidCredential,

    /// Bearer token expired and was not refreshed
    #[error("expired bearer token")]
    ExpiredCredential,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        info!(reason = %self, "Unauthorized access attempt");
        unauthorized()
    }
}
