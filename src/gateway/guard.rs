//! Route policy: protected path prefixes require an authenticated principal
//!
//! Sits inside the authentication filter. By the time a request gets here its
//! bearer token may have been replaced with a refreshed one, or may be a token
//! the filter chose to forward without vouching for it. Under a protected
//! prefix the token must verify as valid; everywhere else anything goes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::filter::bearer_token;
use super::responder::AuthRejection;
use crate::token::{Principal, TokenVerifier, Verdict};

/// Path-prefix authorization rules
pub struct RouteGuard {
    verifier: Arc<TokenVerifier>,
    protected_prefixes: Vec<String>,
}

impl RouteGuard {
    /// Create a guard for the given prefixes
    pub fn new(verifier: Arc<TokenVerifier>, protected_prefixes: &[String]) -> Self {
        let protected_prefixes = protected_prefixes
            .iter()
            .map(|p| {
                let trimmed = p.trim_end_matches('/');
                if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
            })
            .collect();

        Self {
            verifier,
            protected_prefixes,
        }
    }

    /// Whether `path` falls under a protected prefix.
    ///
    /// Matching is per path segment: `/customers` covers `/customers` and
    /// `/customers/42` but not `/customersX`.
    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes.iter().any(|prefix| {
            prefix == "/"
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

/// Route policy middleware
pub async fn guard_middleware(
    State(guard): State<Arc<RouteGuard>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthRejection> {
    let path = request.uri().path();
    if !guard.is_protected(path) {
        return Ok(next.run(request).await);
    }

    if request.extensions().get::<Principal>().is_some() {
        debug!(path = %path, "Principal already verified");
        return Ok(next.run(request).await);
    }

    let token = bearer_token(request.headers())
        .ok_or(AuthRejection::MissingCredential)?
        .to_string();

    match guard.verifier.verify_blocking(token).await {
        Verdict::Valid(principal) => {
            debug!(subject = ?principal.subject, "Authenticated request");
            request.extensions_mut().insert(principal);
            Ok(next.run(request).await)
        }
        Verdict::Expired => Err(AuthRejection::ExpiredCredential),
        Verdict::Invalid => Err(AuthRejection::InvalidCredential),
    }
}
