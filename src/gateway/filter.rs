//! Edge authentication filter
//!
//! Runs once per inbound request and decides between three outcomes:
//!
//! - **Forward**: no bearer token, a valid token, or (under the default
//!   `forward` policy) a token that fails verification. Unverifiable tokens
//!   are left for the route policy layer to reject on protected paths.
//! - **Forward with new token**: the token is expired (authentic signature,
//!   past `exp`) and either a replacement is cached or the caller's refresh
//!   credential buys a new one from the identity provider.
//! - **Reject**: an expired token that cannot be refreshed. Answered with a
//!   bare 401.
//!
//! Cache hits skip verification entirely: only tokens already proven expired
//! and successfully refreshed are ever cached.
//!
//! Refreshes are single-flight per original token. The first request takes a
//! per-token lock and refreshes; requests queued behind it find the
//! replacement in the cache once the lock is released. The refresh runs in
//! its own task so a client hanging up does not abort cache population.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Request,
        header::AUTHORIZATION,
    },
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use telemetry_metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::responder::unauthorized;
use crate::config::{AuthConfig, InvalidTokenPolicy};
use crate::secrets::Secret;
use crate::telemetry::{AUTH_DECISIONS, TOKEN_CACHE_HITS, TOKEN_REFRESHES};
use crate::token::cache::fingerprint;
use crate::token::{Principal, RefreshError, TokenCache, TokenRefresher, TokenVerifier, Verdict};
use crate::{Error, Result};

/// Outcome of the filter for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Pass the request through unchanged
    Forward {
        /// Identity, when the presented token verified as valid
        principal: Option<Principal>,
    },
    /// Replace the bearer token before forwarding
    ForwardWithNewToken(String),
    /// Answer 401 and do not forward
    Reject(RejectReason),
}

impl AuthDecision {
    fn forward() -> Self {
        Self::Forward { principal: None }
    }

    /// Label used for the decisions counter
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Forward { principal: Some(_) } => "forward_valid",
            Self::Forward { principal: None } => "forward",
            Self::ForwardWithNewToken(_) => "forward_new_token",
            Self::Reject(_) => "reject",
        }
    }
}

/// Why the filter rejected a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// Expired token with no refresh credential header
    #[error("expired token and no refresh credential")]
    MissingRefreshCredential,

    /// Identity provider did not issue a usable token
    #[error("token refresh failed: {0}")]
    RefreshFailed(RefreshError),

    /// Token failed verification under the `reject` policy
    #[error("invalid token")]
    InvalidCredential,
}

/// Per-request authentication pipeline shared by all requests
pub struct AuthFilter {
    verifier: Arc<TokenVerifier>,
    cache: Arc<dyn TokenCache>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_header: HeaderName,
    invalid_policy: InvalidTokenPolicy,
    /// Refresh locks keyed by the fingerprint of the stale token
    inflight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AuthFilter {
    /// Assemble the filter from its collaborators
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `auth.refresh_header` is not a valid
    /// header name.
    pub fn new(
        verifier: Arc<TokenVerifier>,
        cache: Arc<dyn TokenCache>,
        refresher: Arc<dyn TokenRefresher>,
        config: &AuthConfig,
    ) -> Result<Self> {
        let refresh_header = HeaderName::from_bytes(config.refresh_header.trim().as_bytes())
            .map_err(|e| Error::Config(format!("auth.refresh_header: {e}")))?;

        Ok(Self {
            verifier,
            cache,
            refresher,
            refresh_header,
            invalid_policy: config.invalid_token_policy,
            inflight: Arc::new(DashMap::new()),
        })
    }

    /// Token cache used by this filter
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn TokenCache> {
        &self.cache
    }

    /// Decide what happens to a request with these headers
    pub async fn decide(&self, headers: &HeaderMap) -> AuthDecision {
        let Some(token) = bearer_token(headers) else {
            debug!("No bearer token, forwarding");
            return AuthDecision::forward();
        };

        if let Some(replacement) = self.cache.lookup(token).await {
            debug!("Serving refreshed token from cache");
            counter!(TOKEN_CACHE_HITS).increment(1);
            return AuthDecision::ForwardWithNewToken(replacement);
        }

        match self.verifier.verify_blocking(token.to_string()).await {
            Verdict::Valid(principal) => AuthDecision::Forward {
                principal: Some(principal),
            },
            Verdict::Invalid => match self.invalid_policy {
                InvalidTokenPolicy::Forward => {
                    debug!("Token failed verification, forwarding to route policy");
                    AuthDecision::forward()
                }
                InvalidTokenPolicy::Reject => AuthDecision::Reject(RejectReason::InvalidCredential),
            },
            Verdict::Expired => self.attempt_refresh(token, headers).await,
        }
    }

    async fn attempt_refresh(&self, token: &str, headers: &HeaderMap) -> AuthDecision {
        let Some(credential) = refresh_credential(headers, &self.refresh_header) else {
            return AuthDecision::Reject(RejectReason::MissingRefreshCredential);
        };

        let key = fingerprint(token);
        let lock = Arc::clone(self.inflight.entry(key.clone()).or_default().value());

        let cache = Arc::clone(&self.cache);
        let refresher = Arc::clone(&self.refresher);
        let inflight = Arc::clone(&self.inflight);
        let original = token.to_string();

        // Owns the lock lifecycle so a caller dropped mid-refresh leaves no entry
        let task = tokio::spawn(async move {
            let guard = lock.lock().await;

            // Another request may have refreshed while we waited
            let outcome = match cache.lookup(&original).await {
                Some(replacement) => Ok(replacement),
                None => {
                    let refreshed = refresher.refresh(&credential).await;
                    if let Ok(ref replacement) = refreshed {
                        cache.store(&original, replacement).await;
                    }
                    refreshed
                }
            };

            drop(guard);
            drop(lock);
            // Drop the lock entry once nobody else is queued on it
            inflight.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
            outcome
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Refresh task failed");
                Err(RefreshError::Transport("refresh task aborted".to_string()))
            }
        };

        match outcome {
            Ok(replacement) => {
                counter!(TOKEN_REFRESHES, "result" => "success").increment(1);
                info!("Expired token refreshed");
                AuthDecision::ForwardWithNewToken(replacement)
            }
            Err(e) => {
                counter!(TOKEN_REFRESHES, "result" => e.kind()).increment(1);
                warn!(error = %e, "Token refresh failed");
                AuthDecision::Reject(RejectReason::RefreshFailed(e))
            }
        }
    }
}

/// Authentication filter middleware
pub async fn auth_filter_middleware(
    State(filter): State<Arc<AuthFilter>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    info!(
        method = %request.method(),
        path = %request.uri().path(),
        "Filtering request"
    );

    let decision = filter.decide(request.headers()).await;
    counter!(AUTH_DECISIONS, "outcome" => decision.outcome()).increment(1);

    match decision {
        AuthDecision::Forward { principal } => {
            if let Some(principal) = principal {
                request.extensions_mut().insert(principal);
            }
            next.run(request).await
        }
        AuthDecision::ForwardWithNewToken(token) => {
            let Some(value) = bearer_header_value(&token) else {
                warn!("Refreshed token is not a valid header value");
                return unauthorized();
            };
            request.headers_mut().insert(AUTHORIZATION, value);
            next.run(request).await
        }
        AuthDecision::Reject(reason) => {
            info!(reason = %reason, "Rejecting request");
            unauthorized()
        }
    }
}

/// Bearer token from the `Authorization` header, if the scheme is bearer
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
}

fn refresh_credential(headers: &HeaderMap, name: &HeaderName) -> Option<Secret> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Secret::new)
}

fn bearer_header_value(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}
