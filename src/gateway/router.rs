//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::warn;

use super::filter::{AuthFilter, auth_filter_middleware};
use super::guard::{RouteGuard, guard_middleware};
use super::proxy::Proxy;
use crate::config::CorsConfig;
use crate::telemetry::render_metrics;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state
pub struct AppState {
    /// Authentication filter (owns the token cache)
    pub filter: Arc<AuthFilter>,
    /// Route policy
    pub guard: Arc<RouteGuard>,
    /// Downstream forwarding
    pub proxy: Arc<Proxy>,
}

/// Create the router
///
/// Layers, outermost first: trace, panic catcher, request id, CORS,
/// authentication filter, route policy.
pub fn create_router(state: Arc<AppState>, cors: &CorsConfig) -> Router {
    let filter = Arc::clone(&state.filter);
    let guard = Arc::clone(&state.guard);

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_fallback)
        .layer(middleware::from_fn_with_state(guard, guard_middleware))
        .layer(middleware::from_fn_with_state(filter, auth_filter_middleware));

    if let Some(cors) = cors_layer(cors) {
        router = router.layer(cors);
    }

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "token_cache_entries": state.filter.cache().len().await,
    }))
}

/// Prometheus metrics handler
async fn metrics_handler() -> Response {
    match render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn proxy_fallback(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    state.proxy.forward(request).await
}

/// Build the CORS layer, `None` when disabled
fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if !config.enabled {
        return None;
    }

    let origins = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(config.allowed_origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .inspect_err(|_| warn!(origin = %o, "Ignoring invalid CORS origin"))
                .ok()
        }))
    };

    let methods = if config.allowed_methods.iter().any(|m| m == "*") {
        AllowMethods::any()
    } else {
        AllowMethods::list(config.allowed_methods.iter().filter_map(|m| {
            m.parse::<Method>()
                .inspect_err(|_| warn!(method = %m, "Ignoring invalid CORS method"))
                .ok()
        }))
    };

    let exposed = config
        .exposed_headers
        .iter()
        .filter_map(|h| h.parse::<HeaderName>().ok());

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(AllowHeaders::any())
            .expose_headers(ExposeHeaders::list(exposed)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_disabled_yields_no_layer() {
        let config = CorsConfig {
            enabled: false,
            ..CorsConfig::default()
        };
        assert!(cors_layer(&config).is_none());
    }

    #[test]
    fn cors_accepts_explicit_lists() {
        let config = CorsConfig {
            enabled: true,
            allowed_origins: vec!["https://app.example.com".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            exposed_headers: vec!["Authorization".to_string(), "X-Request-Id".to_string()],
        };
        assert!(cors_layer(&config).is_some());
    }
}
