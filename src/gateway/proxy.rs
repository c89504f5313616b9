//! Downstream forwarding to backend services
//!
//! A static table maps path prefixes to upstream base URLs; the longest
//! matching prefix wins. Requests keep their method, path, query, body and
//! end-to-end headers, so a token rewritten by the filter reaches the
//! backend as-is.

use std::time::Duration;

use axum::{
    Json,
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::config::{RouteConfig, ServerConfig};
use crate::{Error, Result};

/// Connection-scoped headers never forwarded in either direction
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A resolved downstream route
#[derive(Debug, Clone)]
pub struct Route {
    /// Route name (for logs)
    pub name: String,
    prefix: String,
    upstream: Url,
    strip_prefix: bool,
}

impl Route {
    fn from_config(config: &RouteConfig) -> Result<Self> {
        let upstream = Url::parse(&config.upstream)
            .map_err(|e| Error::Config(format!("route {}: {e}", config.prefix)))?;
        let prefix = config.prefix.trim_end_matches('/').to_string();
        let name = if config.name.is_empty() {
            config.prefix.clone()
        } else {
            config.name.clone()
        };

        Ok(Self {
            name,
            prefix,
            upstream,
            strip_prefix: config.strip_prefix,
        })
    }

    /// Length of the match if `path` falls under this route
    fn matches(&self, path: &str) -> Option<usize> {
        if self.prefix.is_empty() {
            return Some(0);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(self.prefix.len())
    }

    /// Upstream URL for an inbound path and query
    fn target(&self, path: &str, query: Option<&str>) -> Url {
        let forwarded = if self.strip_prefix {
            match &path[self.prefix.len()..] {
                "" => "/",
                rest => rest,
            }
        } else {
            path
        };

        let mut url = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        url.set_path(&format!("{base}{forwarded}"));
        url.set_query(query);
        url
    }
}

/// Prefix → upstream route table
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build the table from configuration
    pub fn new(routes: &[RouteConfig]) -> Result<Self> {
        let routes = routes
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// Longest-prefix match for `path`
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter_map(|route| route.matches(path).map(|len| (len, route)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, route)| route)
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no routes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Forwards requests to the backend owning their path
pub struct Proxy {
    routes: RouteTable,
    client: Client,
    max_body_size: usize,
}

impl Proxy {
    /// Create the proxy with a shared HTTP client
    pub fn new(routes: RouteTable, server: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(server.request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            // Redirects belong to the caller
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            routes,
            client,
            max_body_size: server.max_body_size,
        })
    }

    /// Route table
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Forward one request to its upstream and stream the answer back
    pub async fn forward(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();

        let Some(route) = self.routes.resolve(path) else {
            debug!(path = %path, "No route");
            return error_response(StatusCode::NOT_FOUND, "No route for path");
        };
        let target = route.target(path, parts.uri.query());

        let Ok(body) = to_bytes(body, self.max_body_size).await else {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        };

        let upstream = self
            .client
            .request(parts.method.clone(), target)
            .headers(forwardable_headers(&parts.headers))
            .body(body)
            .send()
            .await;

        match upstream {
            Ok(response) => {
                let status = response.status();
                let headers = forwardable_headers(response.headers());
                debug!(route = %route.name, status = %status, "Upstream responded");

                let mut out = Response::new(Body::from_stream(response.bytes_stream()));
                *out.status_mut() = status;
                *out.headers_mut() = headers;
                out
            }
            Err(e) if e.is_timeout() => {
                warn!(route = %route.name, "Upstream timed out");
                error_response(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out")
            }
            Err(e) => {
                warn!(route = %route.name, error = %e.without_url(), "Upstream unreachable");
                error_response(StatusCode::BAD_GATEWAY, "Upstream unavailable")
            }
        }
    }
}

/// Copy end-to-end headers, dropping hop-by-hop ones, `Host` and
/// `Content-Length` (recomputed for the outbound body)
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    // Headers named in `Connection` are hop-by-hop too
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str())
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || listed.iter().any(|l| l == name.as_str())
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
