//! Shared harness for integration tests
//!
//! Spins up, all on `127.0.0.1:0`:
//! - a mock identity provider token endpoint with a call counter
//! - an echo backend reporting what it received
//! - the gateway itself, wired to both

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    routing::post,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use edge_gateway::config::Config;
use edge_gateway::gateway::Gateway;

pub const SIGNING_PRIVATE_PEM: &str = include_str!("../fixtures/signing_key.pem");
pub const FOREIGN_PRIVATE_PEM: &str = include_str!("../fixtures/foreign_key.pem");

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn claims_expiring_in(secs: i64) -> Value {
    let now = now();
    json!({
        "sub": "user-1",
        "preferred_username": "alice",
        "iat": now.saturating_sub(7200),
        "exp": now.saturating_add_signed(secs),
    })
}

pub fn mint_with(private_pem: &str, claims: &Value) -> String {
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &key).unwrap()
}

/// Token signed by the gateway's trusted key
pub fn mint(claims: &Value) -> String {
    mint_with(SIGNING_PRIVATE_PEM, claims)
}

pub fn expired_token() -> String {
    mint(&claims_expiring_in(-3600))
}

pub fn valid_token() -> String {
    mint(&claims_expiring_in(3600))
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Mock token endpoint
#[derive(Clone)]
pub struct MockIdp {
    pub url: String,
    calls: Arc<AtomicUsize>,
    forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

#[derive(Clone)]
struct IdpState {
    calls: Arc<AtomicUsize>,
    forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
    status: StatusCode,
    body: Value,
    delay: Duration,
}

impl MockIdp {
    /// Token endpoint answering `200 {"access_token": token}`
    pub async fn issuing(token: &str) -> Self {
        let body = json!({ "access_token": token, "token_type": "Bearer" });
        Self::start(StatusCode::OK, body, Duration::ZERO).await
    }

    /// Slow token endpoint, for concurrency tests
    pub async fn issuing_slowly(token: &str, delay: Duration) -> Self {
        Self::start(StatusCode::OK, json!({ "access_token": token }), delay).await
    }

    /// Token endpoint answering with an arbitrary status and body
    pub async fn responding(status: StatusCode, body: Value) -> Self {
        Self::start(status, body, Duration::ZERO).await
    }

    async fn start(status: StatusCode, body: Value, delay: Duration) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let forms = Arc::new(Mutex::new(Vec::new()));
        let state = IdpState {
            calls: Arc::clone(&calls),
            forms: Arc::clone(&forms),
            status,
            body,
            delay,
        };

        let app = Router::new()
            .route("/realms/demo/protocol/openid-connect/token", post(token_handler))
            .with_state(state);
        let addr = serve(app).await;

        Self {
            url: format!("http://{addr}/realms/demo/protocol/openid-connect/token"),
            calls,
            forms,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn forms(&self) -> Vec<HashMap<String, String>> {
        self.forms.lock().unwrap().clone()
    }
}

async fn token_handler(
    State(state): State<IdpState>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    state.calls.fetch_add(1, Ordering::SeqCst);
    state.forms.lock().unwrap().push(form);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (state.status, Json(state.body))
}

/// Backend that echoes the request it received as JSON
#[derive(Clone)]
pub struct EchoBackend {
    pub url: String,
    hits: Arc<AtomicUsize>,
}

impl EchoBackend {
    pub async fn start() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .fallback(echo_handler)
            .with_state(Arc::clone(&hits));
        let addr = serve(app).await;

        Self {
            url: format!("http://{addr}"),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo_handler(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "authorization": header("authorization"),
        "refresh_token": header("refresh-token"),
        "host": header("host"),
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Gateway configuration pointing at the given collaborators
pub fn gateway_config(idp_url: &str, backend_url: &str) -> Config {
    let key_file = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/signing_key.pub.pem");
    let yaml = format!(
        r#"
server:
  request_timeout: 2s
  shutdown_timeout: 1s
  max_body_size: 1024
auth:
  public_key_file: "{key_file}"
identity_provider:
  token_endpoint: "{idp_url}"
  client_id: "gateway"
  client_secret: "gateway-secret"
  timeout: 2s
security:
  protected_prefixes: ["/customers", "/addresses"]
routes:
  - name: customer-service
    prefix: /customers
    upstream: "{backend_url}"
  - name: address-service
    prefix: /addresses
    upstream: "{backend_url}"
  - name: catalog
    prefix: /products
    upstream: "{backend_url}"
    strip_prefix: true
"#
    );
    Config::from_yaml(&yaml).unwrap()
}

/// A gateway running in the background
pub struct TestGateway {
    pub url: String,
    pub client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestGateway {
    pub async fn start(config: Config) -> Self {
        let gateway = Gateway::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            gateway
                .serve(listener, async move {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            shutdown: Some(tx),
        }
    }

    /// Gateway wired to a fresh IdP and echo backend
    pub async fn with_idp(idp: &MockIdp) -> (Self, EchoBackend) {
        let backend = EchoBackend::start().await;
        let gateway = Self::start(gateway_config(&idp.url, &backend.url)).await;
        (gateway, backend)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{path}", self.url))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{path}", self.url))
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
