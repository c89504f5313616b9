//! Downstream forwarding and ambient layer tests

mod common;

use std::time::Duration;

use axum::{Router, routing::get};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::Value;

use common::{EchoBackend, MockIdp, TestGateway, gateway_config, valid_token};

#[tokio::test]
async fn method_query_and_body_are_preserved() {
    let idp = MockIdp::issuing("T2").await;
    let (gateway, backend) = TestGateway::with_idp(&idp).await;

    let response = gateway
        .post("/customers/42/notes?draft=true")
        .bearer_auth(valid_token())
        .body("hello backend")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/customers/42/notes");
    assert_eq!(body["query"], "draft=true");
    assert_eq!(body["body"], "hello backend");
    // Host is rewritten for the upstream, not copied from the inbound request
    assert_eq!(
        body["host"],
        backend.url.trim_start_matches("http://")
    );
}

#[tokio::test]
async fn unknown_prefix_is_404() {
    let idp = MockIdp::issuing("T2").await;
    let (gateway, backend) = TestGateway::with_idp(&idp).await;

    let response = gateway.get("/inventory/1").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let idp = MockIdp::issuing("T2").await;
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let gateway = TestGateway::start(gateway_config(&idp.url, &dead)).await;

    let response = gateway.get("/products/1").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn slow_upstream_is_504() {
    let app = Router::new().fallback(get(|| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        "late"
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let slow = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let idp = MockIdp::issuing("T2").await;
    let mut config = gateway_config(&idp.url, &slow);
    config.server.request_timeout = Duration::from_millis(300);
    let gateway = TestGateway::start(config).await;

    let response = gateway.get("/products/1").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn oversized_body_is_413() {
    let idp = MockIdp::issuing("T2").await;
    let (gateway, backend) = TestGateway::with_idp(&idp).await;

    // max_body_size is 1024 in the test configuration
    let response = gateway
        .post("/products/upload")
        .body(vec![b'x'; 4096])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn request_id_is_generated_and_propagated() {
    let idp = MockIdp::issuing("T2").await;
    let (gateway, _backend) = TestGateway::with_idp(&idp).await;

    let generated = gateway.get("/health").send().await.unwrap();
    assert!(generated.headers().contains_key("x-request-id"));

    let echoed = gateway
        .get("/health")
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(echoed.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn cors_preflight_is_answered_before_authentication() {
    let idp = MockIdp::issuing("T2").await;
    let (gateway, backend) = TestGateway::with_idp(&idp).await;

    let response = gateway
        .client
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/customers/1", gateway.url),
        )
        .header("Origin", "https://app.example.com")
        .header("Access-Control-Request-Method", "GET")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn authorization_header_is_exposed_to_browsers() {
    let idp = MockIdp::issuing("T2").await;
    let (gateway, _backend) = TestGateway::with_idp(&idp).await;

    let response = gateway
        .get("/products/1")
        .header("Origin", "https://app.example.com")
        .send()
        .await
        .unwrap();

    let exposed = response.headers()["access-control-expose-headers"]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("authorization"));
}

#[tokio::test]
async fn backend_answer_is_streamed_back() {
    let idp = MockIdp::issuing("T2").await;
    let backend = EchoBackend::start().await;
    let gateway = TestGateway::start(gateway_config(&idp.url, &backend.url)).await;

    let response = gateway.get("/products/a/b?c=d").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["path"], "/a/b");
    assert_eq!(body["query"], "c=d");
}
