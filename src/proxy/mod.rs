// Proxy module - HTTP server that fronts the failover dispatcher
//
// This module implements the single proxy endpoint using Axum. It accepts
// a generation request, validates the body, and hands the candidate list
// to the dispatcher, which cycles through the configured API keys until
// one succeeds.

pub mod dispatch;
pub mod error;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode},
    response::IntoResponse,
    routing::any,
    Json, Router,
};
use serde_json::Value;
use tokio::net::TcpListener;

use crate::config::{Config, MAX_KEY_SLOTS};

use dispatch::{dispatch, Candidate};
use error::DispatchError;

/// Shared state for the proxy server
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for upstream attempts
    client: reqwest::Client,
    /// Immutable configuration, shared read-only across requests
    config: Arc<Config>,
}

impl ProxyState {
    /// Build the ordered candidate list for one request. All slots share
    /// the single configured model; the list is immutable for the
    /// request's duration.
    fn candidates(&self) -> Vec<Candidate> {
        self.config
            .api_keys
            .iter()
            .map(|key| Candidate {
                key: key.clone(),
                model: self.config.model.clone(),
            })
            .collect()
    }
}

/// Start the proxy server
pub async fn start_proxy(
    config: Config,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr = config.bind_addr;

    // Build the HTTP client with timeout and connection pooling. The
    // dispatcher itself imposes no per-attempt deadline; this client
    // timeout is the only bound on a hanging candidate.
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300)) // 5 minute timeout for API calls
        .pool_max_idle_per_host(10)
        .build()
        .context("Failed to create HTTP client")?;

    let state = ProxyState {
        client,
        config: Arc::new(config),
    };

    let app = router(state);

    tracing::info!("Starting proxy on {}", bind_addr);

    // Bind and serve
    let listener = TcpListener::bind(bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Proxy listening on {}", bind_addr);

    // Start serving requests with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}

/// Build the router - every path goes to the proxy handler
fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/", any(proxy_handler))
        .route("/*path", any(proxy_handler))
        .with_state(state)
}

/// CORS headers attached to every response, errors included
pub(crate) fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

/// Empty response with the given status and CORS headers
fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = status.into_response();
    apply_cors(response.headers_mut());
    response
}

/// Main proxy handler
///
/// Preflight short-circuits before any body processing. For POST, the
/// order is: candidate assembly (misconfiguration wins over bad input),
/// body validation, then the failover loop. `DispatchError` carries its
/// own response mapping, CORS included.
async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<Response<Body>, DispatchError> {
    let method = req.method().clone();

    if method == Method::OPTIONS {
        return Ok(empty_response(StatusCode::OK));
    }

    if method != Method::POST {
        return Ok(empty_response(StatusCode::METHOD_NOT_ALLOWED));
    }

    let candidates = state.candidates();
    if candidates.is_empty() {
        tracing::error!(
            "CRITICAL: no API keys configured (set GEMINI_API_KEY_1 .. GEMINI_API_KEY_{})",
            MAX_KEY_SLOTS
        );
        return Err(DispatchError::NoKeys);
    }

    // Read and validate the inbound body: must be JSON with a `contents`
    // field. Everything else about its shape is opaque.
    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|_| DispatchError::InvalidBody)?;
    let payload: Value =
        serde_json::from_slice(&body_bytes).map_err(|_| DispatchError::InvalidBody)?;
    if payload.get("contents").is_none() {
        return Err(DispatchError::InvalidBody);
    }

    tracing::debug!(
        "Dispatching request across {} candidate key(s), model {}",
        candidates.len(),
        state.config.model
    );

    let success = dispatch(&state.client, &state.config.api_url, &candidates, &payload).await?;

    let mut response = (success.status, Json(success.body)).into_response();
    apply_cors(response.headers_mut());
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL_PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

    fn test_config(api_url: &str, keys: &[&str]) -> Config {
        Config {
            api_url: api_url.to_string(),
            api_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Config::default()
        }
    }

    /// Bind the real router on an ephemeral port and return its address
    async fn spawn_proxy(config: Config) -> SocketAddr {
        let state = ProxyState {
            client: reqwest::Client::new(),
            config: Arc::new(config),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_cors_headers() {
        let addr = spawn_proxy(test_config("http://127.0.0.1:9", &["k1"])).await;

        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/", addr))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-methods")
                .unwrap(),
            "POST, OPTIONS"
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-headers")
                .unwrap(),
            "Content-Type"
        );
        assert!(response.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_keys_is_fatal_before_any_upstream_call() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&upstream)
            .await;

        let addr = spawn_proxy(test_config(&upstream.uri(), &[])).await;

        let client = reqwest::Client::new();
        // Body is perfectly valid - configuration still wins
        let response = client
            .post(format!("http://{}/", addr))
            .json(&json!({ "contents": [] }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({ "error": "Server configuration error: No API Keys provided." })
        );
    }

    #[tokio::test]
    async fn body_without_contents_is_rejected_before_dispatch() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&upstream)
            .await;

        let addr = spawn_proxy(test_config(&upstream.uri(), &["k1", "k2"])).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/", addr))
            .json(&json!({ "prompt": "no contents field" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "error": "Invalid JSON in request body." }));
    }

    #[tokio::test]
    async fn unparseable_body_is_rejected() {
        let addr = spawn_proxy(test_config("http://127.0.0.1:9", &["k1"])).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/", addr))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn unsupported_method_gets_405_with_cors() {
        let addr = spawn_proxy(test_config("http://127.0.0.1:9", &["k1"])).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 405);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn successful_upstream_response_passes_through() {
        let upstream = MockServer::start().await;
        let upstream_body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "hello" }] } }]
        });
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(upstream_body.clone()))
            .mount(&upstream)
            .await;

        let addr = spawn_proxy(test_config(&upstream.uri(), &["k1"])).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/", addr))
            .json(&json!({ "contents": [{ "parts": [{ "text": "hi" }] }] }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, upstream_body);
    }

    #[tokio::test]
    async fn all_keys_failing_yields_503_with_count() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(403))
            .expect(3)
            .mount(&upstream)
            .await;

        let addr = spawn_proxy(test_config(&upstream.uri(), &["k1", "k2", "k3"])).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/", addr))
            .json(&json!({ "contents": [] }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 503);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({
                "error": "Service Unavailable",
                "message": "All 3 supplied API keys failed to return a valid response."
            })
        );
    }
}
