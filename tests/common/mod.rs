//! Shared helpers for HTTP-level contract tests.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use tradenexus_backend::adapters::execution::InMemoryExecutionAdapter;
use tradenexus_backend::adapters::data::InMemoryTraderDataAdapter;
use tradenexus_backend::api::{build_router, AppState};
use tradenexus_backend::config::Config;
use tradenexus_backend::store::StateStore;

pub struct TestHarness {
    pub app: Router,
    pub store: Arc<StateStore>,
    pub engine: Arc<InMemoryExecutionAdapter>,
}

pub fn harness() -> TestHarness {
    let engine = Arc::new(InMemoryExecutionAdapter::new());
    let state = AppState::with_adapters(
        Config::default(),
        engine.clone(),
        Arc::new(InMemoryTraderDataAdapter::new()),
    );
    TestHarness {
        store: state.store.clone(),
        app: build_router(state),
        engine,
    }
}

/// Mint an HS256 token for the default dev secret.
pub fn bearer_token(tenant_id: &str, user_id: &str) -> String {
    let claims = json!({
        "sub": user_id,
        "tenant_id": tenant_id,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret("dev-platform-auth-secret".as_bytes()),
    )
    .unwrap()
}

/// Token scoped to the seeded fixtures (dep-001, paper portfolio, dataset).
pub fn local_token() -> String {
    bearer_token("tenant-local", "user-local")
}

pub struct RequestSpec<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub token: Option<&'a str>,
    pub request_id: &'a str,
    pub idempotency_key: Option<&'a str>,
    pub tenant_header: Option<&'a str>,
    pub body: Option<Value>,
}

impl<'a> RequestSpec<'a> {
    pub fn new(method: &'a str, path: &'a str, token: &'a str) -> Self {
        Self {
            method,
            path,
            token: Some(token),
            request_id: "req-test-0001",
            idempotency_key: None,
            tenant_header: None,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_request_id(mut self, request_id: &'a str) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_idempotency_key(mut self, key: &'a str) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn with_tenant_header(mut self, tenant: &'a str) -> Self {
        self.tenant_header = Some(tenant);
        self
    }
}

pub async fn send(app: &Router, spec: RequestSpec<'_>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(spec.method)
        .uri(spec.path)
        .header("X-Request-Id", spec.request_id);
    if let Some(token) = spec.token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    if let Some(key) = spec.idempotency_key {
        builder = builder.header("Idempotency-Key", key);
    }
    if let Some(tenant) = spec.tenant_header {
        builder = builder.header("X-Tenant-Id", tenant);
    }

    let request = match spec.body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
