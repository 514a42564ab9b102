//! Shared helpers: an in-memory gateway behind the real router.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use keyhole_api::{AppState, config::ApiConfig};
use keyhole_core::gateway::IssueCodeRequest;
use keyhole_core::store::MemoryStore;
use keyhole_core::{Gateway, GatewaySettings};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const API_KEY: &str = "kh_integration_key";
pub const REDIRECT: &str = "https://app.example/cb";

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<Gateway>,
    pub router: Router,
}

pub fn test_config() -> ApiConfig {
    ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        pg_connection_url: String::new(),
        session_secret: "integration-secret".into(),
        production: true,
        trust_proxy_headers: true,
        idle_timeout_minutes: 30,
        session_token_ttl_hours: 168,
    }
}

pub fn app() -> TestApp {
    app_with(GatewaySettings {
        production: true,
        ..Default::default()
    })
}

pub fn app_with(settings: GatewaySettings) -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(Gateway::new(
        store.clone(),
        config.session_secret.as_bytes(),
        settings,
    ));
    let router = keyhole_api::router(AppState {
        gateway: gateway.clone(),
        config,
    });
    TestApp {
        store,
        gateway,
        router,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
}

impl TestApp {
    /// Send a request from `ip`. `body` is sent as JSON when present.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        ip: &str,
        api_key: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Forwarded-For", ip)
            .header("User-Agent", "integration-test");
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send_raw(request).await
    }

    /// Send a prebuilt request and decode the JSON reply.
    pub async fn send_raw(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.expect("request");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("parse JSON")
        };
        Reply {
            status,
            headers,
            json,
        }
    }

    /// A user on a public project with `app.example` as redirect domain.
    pub fn seed(&self) -> (Uuid, Uuid) {
        let user = self.store.add_user("lee@example.com");
        let project = self
            .store
            .add_project("app", Some("app.example"), true, API_KEY);
        (user.id, project.id)
    }

    pub async fn issue_code(&self, user_id: Uuid, project_id: Uuid) -> String {
        self.gateway
            .issue_code(IssueCodeRequest {
                user_id,
                project_id,
                redirect_uri: REDIRECT.into(),
                code_challenge: None,
                code_challenge_method: None,
                ttl: None,
            })
            .await
            .expect("issue code")
            .code
    }
}
